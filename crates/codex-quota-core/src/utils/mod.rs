pub mod ansi;
pub mod path;

pub use ansi::strip_ansi;
pub use path::find_in_path;
