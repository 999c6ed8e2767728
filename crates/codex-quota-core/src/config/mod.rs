mod settings;

pub use settings::{OAuthSettings, PtySettings, RpcSettings, Settings, StrategyKind};
