use once_cell::sync::Lazy;
use regex::Regex;

static OSC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").unwrap());
static CSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;?<>=]*[ -/]*[@-~]").unwrap());
// Charset selection (ESC ( B) and two-byte escapes (ESC =, ESC >, ESC 7 ...)
static ESC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b(?:[()*+][0-9A-Za-z]|[=>78DEHMc])").unwrap());

/// Remove OSC, CSI and short escape sequences, leaving printable text.
pub fn strip_ansi(input: &str) -> String {
    let without_osc = OSC_RE.replace_all(input, "");
    let without_csi = CSI_RE.replace_all(&without_osc, "");
    ESC_RE.replace_all(&without_csi, "").to_string()
}
