//! Text scrubbing for anything that is stored and later echoed back (PR
//! titles in comments, error messages on deployment rows).

use lazy_static::lazy_static;
use regex::Regex;

const MAX_FIELD_LEN: usize = 512;
const MAX_ERROR_LEN: usize = 500;
const REDACTED: &str = "[REDACTED]";
/// Shorter values ("1", "on") would shred ordinary words in the message and
/// reveal little on their own, so they are left alone.
const MIN_SECRET_LEN: usize = 3;

lazy_static! {
    static ref SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<\s*(script|style|iframe)[^>]*>.*?<\s*/\s*(script|style|iframe)\s*>")
            .unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref JS_URI: Regex = Regex::new(r"(?i)(javascript|vbscript|data)\s*:").unwrap();
    static ref EVENT_HANDLER: Regex = Regex::new(r"(?i)\bon[a-z]+\s*=").unwrap();
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap();
    static ref URL_CREDENTIALS: Regex = Regex::new(r"://[^/\s:@]+:[^/\s@]+@").unwrap();
}

/// Strip script-like markup and control sequences from a user supplied field.
pub fn sanitize_text(input: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(input, "");
    let text = HTML_TAG.replace_all(&text, "");
    let text = JS_URI.replace_all(&text, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    let text = ANSI_ESCAPE.replace_all(&text, "");
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .take(MAX_FIELD_LEN)
        .collect();
    cleaned.trim().to_string()
}

/// Reduce an internal error to something safe to persist and show on a PR:
/// every known secret value and URL credential replaced, then first line
/// only, length capped. Redaction runs on the whole message so a multi-line
/// secret cannot survive as a partial first line.
pub fn sanitize_error<S: AsRef<str>>(message: &str, secrets: &[S]) -> String {
    let mut text = message.to_string();
    for secret in secrets {
        let secret = secret.as_ref();
        if secret.len() >= MIN_SECRET_LEN {
            text = text.replace(secret, REDACTED);
        }
    }
    let text = URL_CREDENTIALS.replace_all(&text, "://[REDACTED]@");
    let text = text.lines().next().unwrap_or_default();
    let text = ANSI_ESCAPE.replace_all(text, "");
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_ERROR_LEN)
        .collect();
    if cleaned.trim().is_empty() {
        "Deployment failed".to_string()
    } else {
        cleaned
    }
}
