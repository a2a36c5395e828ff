//! PTY fallback used when the CLI is hosted directly under a raw PTY adapter
//! instead of a tmux pane: keeps TUIs that poll the cursor position from
//! blocking, and tidies mirrored output for log readability.

use once_cell::sync::Lazy;
use regex::Regex;

const DSR_QUERY: &[u8] = b"\x1b[6n";
const DSR_REPLY: &[u8] = b"\x1b[1;1R";

/// If `chunk` contains a device-status-report cursor query, the synthetic
/// reply CCCC should write back so the child doesn't stall waiting for a
/// real terminal to answer.
pub fn synthesize_dsr_reply(chunk: &[u8]) -> Option<&'static [u8]> {
    if chunk.windows(DSR_QUERY.len()).any(|w| w == DSR_QUERY) {
        Some(DSR_REPLY)
    } else {
        None
    }
}

static ALT_SCREEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[\?1049[hl]|\x1b\[\?47[hl]").expect("static regex"));
static CURSOR_POS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[\d*;\d*[Hf]|\x1b\[\d*[ABCD]").expect("static regex"));
static SGR_DIM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[2m").expect("static regex"));
static SGR_BRIGHT_BLACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[90m").expect("static regex"));

/// Strip alt-screen toggles and cursor-position escapes from mirrored output,
/// and normalize SGR styling (drop "dim", remap "bright black" to "white").
pub fn normalize_mirror_output(text: &str) -> String {
    let text = ALT_SCREEN_RE.replace_all(text, "");
    let text = CURSOR_POS_RE.replace_all(&text, "");
    let text = SGR_DIM_RE.replace_all(&text, "");
    SGR_BRIGHT_BLACK_RE.replace_all(&text, "\x1b[37m").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dsr_query() {
        assert_eq!(synthesize_dsr_reply(b"prefix\x1b[6nsuffix"), Some(DSR_REPLY));
        assert_eq!(synthesize_dsr_reply(b"nothing here"), None);
    }

    #[test]
    fn strips_alt_screen_and_remaps_bright_black() {
        let input = "\x1b[?1049hhello\x1b[90mdim-ish\x1b[0m\x1b[?1049l";
        let out = normalize_mirror_output(input);
        assert_eq!(out, "hello\x1b[37mdim-ish\x1b[0m");
    }
}
