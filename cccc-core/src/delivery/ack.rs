//! ACK/NACK token detection in captured pane output.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static SYS_NOTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<SYSTEM_NOTES>(.*?)</SYSTEM_NOTES>").expect("static regex"));
static ACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|;|\s)ack:\s*([A-Za-z0-9\-._:]+)").expect("static regex"));
static NACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|;|\s)nack:\s*([A-Za-z0-9\-._:]+)").expect("static regex"));
static ANY_ACK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|\s|\[)ack:\s*([A-Za-z0-9\-._:]+)").expect("static regex"));

/// Scan `output` for ACK/NACK tokens: preferring ones inside
/// `<SYSTEM_NOTES>...</SYSTEM_NOTES>`, falling back to a bare `ack: <token>`
/// anywhere in the buffer since some CLIs omit the wrapper.
pub fn find_acks_from_output(output: &str) -> (HashSet<String>, HashSet<String>) {
    let mut acks = HashSet::new();
    let mut nacks = HashSet::new();

    for caps in SYS_NOTES_RE.captures_iter(output) {
        let note = &caps[1];
        for m in ACK_RE.captures_iter(note) {
            acks.insert(m[1].to_string());
        }
        for m in NACK_RE.captures_iter(note) {
            nacks.insert(m[1].to_string());
        }
    }

    for m in ANY_ACK_RE.captures_iter(output) {
        acks.insert(m[1].to_string());
    }

    (acks, nacks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_ack_inside_system_notes() {
        let out = "noise\n<SYSTEM_NOTES>ack: cccc-1-abcdef</SYSTEM_NOTES>\nmore";
        let (acks, nacks) = find_acks_from_output(out);
        assert!(acks.contains("cccc-1-abcdef"));
        assert!(nacks.is_empty());
    }

    #[test]
    fn finds_bare_ack_outside_system_notes() {
        let out = "the assistant printed ack: cccc-2-beadfe somewhere";
        let (acks, _) = find_acks_from_output(out);
        assert!(acks.contains("cccc-2-beadfe"));
    }

    #[test]
    fn finds_nack_with_reason_trailing() {
        let out = "<SYSTEM_NOTES>nack: cccc-3-111111; reason=rejected</SYSTEM_NOTES>";
        let (_, nacks) = find_acks_from_output(out);
        assert!(nacks.contains("cccc-3-111111"));
    }
}
