//! Sentinel line format written into a mailbox file after its content has
//! been consumed. A sentinel is semantically "empty" and must never be
//! re-forwarded.

pub const SENTINEL_PREFIX: &str = "<!-- MAILBOX:SENT v1";

/// True if `text`'s trimmed content is exactly one sentinel comment line.
pub fn is_sentinel_text(text: &str) -> bool {
    let s = text.trim();
    if s.is_empty() {
        return false;
    }
    s.starts_with(SENTINEL_PREFIX) && s.ends_with("-->") && !s.contains('\n')
}

/// Compose the single-line sentinel comment, e.g.
/// `<!-- MAILBOX:SENT v1 ts=2025-10-17T06:15:22Z eid=a1b2c3d4 sha=7c45dead route=PeerB→PeerA -->`
pub fn compose_sentinel(ts: &str, eid: &str, sha8: &str, route: &str) -> String {
    format!("{SENTINEL_PREFIX} ts={ts} eid={eid} sha={sha8} route={route} -->")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let line = compose_sentinel("2025-10-17T06:15:22Z", "a1b2c3d4e5f6", "7c45dead", "PeerB→PeerA");
        assert!(is_sentinel_text(&line));
    }

    #[test]
    fn rejects_multiline() {
        let line = format!("{SENTINEL_PREFIX} ts=x eid=y sha=z route=a -->\nextra");
        assert!(!is_sentinel_text(&line));
    }

    #[test]
    fn rejects_plain_text() {
        assert!(!is_sentinel_text("just some message"));
    }
}
