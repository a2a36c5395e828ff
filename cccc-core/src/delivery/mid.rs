//! MID/TS stamping: every outbound message carries a `[MID: ...]` token for
//! ACK correlation and a `[TS: ...]` line directly beneath it.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// `cccc-<unix>-<6hex>`, matching the original token shape so external
/// tooling that greps for it keeps working.
pub fn new_mid() -> String {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let hex = Uuid::new_v4().simple().to_string();
    format!("cccc-{unix}-{}", &hex[..6])
}

static OPENING_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(\s*(TO_PEER|FROM_USER|FROM_PeerA|FROM_PeerB|FROM_SYSTEM)\s*)>").expect("static regex")
});

/// Insert `[MID: <mid>]` as the first line inside the payload's outermost
/// recognized opening tag, or prefix it if no such tag is present.
pub fn wrap_with_mid(payload: &str, mid: &str) -> String {
    let marker = format!("[MID: {mid}]");
    if let Some(m) = OPENING_TAG_RE.find(payload) {
        let end = m.end();
        format!("{}\n{}{}", &payload[..end], marker, &payload[end..])
    } else {
        format!("{marker}\n{payload}")
    }
}

/// `[TS: YYYY-MM-DD HH:MM:SS <tzname> (UTC±hh:mm)]`
pub fn format_local_ts() -> String {
    let now = Local::now();
    let offset = now.offset().local_minus_utc();
    let sign = if offset >= 0 { '+' } else { '-' };
    let abs = offset.unsigned_abs();
    format!(
        "{} (UTC{sign}{:02}:{:02})",
        now.format("%Y-%m-%d %H:%M:%S %Z"),
        abs / 3600,
        (abs % 3600) / 60
    )
}

/// Insert a `[TS: ...]` line right after the first `[MID: ...]` line, unless
/// one is already present.
pub fn inject_ts_after_mid(payload: &str) -> String {
    if payload.contains("[TS:") {
        return payload.to_string();
    }
    let ts_line = format!("[TS: {}]", format_local_ts());
    let mut lines: Vec<&str> = payload.lines().collect();
    if let Some(pos) = lines.iter().position(|l| l.trim_start().starts_with("[MID:")) {
        lines.insert(pos + 1, ts_line.as_str());
        return lines.join("\n");
    }
    format!("{ts_line}\n{payload}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mid_has_expected_shape() {
        let mid = new_mid();
        assert!(mid.starts_with("cccc-"));
        let parts: Vec<&str> = mid.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn wraps_inside_outermost_tag() {
        let payload = "<TO_PEER>\nDo X\n</TO_PEER>\n";
        let wrapped = wrap_with_mid(payload, "cccc-1-abcdef");
        assert_eq!(wrapped, "<TO_PEER>\n[MID: cccc-1-abcdef]\nDo X\n</TO_PEER>\n");
    }

    #[test]
    fn prefixes_when_no_tag_present() {
        let wrapped = wrap_with_mid("plain body", "cccc-1-abcdef");
        assert_eq!(wrapped, "[MID: cccc-1-abcdef]\nplain body");
    }

    #[test]
    fn injects_ts_after_mid_line() {
        let payload = "<TO_PEER>\n[MID: cccc-1-abcdef]\nDo X\n</TO_PEER>\n";
        let injected = inject_ts_after_mid(payload);
        let lines: Vec<&str> = injected.lines().collect();
        assert!(lines[2].starts_with("[TS: "));
    }

    #[test]
    fn does_not_double_inject_ts() {
        let payload = "[MID: x]\n[TS: already-here]\nbody";
        assert_eq!(inject_ts_after_mid(payload), payload);
    }
}
