//! C2 — Pane Driver: attaches to a named tmux pane, captures its buffer, and
//! injects text via paste-buffer or send-keys. Every call shells out to the
//! `tmux` binary; there is no terminal emulation here.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::warn;

use super::pty_fallback::{normalize_mirror_output, synthesize_dsr_reply};
use crate::config::PaneProfile;
use crate::error::{CcccError, Result};

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[.*?m|\x1b\[?[\d;]*[A-Za-z]").expect("static regex"));

async fn run_tmux(args: &[&str]) -> Result<(bool, String, String)> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(|e| CcccError::PaneDriver(format!("failed to spawn tmux: {e}")))?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// If the raw capture contains a cursor-position query a PTY-hosted CLI is
/// waiting on, write the synthetic reply back so it doesn't stall. Pane
/// output normally never contains this (tmux answers DSR itself), but some
/// CLIs poll it directly when they detect they aren't attached to a real
/// terminal.
async fn answer_dsr_query_if_present(pane: &str, raw: &str) {
    if let Some(reply) = synthesize_dsr_reply(raw.as_bytes()) {
        let text = String::from_utf8_lossy(reply);
        let _ = run_tmux(&["send-keys", "-t", pane, "-l", &text]).await;
    }
}

/// Capture the last `lines` lines of `pane`'s scrollback: alt-screen/cursor
/// escapes and dimmed/bright-black SGR styling normalized, then ANSI codes
/// stripped.
pub async fn capture_pane(pane: &str, lines: usize) -> String {
    let scroll = format!("-{lines}");
    match run_tmux(&["capture-pane", "-t", pane, "-p", "-S", &scroll]).await {
        Ok((true, out, _)) => {
            answer_dsr_query_if_present(pane, &out).await;
            let normalized = normalize_mirror_output(&out);
            ANSI_RE.replace_all(&normalized, "").into_owned()
        }
        Ok((false, _, err)) => {
            warn!(pane, error = %err, "tmux capture-pane failed");
            String::new()
        }
        Err(e) => {
            warn!(pane, error = %e, "tmux capture-pane errored");
            String::new()
        }
    }
}

async fn cancel_copy_mode_if_needed(pane: &str) {
    if let Ok((true, out, _)) = run_tmux(&["display-message", "-p", "-t", pane, "#{pane_in_mode}"]).await {
        let flag = out.trim();
        if flag == "1" || flag == "on" || flag == "yes" {
            let _ = run_tmux(&["send-keys", "-t", pane, "-X", "cancel"]).await;
        }
    }
}

/// Paste `text` into `pane` via the tmux buffer, then submit with
/// `profile.post_paste_keys`.
pub async fn paste_to_pane(pane: &str, text: &str, profile: &PaneProfile) -> Result<()> {
    cancel_copy_mode_if_needed(pane).await;

    let tmp = tempfile::NamedTempFile::new().map_err(|e| CcccError::PaneDriver(format!("tempfile: {e}")))?;
    std::fs::write(tmp.path(), text).map_err(|e| CcccError::io(tmp.path(), e))?;
    let fname = tmp.path().to_string_lossy().into_owned();

    let buf = format!(
        "buf-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    );
    run_tmux(&["load-buffer", "-b", &buf, &fname]).await?;
    run_tmux(&["paste-buffer", "-p", "-t", pane, "-b", &buf]).await?;
    sleep(Duration::from_millis(150)).await;
    for key in &profile.post_paste_keys {
        run_tmux(&["send-keys", "-t", pane, key]).await?;
    }
    run_tmux(&["delete-buffer", "-b", &buf]).await?;
    Ok(())
}

/// Send `text` line by line via `send-keys -l`, submitting per `profile`.
pub async fn type_to_pane(pane: &str, text: &str, profile: &PaneProfile) -> Result<()> {
    cancel_copy_mode_if_needed(pane).await;

    let line_send_key = profile
        .line_send_key
        .clone()
        .unwrap_or_else(|| profile.send_sequence.clone());

    let lines: Vec<&str> = text.lines().collect();
    let last_index = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        run_tmux(&["send-keys", "-t", pane, "-l", line]).await?;
        let is_last = i == last_index;
        if !is_last {
            run_tmux(&["send-keys", "-t", pane, &profile.compose_newline_key]).await?;
        } else if profile.type_send_at_end {
            run_tmux(&["send-keys", "-t", pane, &profile.send_sequence]).await?;
        } else {
            run_tmux(&["send-keys", "-t", pane, &line_send_key]).await?;
        }

        if profile.chunk_lines > 0 && (i + 1) % profile.chunk_lines == 0 {
            sleep(Duration::from_millis(profile.chunk_delay_ms)).await;
        }
    }
    Ok(())
}

/// Dispatch to [`paste_to_pane`] or [`type_to_pane`] per `profile.input_mode`.
pub async fn send_text(pane: &str, text: &str, profile: &PaneProfile) -> Result<()> {
    if profile.input_mode == "type" {
        type_to_pane(pane, text, profile).await
    } else {
        paste_to_pane(pane, text, profile).await
    }
}

pub async fn send_ctrl_c(pane: &str) -> Result<()> {
    run_tmux(&["send-keys", "-t", pane, "C-c"]).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_escapes() {
        let raw = "\x1b[31mred\x1b[0m plain";
        let cleaned = ANSI_RE.replace_all(raw, "");
        assert_eq!(cleaned, "red plain");
    }
}
