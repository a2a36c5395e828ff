//! C3 — Idle Judge: classifies a pane as idle or busy from its recent buffer
//! using regex plus a quiet-interval heuristic.

use std::time::Instant;

use regex::RegexBuilder;
use tracing::debug;

use crate::config::PaneProfile;

use super::driver::capture_pane;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleReason {
    BusyRegex,
    PromptAndQuiet,
    PromptButNoisy,
    QuietOnly,
    Changing,
}

impl IdleReason {
    pub fn is_idle(self) -> bool {
        matches!(self, IdleReason::PromptAndQuiet | IdleReason::QuietOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IdleReason::BusyRegex => "busy_regex",
            IdleReason::PromptAndQuiet => "prompt+quiet",
            IdleReason::PromptButNoisy => "prompt-but-noisy",
            IdleReason::QuietOnly => "quiet-only",
            IdleReason::Changing => "changing",
        }
    }
}

/// Stateful idle classifier for a single pane. One instance should be reused
/// across ticks so the "static for N seconds" window is meaningful.
pub struct PaneIdleJudge {
    prompt_re: Option<regex::Regex>,
    busy_res: Vec<regex::Regex>,
    quiet_seconds: f64,
    last_snapshot: String,
    last_change: Instant,
}

impl PaneIdleJudge {
    pub fn new(profile: &PaneProfile) -> Self {
        let prompt_re = profile.prompt_regex.as_ref().and_then(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| debug!(pattern = %p, error = %e, "invalid prompt_regex"))
                .ok()
        });
        let busy_res = profile
            .busy_regexes
            .iter()
            .filter_map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| debug!(pattern = %p, error = %e, "invalid busy_regex"))
                    .ok()
            })
            .collect();
        Self {
            prompt_re,
            busy_res,
            quiet_seconds: profile.idle_quiet_seconds,
            last_snapshot: String::new(),
            last_change: Instant::now(),
        }
    }

    /// Recapture `pane` and re-evaluate the idle decision tree.
    pub async fn refresh(&mut self, pane: &str) -> IdleReason {
        let text = capture_pane(pane, 1200).await;
        if text != self.last_snapshot {
            self.last_snapshot = text.clone();
            self.last_change = Instant::now();
        }

        let tail: String = text
            .lines()
            .rev()
            .take(30)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");

        if self.busy_res.iter().any(|rx| rx.is_match(&tail)) {
            return IdleReason::BusyRegex;
        }

        let quiet_for = self.last_change.elapsed().as_secs_f64();

        if let Some(rx) = &self.prompt_re {
            if rx.is_match(&tail) {
                return if quiet_for >= self.quiet_seconds {
                    IdleReason::PromptAndQuiet
                } else {
                    IdleReason::PromptButNoisy
                };
            }
        }

        if quiet_for >= self.quiet_seconds {
            IdleReason::QuietOnly
        } else {
            IdleReason::Changing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_reasons_map_to_idle_flag() {
        assert!(IdleReason::PromptAndQuiet.is_idle());
        assert!(IdleReason::QuietOnly.is_idle());
        assert!(!IdleReason::BusyRegex.is_idle());
        assert!(!IdleReason::PromptButNoisy.is_idle());
        assert!(!IdleReason::Changing.is_idle());
    }
}
