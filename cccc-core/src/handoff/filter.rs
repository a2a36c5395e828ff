//! Low-signal filter gating peer-to-peer forwarding. Kept pluggable per the
//! open design question of whether forwarding policy should be
//! data-driven; the default implementation is a minimal length/cooldown
//! heuristic, not a hard requirement.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::Peer;

/// Tunable knobs for [`HandoffFilter`].
#[derive(Clone, Copy, Debug)]
pub struct FilterConfig {
    pub min_chars: usize,
    pub cooldown_seconds: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_chars: 4,
            cooldown_seconds: 0.0,
        }
    }
}

/// Decides whether a `to_peer` payload should actually cross to the other
/// peer, or be dropped as low-signal noise.
pub struct HandoffFilter {
    config: FilterConfig,
    last_forward: HashMap<Peer, Instant>,
}

impl HandoffFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            last_forward: HashMap::new(),
        }
    }

    /// `from` is the peer that produced `payload`; `override_enabled` lets a
    /// caller (e.g. an explicit user command) bypass the cooldown/length
    /// checks entirely.
    pub fn should_forward(&mut self, from: Peer, payload: &str, override_enabled: bool) -> bool {
        if override_enabled {
            self.last_forward.insert(from, Instant::now());
            return true;
        }

        let trimmed = payload.trim();
        if trimmed.chars().count() < self.config.min_chars {
            return false;
        }

        if self.config.cooldown_seconds > 0.0 {
            if let Some(last) = self.last_forward.get(&from) {
                if last.elapsed() < Duration::from_secs_f64(self.config.cooldown_seconds) {
                    return false;
                }
            }
        }

        self.last_forward.insert(from, Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_short_payloads() {
        let mut filter = HandoffFilter::new(FilterConfig::default());
        assert!(!filter.should_forward(Peer::PeerA, "ok", false));
    }

    #[test]
    fn accepts_substantive_payloads() {
        let mut filter = HandoffFilter::new(FilterConfig::default());
        assert!(filter.should_forward(Peer::PeerA, "please review the attached patch", false));
    }

    #[test]
    fn override_bypasses_length_check() {
        let mut filter = HandoffFilter::new(FilterConfig::default());
        assert!(filter.should_forward(Peer::PeerA, "ok", true));
    }

    #[test]
    fn cooldown_blocks_rapid_repeats() {
        let mut filter = HandoffFilter::new(FilterConfig {
            min_chars: 0,
            cooldown_seconds: 60.0,
        });
        assert!(filter.should_forward(Peer::PeerA, "first message here", false));
        assert!(!filter.should_forward(Peer::PeerA, "second message here", false));
    }
}
