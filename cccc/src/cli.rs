//! Command-line arguments for the `cccc` orchestrator binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cccc")]
#[command(about = "Runs the peer mailbox/delivery/handoff orchestrator loop")]
pub struct Args {
    /// Project home directory (holds `mailbox/`, `state/`, `settings/`).
    #[arg(long, env = "CCCC_HOME", default_value = ".")]
    pub home: PathBuf,

    /// Session identifier reported in `status.json`.
    #[arg(long, env = "CCCC_SESSION", default_value = "default")]
    pub session: String,

    /// tmux pane target for PeerA (e.g. `cccc:0.0`).
    #[arg(long, env = "CCCC_PANE_PEER_A")]
    pub pane_peer_a: Option<String>,

    /// tmux pane target for PeerB (e.g. `cccc:0.1`).
    #[arg(long, env = "CCCC_PANE_PEER_B")]
    pub pane_peer_b: Option<String>,

    /// Orchestrator tick interval in milliseconds.
    #[arg(long, env = "CCCC_TICK_MS", default_value_t = 200)]
    pub tick_ms: u64,

    /// Allow the foreman scheduler to be enabled for this session.
    #[arg(long, env = "CCCC_FOREMAN_ALLOWED", default_value_t = false)]
    pub foreman_allowed: bool,

    /// Require an explicit ACK before flushing the next queued message.
    #[arg(long, env = "CCCC_REQUIRE_ACK", default_value_t = false)]
    pub require_ack: bool,
}

impl Args {
    pub fn settings_dir(&self) -> PathBuf {
        self.home.join("settings")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home.join("state")
    }

    pub fn commands_path(&self) -> PathBuf {
        self.state_dir().join("commands.jsonl")
    }
}
