use std::fmt;

/// The fixed two-member peer set this orchestrator couples together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Peer {
    PeerA,
    PeerB,
}

impl Peer {
    pub const ALL: [Peer; 2] = [Peer::PeerA, Peer::PeerB];

    /// The other peer in the pair.
    pub fn other(self) -> Peer {
        match self {
            Peer::PeerA => Peer::PeerB,
            Peer::PeerB => Peer::PeerA,
        }
    }

    /// Mailbox directory name (`peerA` / `peerB`), matching the on-disk layout.
    pub fn folder_name(self) -> &'static str {
        match self {
            Peer::PeerA => "peerA",
            Peer::PeerB => "peerB",
        }
    }

    /// The `FROM_PeerX` / `PeerA` label used in wrapper tags and ledger entries.
    pub fn label(self) -> &'static str {
        match self {
            Peer::PeerA => "PeerA",
            Peer::PeerB => "PeerB",
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
