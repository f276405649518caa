use std::time::Instant;

/// Where a lockstep session stands.
///
/// ```text
/// Connecting ──▶ Synced ⇄ Waiting
///      │            │        │
///      └────────────┴────────┴──▶ Disconnected
/// ```
///
/// `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Linked, but no tick has executed yet.
    Connecting,
    Synced,
    /// A batch for the next tick is missing since `since`.
    Waiting { since: Instant },
    Disconnected,
}

impl SessionState {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Synced => "synced",
            Self::Waiting { .. } => "waiting",
            Self::Disconnected => "disconnected",
        }
    }
}
