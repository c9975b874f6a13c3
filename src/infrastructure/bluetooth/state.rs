//! Connection lifecycle
//!
//! ```text
//!            Connect              Settled{complete}
//!   Idle ─────────────▶ Opening ───────────────────▶ OpenCommitted
//!    ▲                    │  │                            │
//!    │  Settled{!complete}│  │ Cancel / Disconnect        │ Disconnect
//!    ├────────────────────┘  ▼                            ▼
//!    │                  OpenCanceling ──── Teardown ───▶ Closing
//!    │  Settled{!complete}    │                           │
//!    ├────────────────────────┘                           │
//!    └──────────────────── TeardownFinished ──────────────┘
//! ```
//!
//! Only one attempt or session exists at a time. Inputs that make no sense in
//! the current phase are either ignored or rejected, never silently combined.

use std::fmt;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    #[default]
    Idle,
    /// Handshake in flight.
    Opening,
    /// Handshake in flight (or settling) but the caller no longer wants it.
    OpenCanceling,
    /// Link up and fully negotiated.
    OpenCommitted,
    /// Teardown in progress.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInput {
    Connect,
    Cancel,
    /// The handshake resolved. `complete` means the live link is up and every
    /// handle was bound.
    Settled { complete: bool },
    /// Caller asked to close.
    Disconnect,
    /// Internal teardown of a canceled attempt after the settle delay.
    Teardown,
    TeardownFinished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Enter(LinkPhase),
    /// No-op in this phase.
    Ignore,
    Reject(TransportError),
}

impl LinkPhase {
    pub fn on(self, input: LinkInput) -> Step {
        use LinkInput::*;
        use LinkPhase::*;

        match (self, input) {
            (Idle, Connect) => Step::Enter(Opening),
            (Opening | OpenCanceling, Connect) => Step::Reject(TransportError::ConnectInProgress),
            (OpenCommitted | Closing, Connect) => Step::Reject(TransportError::AlreadyConnected),

            (Opening, Cancel | Disconnect) => Step::Enter(OpenCanceling),

            (Opening, Settled { complete: true }) => Step::Enter(OpenCommitted),
            (Opening | OpenCanceling, Settled { complete: false }) => Step::Enter(Idle),
            // stays put for the settle delay, then Teardown
            (OpenCanceling, Settled { complete: true }) => Step::Ignore,

            (OpenCanceling, Teardown) => Step::Enter(Closing),
            (OpenCommitted, Disconnect) => Step::Enter(Closing),
            (Closing, TeardownFinished) => Step::Enter(Idle),

            _ => Step::Ignore,
        }
    }

    pub fn is_connected(self) -> bool {
        self == LinkPhase::OpenCommitted
    }
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkPhase::Idle => "idle",
            LinkPhase::Opening => "opening",
            LinkPhase::OpenCanceling => "open-canceling",
            LinkPhase::OpenCommitted => "open",
            LinkPhase::Closing => "closing",
        };
        f.write_str(name)
    }
}
