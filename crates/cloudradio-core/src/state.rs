//! Block lifecycle.
//!
//! ```text
//! Uninitialized ──validate──► Validated ──first work──► Streaming ──stop──► Closed
//!        │                        │                         │
//!        └────────────────────────┴─────────────────────────┴──► Failed
//! ```
//!
//! Validation is lazy: the remote destination is checked on the first work
//! call, not at construction. `Failed` and `Closed` are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockState {
    #[default]
    Uninitialized,
    Validated,
    Streaming,
    Closed,
    Failed,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Uninitialized => write!(f, "UNINITIALIZED"),
            BlockState::Validated => write!(f, "VALIDATED"),
            BlockState::Streaming => write!(f, "STREAMING"),
            BlockState::Closed => write!(f, "CLOSED"),
            BlockState::Failed => write!(f, "FAILED"),
        }
    }
}

impl BlockState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockState::Closed | BlockState::Failed)
    }

    fn allows(&self, next: BlockState) -> bool {
        use BlockState::*;
        match (self, next) {
            (Uninitialized, Validated) => true,
            (Uninitialized, Closed) => true,
            (Validated, Streaming) => true,
            (Validated, Closed) => true,
            (Streaming, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks a block's [`BlockState`] and rejects illegal steps.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: BlockState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn transition(&mut self, to: BlockState) -> Result<()> {
        if !self.state.allows(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = %self.state, to = %to, "block state transition");
        self.state = to;
        Ok(())
    }

    /// `true` once the destination has been validated and not yet closed.
    pub fn is_validated(&self) -> bool {
        matches!(self.state, BlockState::Validated | BlockState::Streaming)
    }

    /// Error unless the block may still accept work calls.
    pub fn ensure_open(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: BlockState::Streaming,
            });
        }
        Ok(())
    }

    /// Move to `Failed`; a no-op from a terminal state.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(from = %self.state, "block failed");
            self.state = BlockState::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.state(), BlockState::Uninitialized);
        lc.transition(BlockState::Validated).unwrap();
        assert!(lc.is_validated());
        lc.transition(BlockState::Streaming).unwrap();
        lc.transition(BlockState::Closed).unwrap();
        assert!(lc.state().is_terminal());
        assert!(!lc.is_validated());
    }

    #[test]
    fn test_stop_without_work() {
        let mut lc = Lifecycle::new();
        lc.transition(BlockState::Closed).unwrap();
        assert_eq!(lc.state(), BlockState::Closed);
    }

    #[test]
    fn test_cannot_stream_without_validation() {
        let mut lc = Lifecycle::new();
        let err = lc.transition(BlockState::Streaming).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: BlockState::Uninitialized,
                to: BlockState::Streaming
            }
        ));
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut lc = Lifecycle::new();
        lc.transition(BlockState::Closed).unwrap();
        assert!(lc.transition(BlockState::Validated).is_err());
        assert!(lc.transition(BlockState::Failed).is_err());
        assert!(lc.ensure_open().is_err());
    }

    #[test]
    fn test_fail_from_any_open_state() {
        for setup in [
            vec![],
            vec![BlockState::Validated],
            vec![BlockState::Validated, BlockState::Streaming],
        ] {
            let mut lc = Lifecycle::new();
            for s in setup {
                lc.transition(s).unwrap();
            }
            lc.fail();
            assert_eq!(lc.state(), BlockState::Failed);
            assert!(lc.ensure_open().is_err());
        }
    }

    #[test]
    fn test_fail_after_close_keeps_closed() {
        let mut lc = Lifecycle::new();
        lc.transition(BlockState::Closed).unwrap();
        lc.fail();
        assert_eq!(lc.state(), BlockState::Closed);
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(BlockState::Streaming.to_string(), "STREAMING");
        let json = serde_json::to_string(&BlockState::Uninitialized).unwrap();
        assert_eq!(json, "\"UNINITIALIZED\"");
    }
}
