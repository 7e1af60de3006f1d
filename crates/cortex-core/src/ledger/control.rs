//! Control requests enqueued on a ledger by external authorities.
//!
//! The ledger is owned exclusively by its episode's worker; the integrity
//! overlay never mutates it directly. Instead it clones a [`LedgerControl`]
//! handle and enqueues requests, which the ledger drains at its next
//! mutation point.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::state::SafeMode;

/// A request for the ledger to process at its next drain point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Revoke a token by id.
    RevokeToken {
        /// The token to revoke.
        token_id: String,
        /// Why it is being revoked.
        reason: String,
    },
    /// Revoke every active token.
    RevokeAllTokens {
        /// Why they are being revoked.
        reason: String,
    },
    /// Transition the episode's safe mode.
    SetSafeMode {
        /// The new mode.
        mode: SafeMode,
        /// Why the mode is changing.
        reason: String,
    },
}

/// Cloneable handle for enqueueing control requests on a ledger.
#[derive(Debug, Clone, Default)]
pub struct LedgerControl {
    queue: Arc<Mutex<VecDeque<ControlRequest>>>,
}

impl LedgerControl {
    /// Creates an empty control queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ControlRequest>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueues a token revocation.
    pub fn revoke_token(&self, token_id: impl Into<String>, reason: impl Into<String>) {
        self.lock().push_back(ControlRequest::RevokeToken {
            token_id: token_id.into(),
            reason: reason.into(),
        });
    }

    /// Enqueues revocation of every active token.
    pub fn revoke_all_tokens(&self, reason: impl Into<String>) {
        self.lock().push_back(ControlRequest::RevokeAllTokens {
            reason: reason.into(),
        });
    }

    /// Enqueues a safe-mode transition.
    pub fn set_safe_mode(&self, mode: SafeMode, reason: impl Into<String>) {
        self.lock().push_back(ControlRequest::SetSafeMode {
            mode,
            reason: reason.into(),
        });
    }

    /// Drains all pending requests in arrival order.
    #[must_use]
    pub fn drain(&self) -> Vec<ControlRequest> {
        self.lock().drain(..).collect()
    }

    /// Returns true when no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
