//! Lifecycle token of the requesting client
//!
//! A vibration is bound to the token of the client that asked for it. When the
//! client goes away the token is killed and every linked [`DeathRecipient`]
//! is notified once.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Notified when the linked token dies
pub trait DeathRecipient: Send + Sync {
    fn binder_died(&self);
}

/// Registration handle returned by [`LifecycleToken::link_to_death`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkId(u64);

#[derive(Default)]
struct TokenState {
    dead: bool,
    next_link: u64,
    recipients: Vec<(LinkId, Arc<dyn DeathRecipient>)>,
}

/// Cloneable handle to one client's lifetime
#[derive(Clone, Default)]
pub struct LifecycleToken {
    state: Arc<Mutex<TokenState>>,
}

impl LifecycleToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        !self.lock().dead
    }

    /// Register a recipient, failing if the token is already dead
    pub fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>) -> Result<LinkId, TokenError> {
        let mut state = self.lock();
        if state.dead {
            return Err(TokenError::Dead);
        }
        state.next_link += 1;
        let id = LinkId(state.next_link);
        state.recipients.push((id, recipient));
        Ok(id)
    }

    /// Remove a recipient; unknown ids are ignored
    pub fn unlink_to_death(&self, id: LinkId) {
        self.lock().recipients.retain(|(link, _)| *link != id);
    }

    /// Mark the client dead and notify every linked recipient
    pub fn kill(&self) {
        let recipients = {
            let mut state = self.lock();
            if state.dead {
                return;
            }
            state.dead = true;
            std::mem::take(&mut state.recipients)
        };
        tracing::debug!(recipients = recipients.len(), "Lifecycle token died");
        for (_, recipient) in recipients {
            recipient.binder_died();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for LifecycleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("LifecycleToken")
            .field("dead", &state.dead)
            .field("recipients", &state.recipients.len())
            .finish()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Token linking error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The client died before the link was made
    Dead,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Dead => write!(f, "Lifecycle token is already dead"),
        }
    }
}

impl std::error::Error for TokenError {}

// ============================================================================
// Tests
// ============================================================================
