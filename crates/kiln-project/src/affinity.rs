//! Single-writer affinity token
//!
//! The project tree is not safe for concurrent mutation. Every mutating or
//! build-driving call runs while one [`AffinityGuard`] is alive; the mutator
//! takes the guard by reference so the requirement is checked at compile time.
//! A guard only proves that *some* token is held. A mutator bound to a token with
//! `with_affinity` also checks that the guard came from that token ([`AffinityToken::owns`]).

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Non-reentrant execution lock over one project
#[derive(Debug, Clone, Default)]
pub struct AffinityToken {
    lock: Arc<Mutex<()>>,
}

/// Proof that the holder has exclusive access to the project
#[derive(Debug)]
pub struct AffinityGuard {
    guard: OwnedMutexGuard<()>,
}

impl AffinityToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire without waiting; `None` if another holder is active
    pub fn try_acquire(&self) -> Option<AffinityGuard> {
        self.lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| AffinityGuard { guard })
    }

    /// Wait until the current holder releases the token
    pub async fn acquire(&self) -> AffinityGuard {
        AffinityGuard {
            guard: self.lock.clone().lock_owned().await,
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Whether `guard` was acquired from this token or one of its clones
    pub fn owns(&self, guard: &AffinityGuard) -> bool {
        Arc::ptr_eq(&self.lock, OwnedMutexGuard::mutex(&guard.guard))
    }
}
