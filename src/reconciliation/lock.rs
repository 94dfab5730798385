use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use log::debug;

use crate::utils::TravelError;

/// Per-user reconciliation locks. Different users never contend.
#[derive(Debug, Default)]
pub struct UserLocks {
    held: Mutex<HashSet<String>>,
}

/// Releases the user's lock when dropped.
#[derive(Debug)]
pub struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user_id: String,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails at once with `ReconciliationInProgress` if the user is already locked.
    pub fn try_acquire(&self, user_id: &str) -> Result<UserLockGuard<'_>, TravelError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(user_id.to_string()) {
            return Err(TravelError::ReconciliationInProgress(user_id.to_string()));
        }
        debug!("Acquired reconciliation lock for {}", user_id);
        Ok(UserLockGuard {
            locks: self,
            user_id: user_id.to_string(),
        })
    }
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
        debug!("Released reconciliation lock for {}", self.user_id);
    }
}
