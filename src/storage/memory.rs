use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::models::TravelEntry;
use crate::storage::{check_owner, upsert, TravelEntryStore};
use crate::utils::TravelError;

#[derive(Debug, Default)]
pub struct InMemoryEntryStore {
    entries: Mutex<HashMap<String, Vec<TravelEntry>>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TravelEntryStore for InMemoryEntryStore {
    fn get(&self, user_id: &str) -> Result<Vec<TravelEntry>, TravelError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(user_id).cloned().unwrap_or_default())
    }

    fn put(&self, entry: TravelEntry) -> Result<(), TravelError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        upsert(entries.entry(entry.user_id.clone()).or_default(), entry);
        Ok(())
    }

    fn put_all(&self, user_id: &str, batch: Vec<TravelEntry>) -> Result<(), TravelError> {
        check_owner(user_id, &batch)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = entries.entry(user_id.to_string()).or_default();
        for entry in batch {
            upsert(stored, entry);
        }
        Ok(())
    }
}
