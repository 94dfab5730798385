//! Collaborators the engine talks to: where travel entries live and where
//! scanned documents come from.

pub mod documents;
pub mod json_file;
pub mod memory;

pub use documents::{mime_type_for_path, DocumentSource, FsDocumentSource};
pub use json_file::JsonFileEntryStore;
pub use memory::InMemoryEntryStore;

use crate::models::TravelEntry;
use crate::utils::TravelError;

/// Durable travel entries keyed by user. A `put` is visible to the next `get`.
pub trait TravelEntryStore: Send + Sync {
    /// The user's entries ordered by departure date; empty for an unknown user.
    fn get(&self, user_id: &str) -> Result<Vec<TravelEntry>, TravelError>;

    /// Stores the whole record, replacing any record with the same id.
    fn put(&self, entry: TravelEntry) -> Result<(), TravelError>;

    /// Stores every entry of one user or none of them.
    fn put_all(&self, user_id: &str, entries: Vec<TravelEntry>) -> Result<(), TravelError>;
}

pub(crate) fn check_owner(user_id: &str, entries: &[TravelEntry]) -> Result<(), TravelError> {
    match entries.iter().find(|e| e.user_id != user_id) {
        Some(stray) => Err(TravelError::Storage(format!(
            "Entry {} belongs to {}, not {}",
            stray.id, stray.user_id, user_id
        ))),
        None => Ok(()),
    }
}

pub(crate) fn upsert(entries: &mut Vec<TravelEntry>, entry: TravelEntry) {
    match entries.iter_mut().find(|e| e.id == entry.id) {
        Some(slot) => *slot = entry,
        None => entries.push(entry),
    }
    entries.sort_by(|a, b| a.departure_date.cmp(&b.departure_date).then(a.id.cmp(&b.id)));
}
