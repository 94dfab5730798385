use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;
use tempfile::NamedTempFile;

use crate::models::TravelEntry;
use crate::storage::{check_owner, upsert, TravelEntryStore};
use crate::utils::TravelError;

/// One pretty-printed JSON array per user under a directory. Writes go through a
/// temporary file that is renamed into place, so a reader never sees half a file.
#[derive(Debug)]
pub struct JsonFileEntryStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileEntryStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, TravelError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(JsonFileEntryStore {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn user_file(&self, user_id: &str) -> Result<PathBuf, TravelError> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !user_id.starts_with('.');
        if !valid {
            return Err(TravelError::Storage(format!("Unusable user id for file store: {:?}", user_id)));
        }
        Ok(self.dir.join(format!("{}.json", user_id)))
    }

    fn read(&self, path: &Path) -> Result<Vec<TravelEntry>, TravelError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TravelEntryStore for JsonFileEntryStore {
    fn get(&self, user_id: &str) -> Result<Vec<TravelEntry>, TravelError> {
        self.read(&self.user_file(user_id)?)
    }

    fn put(&self, entry: TravelEntry) -> Result<(), TravelError> {
        let user_id = entry.user_id.clone();
        self.put_all(&user_id, vec![entry])
    }

    /// Merges the batch into the user's file and replaces it with a single rename.
    fn put_all(&self, user_id: &str, batch: Vec<TravelEntry>) -> Result<(), TravelError> {
        check_owner(user_id, &batch)?;
        let path = self.user_file(user_id)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.read(&path)?;
        let count = batch.len();
        for entry in batch {
            upsert(&mut entries, entry);
        }

        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, &entries)?;
            writer.flush()?;
        }
        temp.persist(&path)
            .map_err(|e| TravelError::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;
        debug!("Stored {} entries in {}", count, path.display());
        Ok(())
    }
}
