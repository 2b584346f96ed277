//! Local record store.
//!
//! Every operation reads the whole collection, modifies it and writes it back
//! under a single key. Callers get "last write wins" for the whole collection
//! and nothing finer, which is why only the sync engine writes to it.

use stockpile_engine::{Error, Record, RecordId, Result};

use crate::storage::BlobStorage;

/// Key holding the serialized record collection.
pub const ITEMS_KEY: &str = "items";

/// Key holding the validator of the last full fetch.
pub const LAST_MODIFIED_KEY: &str = "lastModified";

/// Ordered collection of records persisted in a [`BlobStorage`].
#[derive(Debug)]
pub struct ItemStore<S> {
    storage: S,
}

impl<S: BlobStorage> ItemStore<S> {
    /// Wrap a storage backend.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Generate a provisional id for a record created locally.
    pub fn provisional_id() -> RecordId {
        uuid::Uuid::new_v4().to_string()
    }

    /// Get all records in store order.
    pub fn get_all(&self) -> Result<Vec<Record>> {
        let Some(raw) = self.storage.get(ITEMS_KEY)? else {
            return Ok(Vec::new());
        };
        let items: Option<Vec<Record>> = serde_json::from_str(&raw)
            .map_err(|e| Error::Persistence(format!("corrupt item collection: {}", e)))?;
        Ok(items.unwrap_or_default())
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        Ok(self
            .get_all()?
            .into_iter()
            .find(|record| record.id() == Some(id)))
    }

    /// Append a record.
    ///
    /// A record without an id receives a provisional id and version 1.
    /// Returns the stored record, or `None` if the id is already taken.
    pub fn create(&self, record: Record) -> Result<Option<Record>> {
        let mut items = self.get_all()?;

        let mut record = record;
        match record.id() {
            Some(id) if items.iter().any(|r| r.id() == Some(id)) => return Ok(None),
            Some(_) => {}
            None => {
                record.id = Some(Self::provisional_id());
                record.version = 1;
            }
        }

        items.push(record.clone());
        self.write_all(&items)?;
        tracing::debug!(record_id = ?record.id, count = items.len(), "Created local record");

        Ok(Some(record))
    }

    /// Replace the record with the same id. Returns `false` if absent.
    pub fn update(&self, record: &Record) -> Result<bool> {
        let Some(id) = record.id() else {
            return Ok(false);
        };
        let mut items = self.get_all()?;
        let Some(slot) = items.iter_mut().find(|r| r.id() == Some(id)) else {
            return Ok(false);
        };

        *slot = record.clone();
        self.write_all(&items)?;
        Ok(true)
    }

    /// Remove a record by id. Returns `false` if absent.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut items = self.get_all()?;
        let before = items.len();
        items.retain(|r| r.id() != Some(id));
        if items.len() == before {
            return Ok(false);
        }

        self.write_all(&items)?;
        tracing::debug!(record_id = %id, "Removed local record");
        Ok(true)
    }

    /// Check whether a record with this id exists.
    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Replace the whole collection.
    pub fn replace_all(&self, items: &[Record]) -> Result<()> {
        self.write_all(items)
    }

    /// Validator of the last complete fetch, for conditional requests.
    pub fn last_modified(&self) -> Result<Option<String>> {
        let Some(raw) = self.storage.get(LAST_MODIFIED_KEY)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map_err(|e| Error::Persistence(format!("corrupt fetch validator: {}", e)))
    }

    /// Store or clear the fetch validator.
    pub fn set_last_modified(&self, value: Option<&str>) -> Result<()> {
        let raw = serde_json::to_string(&value)
            .map_err(|e| Error::Persistence(format!("cannot encode fetch validator: {}", e)))?;
        self.storage.set(LAST_MODIFIED_KEY, &raw)
    }

    fn write_all(&self, items: &[Record]) -> Result<()> {
        let raw = serde_json::to_string(items)
            .map_err(|e| Error::Persistence(format!("cannot encode item collection: {}", e)))?;
        self.storage.set(ITEMS_KEY, &raw)
    }
}
