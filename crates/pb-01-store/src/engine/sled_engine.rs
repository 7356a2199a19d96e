//! `sled`-backed [`KvEngine`] adapter.

use pb_shared_types::StoreError;

use crate::ports::outbound::KvEngine;

pub struct SledEngine {
    db: sled::Db,
}

impl SledEngine {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(Self { db })
    }

    /// An ephemeral, non-persistent engine for tests and examples.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(Self { db })
    }
}

impl KvEngine for SledEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .db
            .get(key)
            .map_err(|e| StoreError::Engine(e.to_string()))?
            .map(|v| v.to_vec()))
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key, value)
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db
            .remove(key)
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.db
            .scan_prefix(prefix)
            .map(|res| {
                res.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| StoreError::Engine(e.to_string()))
            })
            .collect()
    }

    fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.db
            .range(start.to_vec()..end.to_vec())
            .map(|res| {
                res.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| StoreError::Engine(e.to_string()))
            })
            .collect()
    }

    fn apply_batch(&self, writes: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (key, value) in writes {
            batch.insert(key.as_slice(), value.as_slice());
        }
        self.db
            .apply_batch(batch)
            .map_err(|e| StoreError::Engine(e.to_string()))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Engine(e.to_string()))?;
        Ok(())
    }
}
