//! Persistence collaborators.
//!
//! Workers hand every processed record to a `RecordStore`, successful or
//! not. `FileStore` writes one file per domain and `MemoryStore` keeps
//! everything in memory for embedding and tests.

use crate::error::ProxyWhoisError;
use crate::types::WhoisRecord;
use crate::utils::validate_domain;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Persists the current state of a record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn persist(&self, record: &WhoisRecord) -> Result<(), ProxyWhoisError>;
}

/// Writes `<output_dir>/<DOMAIN>` with the raw WHOIS text.
///
/// Files are written to a temporary file and renamed into place, so a
/// reader never observes a partial record and rewriting identical data is
/// harmless. Records without data leave any existing file untouched. With
/// `audit` enabled, `<DOMAIN>.json` holds the serialized record. Names that
/// are not valid domains are refused, so nothing lands outside `output_dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    output_dir: PathBuf,
    audit: bool,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
            audit: false,
        }
    }

    pub fn with_audit(mut self, enabled: bool) -> Self {
        self.audit = enabled;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the raw data file for a domain.
    pub fn data_path(&self, domain: &str) -> PathBuf {
        self.output_dir.join(domain)
    }

    /// Path of the audit file for a domain.
    pub fn audit_path(&self, domain: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", domain))
    }

    fn write_atomic(dir: &Path, target: &Path, contents: &[u8]) -> std::io::Result<()> {
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(contents)?;
        file.as_file().sync_all()?;
        file.persist(target).map_err(|e| e.error)?;
        Ok(())
    }

    fn persist_blocking(&self, record: &WhoisRecord) -> Result<(), ProxyWhoisError> {
        let domain = record.domain();
        let to_store_error = |e: std::io::Error| ProxyWhoisError::store(domain, e.to_string());

        validate_domain(domain).map_err(|e| ProxyWhoisError::store(domain, e.to_string()))?;
        fs::create_dir_all(&self.output_dir).map_err(to_store_error)?;

        if let Some(data) = record.data() {
            Self::write_atomic(&self.output_dir, &self.data_path(domain), data.as_bytes())
                .map_err(to_store_error)?;
        }

        if self.audit {
            let json = serde_json::to_vec_pretty(record)
                .map_err(|e| ProxyWhoisError::store(domain, e.to_string()))?;
            Self::write_atomic(&self.output_dir, &self.audit_path(domain), &json)
                .map_err(to_store_error)?;
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn persist(&self, record: &WhoisRecord) -> Result<(), ProxyWhoisError> {
        let store = self.clone();
        let record = record.clone();
        let domain = record.domain().to_string();
        tokio::task::spawn_blocking(move || store.persist_blocking(&record))
            .await
            .map_err(|e| ProxyWhoisError::store(domain, format!("writer task failed: {}", e)))?
    }
}

/// Keeps the latest state of every record in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, WhoisRecord>>,
    writes: Mutex<HashMap<String, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest persisted state for a (normalized) domain.
    pub fn get(&self, domain: &str) -> Option<WhoisRecord> {
        self.records.lock().ok()?.get(domain).cloned()
    }

    /// How many times a domain was persisted.
    pub fn persist_count(&self, domain: &str) -> usize {
        self.writes
            .lock()
            .ok()
            .and_then(|w| w.get(domain).copied())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn persist(&self, record: &WhoisRecord) -> Result<(), ProxyWhoisError> {
        let domain = record.domain().to_string();
        self.records
            .lock()
            .map_err(|_| ProxyWhoisError::store(&domain, "record map lock poisoned"))?
            .insert(domain.clone(), record.clone());
        *self
            .writes
            .lock()
            .map_err(|_| ProxyWhoisError::store(&domain, "write counter lock poisoned"))?
            .entry(domain)
            .or_insert(0) += 1;
        Ok(())
    }
}
