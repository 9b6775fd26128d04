//! Local filesystem catalog store.
//!
//! The committed catalog lives in `catalog.json`. Every commit rewrites the
//! file atomically (write to temp, then rename), so a crash mid-write leaves
//! the previous catalog intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::models::JobReport;
use crate::storage::{Catalog, CatalogData, CatalogStore, TermLocks, TermTransaction};

const CATALOG_FILE: &str = "catalog.json";
const REPORT_FILE: &str = "report.json";

pub struct LocalStore {
    root_dir: PathBuf,
    catalog: Mutex<Catalog>,
    locks: TermLocks,
}

impl LocalStore {
    /// Open the store rooted at `root_dir`, loading `catalog.json` when present.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root_dir = root_dir.into();
        let catalog = match read_json::<CatalogData>(&root_dir.join(CATALOG_FILE)).await? {
            Some(data) => Catalog::from_data(data),
            None => {
                log::info!(
                    "No catalog at {}, starting empty",
                    root_dir.join(CATALOG_FILE).display()
                );
                Catalog::new()
            }
        };
        Ok(Self {
            root_dir,
            catalog: Mutex::new(catalog),
            locks: TermLocks::default(),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Write the job report next to the catalog.
    pub async fn write_report(&self, report: &JobReport) -> Result<PathBuf, StorageError> {
        let path = self.root_dir.join(REPORT_FILE);
        write_json(&path, report).await?;
        Ok(path)
    }

    /// Report of the most recent job, if any.
    pub async fn load_report(&self) -> Result<Option<JobReport>, StorageError> {
        read_json(&self.root_dir.join(REPORT_FILE)).await
    }
}

#[async_trait]
impl CatalogStore for LocalStore {
    async fn begin_term_transaction(
        &self,
        term_code: &str,
    ) -> Result<TermTransaction, StorageError> {
        let lock = self.locks.acquire(term_code).await;
        let working = self.catalog.lock().await.clone();
        Ok(TermTransaction::new(term_code, working, lock))
    }

    async fn commit(&self, tx: TermTransaction) -> Result<(), StorageError> {
        let mut catalog = self.catalog.lock().await;
        let next = tx.apply_to(&catalog)?;

        // Persist before publishing so memory never runs ahead of disk.
        write_json(&self.root_dir.join(CATALOG_FILE), next.data()).await?;
        *catalog = next;

        log::info!(
            "Committed {} writes for term {} to {}",
            tx.pending_writes(),
            tx.term_code(),
            CATALOG_FILE
        );
        Ok(())
    }

    async fn snapshot(&self) -> Result<Catalog, StorageError> {
        Ok(self.catalog.lock().await.clone())
    }
}

/// Write bytes atomically (write to temp, then rename).
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &bytes).await
}

/// Read JSON data, returning None if the file doesn't exist.
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}
