//! Snapshot persistence for cache entries.
//!
//! Saves every live entry with the metadata needed to rebuild its expiration
//! (creation time, last access, access count, life span) as JSON. Loading
//! never overwrites a key that is already live in the receiving store.

use std::fmt::Debug;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error};

use crate::cache::{AccessTracker, Store};
use crate::error::Result;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot<R> {
    version: u32,
    entries: Vec<R>,
}

#[derive(Serialize, Deserialize)]
struct Record<K, V> {
    key: K,
    value: V,
    created_on: DateTime<Utc>,
    accessed_on: DateTime<Utc>,
    access_count: u64,
    /// Absent when the entry never expires
    life_span: Option<Duration>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Writes every live entry to `writer`, in insertion order.
    pub fn save<W: Write>(&self, writer: W) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        let items = self.items();
        let entries: Vec<Record<&K, &V>> = items
            .iter()
            .map(|entry| {
                let access = entry.access();
                Record {
                    key: entry.key(),
                    value: entry.value(),
                    created_on: entry.created_on(),
                    accessed_on: access.accessed_on,
                    access_count: access.access_count,
                    life_span: entry.life_span(),
                }
            })
            .collect();

        let mut writer = BufWriter::new(writer);
        serde_json::to_writer(
            &mut writer,
            &Snapshot {
                version: SNAPSHOT_VERSION,
                entries,
            },
        )?;
        writer.flush()?;
        Ok(())
    }

    /// Saves a snapshot to `path` atomically.
    ///
    /// The snapshot is written to a temporary file in the same directory and
    /// renamed over `path`, so a failed save leaves the previous file intact.
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()>
    where
        K: Serialize,
        V: Serialize,
    {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut temp = NamedTempFile::new_in(dir).inspect_err(|e| {
            error!("Snapshot save error: temp file creation failed: {}", e);
        })?;
        self.save(temp.as_file_mut())?;
        temp.as_file().sync_all()?;
        temp.persist(path).inspect_err(|e| {
            error!("Snapshot save error: rename failed: {}", e);
        })?;

        debug!("Saved cache '{}' to {}", self.name(), path.display());
        Ok(())
    }

    /// Imports entries from `reader`.
    ///
    /// Keys already live in this store keep their current value. Records that
    /// have expired under this store's policy are skipped. Returns the number
    /// of imported entries.
    pub fn load<R: Read>(&self, reader: R) -> Result<usize>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let snapshot: Snapshot<Record<K, V>> = serde_json::from_reader(BufReader::new(reader))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(serde_json::Error::custom(format!(
                "unsupported snapshot version {}",
                snapshot.version
            ))
            .into());
        }

        let mut imported = 0;
        for record in snapshot.entries {
            let access = AccessTracker {
                accessed_on: record.accessed_on,
                access_count: record.access_count,
            };
            if self.restore(record.key, record.value, record.life_span, record.created_on, access) {
                imported += 1;
            }
        }
        Ok(imported)
    }

    /// Imports entries from the snapshot file at `path`. See [`Store::load`].
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize>
    where
        K: DeserializeOwned,
        V: DeserializeOwned,
    {
        let path = path.as_ref();
        let file = File::open(path).inspect_err(|e| {
            error!("Snapshot load error: cannot open {}: {}", path.display(), e);
        })?;
        let imported = self.load(file)?;
        debug!(
            "Loaded {} entries into cache '{}' from {}",
            imported,
            self.name(),
            path.display()
        );
        Ok(imported)
    }
}
