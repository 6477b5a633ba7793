//! JSON Lines signal journal.
//!
//! Every accepted signal mutation is appended as a full snapshot:
//! - One file per signal table: `<base_dir>/<table>.jsonl`
//! - Append mode, one write per batch
//! - A failed batch write is truncated away, so a batch lands whole or not at all
//! - A crash mid-write can only corrupt the final line
//!
//! Replay keeps the last snapshot per signal id.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use cadence_core::{is_valid_table_name, Signal, SignalId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, PersistenceResult};

const JOURNAL_EXTENSION: &str = "jsonl";

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub table: String,
    pub recorded_at: DateTime<Utc>,
    pub signal: Signal,
    /// Tombstone: the signal was purged and must not be replayed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub purged: bool,
}

/// Open append handle for one table.
struct ActiveWriter {
    file: File,
    records_written: usize,
}

/// Append target that can be rolled back to an earlier length.
trait JournalSink: Write {
    fn committed_len(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl JournalSink for File {
    fn committed_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write `buf` whole or restore the sink to its previous length.
fn append_whole<S: JournalSink>(sink: &mut S, buf: &[u8]) -> io::Result<()> {
    let before = sink.committed_len()?;
    let result = sink.write_all(buf).and_then(|()| sink.flush());
    if let Err(e) = result {
        if let Err(rollback) = sink.truncate_to(before) {
            warn!(error = %rollback, len = before, "Failed to roll back partial journal write");
        }
        return Err(e);
    }
    Ok(())
}

/// Append-only signal journal.
pub struct SignalJournal {
    base_dir: PathBuf,
    writers: Mutex<HashMap<String, ActiveWriter>>,
}

impl SignalJournal {
    /// Open a journal rooted at `base_dir`, creating the directory if needed.
    pub fn open(base_dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        info!(dir = %base_dir.display(), "Signal journal opened");

        Ok(Self {
            base_dir,
            writers: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Journal file for `table`.
    #[must_use]
    pub fn path_for(&self, table: &str) -> PathBuf {
        self.base_dir.join(format!("{table}.{JOURNAL_EXTENSION}"))
    }

    /// Append one signal snapshot.
    pub fn append(&self, table: &str, signal: &Signal) -> PersistenceResult<()> {
        self.write_records(table, std::slice::from_ref(signal), false)
    }

    /// Append several snapshots with a single flush.
    pub fn append_batch(&self, table: &str, signals: &[Signal]) -> PersistenceResult<()> {
        self.write_records(table, signals, false)
    }

    /// Append tombstones for purged signals.
    pub fn append_purged(&self, table: &str, signals: &[Signal]) -> PersistenceResult<()> {
        self.write_records(table, signals, true)
    }

    fn write_records(
        &self,
        table: &str,
        signals: &[Signal],
        purged: bool,
    ) -> PersistenceResult<()> {
        if signals.is_empty() {
            return Ok(());
        }
        validate_table(table)?;

        // Serialize before taking the lock
        let recorded_at = Utc::now();
        let mut buf = Vec::new();
        for signal in signals {
            let record = SignalRecord {
                table: table.to_string(),
                recorded_at,
                signal: signal.clone(),
                purged,
            };
            serde_json::to_writer(&mut buf, &record)?;
            buf.push(b'\n');
        }

        let mut writers = self.writers.lock();
        let active = match writers.entry(table.to_string()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let path = self.path_for(table);
                info!(path = %path.display(), "Opening signal journal (append mode)");
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                e.insert(ActiveWriter {
                    file,
                    records_written: 0,
                })
            }
        };

        append_whole(&mut active.file, &buf)?;
        active.records_written += signals.len();

        debug!(table, records = signals.len(), "Journaled signal records");
        Ok(())
    }

    /// Flush and close every open file.
    pub fn close(&self) -> PersistenceResult<()> {
        let mut writers = self.writers.lock();
        for (table, mut active) in writers.drain() {
            active.file.flush()?;
            info!(
                table = %table,
                records = active.records_written,
                "Closed signal journal"
            );
        }
        Ok(())
    }

    /// Rebuild the latest state of every signal under `base_dir`.
    ///
    /// Corrupt lines are logged and skipped. Purged signals are dropped.
    /// Records come back ordered by signal id. A missing directory yields an
    /// empty result.
    pub fn replay(base_dir: impl AsRef<Path>) -> PersistenceResult<Vec<SignalRecord>> {
        let base_dir = base_dir.as_ref();
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut latest: BTreeMap<SignalId, SignalRecord> = BTreeMap::new();
        let mut skipped = 0usize;

        for entry in fs::read_dir(base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }

            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SignalRecord>(&line) {
                    Ok(record) => {
                        latest.insert(record.signal.id, record);
                    }
                    Err(e) => {
                        skipped += 1;
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "Skipping corrupt journal line"
                        );
                    }
                }
            }
        }

        let records: Vec<SignalRecord> = latest.into_values().filter(|r| !r.purged).collect();
        info!(
            dir = %base_dir.display(),
            signals = records.len(),
            skipped,
            "Signal journal replayed"
        );
        Ok(records)
    }
}

impl Drop for SignalJournal {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(?e, "Failed to close signal journal on drop");
        }
    }
}

/// Table names become file names.
fn validate_table(table: &str) -> PersistenceResult<()> {
    if is_valid_table_name(table) {
        Ok(())
    } else {
        Err(PersistenceError::InvalidTable(table.to_string()))
    }
}
