//! Append-only transaction journal.
//!
//! One JSON object per line. A transfer is committed once its line has been
//! written and synced; account snapshots are derived from the journal and
//! can be rebuilt from it on open.

use super::account::AccountId;
use super::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Unique transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A committed transfer. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: u64,
    pub committed_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(from: AccountId, to: AccountId, amount: u64) -> Self {
        TransactionRecord {
            id: TransactionId::new(),
            from,
            to,
            amount,
            committed_at: Utc::now(),
        }
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.from, self.to, self.amount)
    }
}

/// A single journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Transfer(TransactionRecord),
    /// Free-form audit entry; never moves funds.
    Note {
        account: AccountId,
        message: String,
        recorded_at: DateTime<Utc>,
    },
}

/// Open journal file plus an in-memory index of its transfers.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    transfers: Vec<TransactionRecord>,
    index: HashMap<TransactionId, usize>,
    notes: usize,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
}

impl Journal {
    /// Open (or create) the journal and load every committed entry.
    ///
    /// A torn final line left by a crash mid-append is cut off. A malformed
    /// line anywhere else is reported as corruption.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut journal = Journal {
            path,
            file,
            len: 0,
            transfers: Vec::new(),
            index: HashMap::new(),
            notes: 0,
            poisoned: false,
        };

        let mut offset = 0usize;
        let mut line_no = 0usize;
        while offset < contents.len() {
            line_no += 1;
            let Some(end) = contents[offset..].iter().position(|&b| b == b'\n') else {
                warn!(
                    path = %journal.path.display(),
                    line = line_no,
                    bytes = contents.len() - offset,
                    "Discarding torn journal entry"
                );
                journal.file.set_len(offset as u64)?;
                journal.file.sync_data()?;
                break;
            };

            let line = &contents[offset..offset + end];
            offset += end + 1;

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let entry: JournalEntry =
                serde_json::from_slice(line).map_err(|e| LedgerError::CorruptJournal {
                    line: line_no,
                    reason: e.to_string(),
                })?;
            journal.index_entry(entry);
        }

        // A torn tail leaves `offset` at the truncation point.
        journal.len = offset as u64;

        debug!(
            path = %journal.path.display(),
            transfers = journal.transfers.len(),
            notes = journal.notes,
            "Journal loaded"
        );
        Ok(journal)
    }

    /// Durably append an entry.
    ///
    /// On failure the file is truncated back to its previous length, so a
    /// failed append never leaves a partial line behind. If that truncation
    /// also fails the file may hold an entry that was reported as failed, and
    /// the journal refuses every later append.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), LedgerError> {
        if self.poisoned {
            return Err(LedgerError::JournalPoisoned);
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let start = self.len;
        if let Err(e) = self.write_synced(&line) {
            if let Err(truncate_err) = self.file.set_len(start) {
                error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to roll back journal append; refusing further writes"
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }

        self.len += line.len() as u64;
        self.index_entry(entry.clone());
        Ok(())
    }

    fn write_synced(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line)?;
        self.file.sync_data()
    }

    fn index_entry(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::Transfer(record) => {
                self.index.insert(record.id, self.transfers.len());
                self.transfers.push(record);
            }
            JournalEntry::Note { .. } => self.notes += 1,
        }
    }

    /// Committed transfers in append order.
    pub fn transfers(&self) -> &[TransactionRecord] {
        &self.transfers
    }

    pub fn get(&self, id: &TransactionId) -> Option<&TransactionRecord> {
        self.index.get(id).map(|&i| &self.transfers[i])
    }

    /// Whether a failed rollback has disabled appends.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[cfg(test)]
    pub(super) fn replace_file(&mut self, file: File) {
        self.file = file;
    }

    pub fn note_count(&self) -> usize {
        self.notes
    }

    /// Size of the journal file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
