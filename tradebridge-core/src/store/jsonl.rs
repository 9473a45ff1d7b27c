//! JSONL trade journal: append-only persistence with an in-memory index.
//!
//! Every create/update appends one JSON object per line holding the full
//! trade snapshot. On open the journal is replayed: the last line for a ticket
//! wins, malformed lines are skipped, and so are lines that contradict the
//! store contract (an `update` with no earlier `create`, a second `create`). `compact` rewrites the journal to one
//! line per ticket (write to .tmp, rename into place).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{StoreError, TradeStore};
use crate::domain::{CanonicalTrade, Ticket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JournalOp {
    Create,
    Update,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    op: JournalOp,
    trade: CanonicalTrade,
}

#[derive(Debug)]
struct Journal {
    index: BTreeMap<Ticket, CanonicalTrade>,
    file: File,
}

/// File-backed trade store.
#[derive(Debug)]
pub struct JsonlTradeStore {
    path: PathBuf,
    journal: Mutex<Journal>,
}

impl JsonlTradeStore {
    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let index = replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            journal: Mutex::new(Journal { index, file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the journal so it holds exactly one line per ticket.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().map_err(|_| StoreError::Poisoned)?;
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for trade in journal.index.values() {
                let record = JournalRecord {
                    op: JournalOp::Create,
                    trade: trade.clone(),
                };
                serde_json::to_writer(&mut writer, &record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(e)
        })?;
        journal.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    fn append(journal: &mut Journal, op: JournalOp, trade: &CanonicalTrade) -> Result<(), StoreError> {
        let record = JournalRecord {
            op,
            trade: trade.clone(),
        };
        let line = serde_json::to_string(&record)?;
        writeln!(journal.file, "{line}")?;
        journal.file.flush()?;
        Ok(())
    }
}

fn replay(path: &Path) -> Result<BTreeMap<Ticket, CanonicalTrade>, StoreError> {
    let mut index = BTreeMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(e.into()),
    };
    for (number, line) in io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalRecord>(&line) {
            Ok(record) => {
                let known = index.contains_key(&record.trade.ticket);
                match (record.op, known) {
                    (JournalOp::Create, false) | (JournalOp::Update, true) => {
                        index.insert(record.trade.ticket.clone(), record.trade);
                    }
                    (op, _) => warn!(
                        path = %path.display(),
                        line = number + 1,
                        ticket = %record.trade.ticket,
                        ?op,
                        "skipping journal line that contradicts earlier entries"
                    ),
                }
            }
            Err(e) => warn!(path = %path.display(), line = number + 1, error = %e, "skipping malformed journal line"),
        }
    }
    Ok(index)
}

impl TradeStore for JsonlTradeStore {
    fn find_by_ticket(&self, ticket: &Ticket) -> Result<Option<CanonicalTrade>, StoreError> {
        let journal = self.journal.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(journal.index.get(ticket).cloned())
    }

    fn create(&self, trade: &CanonicalTrade) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().map_err(|_| StoreError::Poisoned)?;
        if journal.index.contains_key(&trade.ticket) {
            return Err(StoreError::Duplicate(trade.ticket.clone()));
        }
        Self::append(&mut journal, JournalOp::Create, trade)?;
        journal.index.insert(trade.ticket.clone(), trade.clone());
        Ok(())
    }

    fn update(&self, trade: &CanonicalTrade) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().map_err(|_| StoreError::Poisoned)?;
        if !journal.index.contains_key(&trade.ticket) {
            return Err(StoreError::NotFound(trade.ticket.clone()));
        }
        Self::append(&mut journal, JournalOp::Update, trade)?;
        journal.index.insert(trade.ticket.clone(), trade.clone());
        Ok(())
    }

    fn all(&self) -> Result<Vec<CanonicalTrade>, StoreError> {
        let journal = self.journal.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(journal.index.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let journal = self.journal.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(journal.index.len())
    }
}
