//! Kernel event journal contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist committed kernel events keyed by (kernel, sequence).
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Appending a record that is already stored is a no-op.
//! - Read paths reject rows whose kind, payload or sequence disagree
//!   instead of masking them.

use crate::db::DbError;
use crate::identity::Address;
use crate::kernel::{EventRecord, Kernel, KernelEvent};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

const EVENT_SELECT_SQL: &str = "SELECT
    kernel,
    sequence,
    kind,
    payload
FROM kernel_events";

pub type JournalResult<T> = Result<T, JournalError>;

/// Journal persistence errors.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("event payload codec failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("invalid persisted event data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for JournalError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Ordered, append-only store of one or more kernels' events.
pub trait EventJournal {
    /// Stores `records`, skipping any already present. Returns how many
    /// were new.
    fn append(&self, records: &[EventRecord]) -> JournalResult<usize>;
    /// Every stored record of `kernel`, ordered by sequence.
    fn load(&self, kernel: Address) -> JournalResult<Vec<EventRecord>>;
    /// Stored records of `kernel` with the given event name.
    fn load_kind(&self, kernel: Address, kind: &str) -> JournalResult<Vec<EventRecord>>;
    fn last_sequence(&self, kernel: Address) -> JournalResult<Option<u64>>;

    /// Appends every event `kernel` committed after the last stored one.
    fn sync_from(&self, kernel: &Kernel) -> JournalResult<usize> {
        let next = self
            .last_sequence(kernel.address())?
            .map_or(0, |sequence| sequence + 1);
        self.append(&kernel.events_since(next))
    }
}

/// SQLite-backed event journal.
pub struct SqliteEventJournal<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventJournal<'conn> {
    /// `conn` must come from [`crate::db::open_db`] or
    /// [`crate::db::open_db_in_memory`].
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl EventJournal for SqliteEventJournal<'_> {
    fn append(&self, records: &[EventRecord]) -> JournalResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO kernel_events (kernel, sequence, kind, payload)
                 VALUES (?1, ?2, ?3, ?4);",
            )?;
            for record in records {
                let sequence = sequence_to_db(record.sequence)?;
                let payload = serde_json::to_string(&record.event)?;
                inserted += stmt.execute(params![
                    record.kernel.to_string(),
                    sequence,
                    record.event.name(),
                    payload,
                ])?;
            }
        }
        if let Err(err) = tx.commit() {
            error!(
                "event=journal_append module=journal status=error records={} error={}",
                records.len(),
                err
            );
            return Err(err.into());
        }

        info!(
            "event=journal_append module=journal status=ok records={} inserted={}",
            records.len(),
            inserted
        );
        Ok(inserted)
    }

    fn load(&self, kernel: Address) -> JournalResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EVENT_SELECT_SQL}
             WHERE kernel = ?1
             ORDER BY sequence ASC;"
        ))?;
        let mut rows = stmt.query(params![kernel.to_string()])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let record = parse_event_row(row)?;
            let expected = records.len() as u64;
            if record.sequence != expected {
                return Err(JournalError::InvalidData(format!(
                    "kernel {kernel} journal expected sequence {expected}, found {}",
                    record.sequence
                )));
            }
            records.push(record);
        }
        Ok(records)
    }

    fn load_kind(&self, kernel: Address, kind: &str) -> JournalResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{EVENT_SELECT_SQL}
             WHERE kernel = ?1
               AND kind = ?2
             ORDER BY sequence ASC;"
        ))?;
        let mut rows = stmt.query(params![kernel.to_string(), kind])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_event_row(row)?);
        }
        Ok(records)
    }

    fn last_sequence(&self, kernel: Address) -> JournalResult<Option<u64>> {
        let last = self
            .conn
            .query_row(
                "SELECT MAX(sequence) FROM kernel_events WHERE kernel = ?1;",
                params![kernel.to_string()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        last.map(sequence_from_db).transpose()
    }
}

fn parse_event_row(row: &Row<'_>) -> JournalResult<EventRecord> {
    let kernel_text: String = row.get(0)?;
    let sequence: i64 = row.get(1)?;
    let kind: String = row.get(2)?;
    let payload: String = row.get(3)?;

    let kernel = kernel_text
        .parse::<Address>()
        .map_err(|err| JournalError::InvalidData(err.to_string()))?;
    let event: KernelEvent = serde_json::from_str(&payload)?;
    if event.name() != kind {
        return Err(JournalError::InvalidData(format!(
            "kind `{kind}` does not match payload event `{}`",
            event.name()
        )));
    }

    Ok(EventRecord {
        kernel,
        sequence: sequence_from_db(sequence)?,
        event,
    })
}

fn sequence_to_db(sequence: u64) -> JournalResult<i64> {
    i64::try_from(sequence)
        .map_err(|_| JournalError::InvalidData(format!("sequence {sequence} exceeds i64")))
}

fn sequence_from_db(sequence: i64) -> JournalResult<u64> {
    u64::try_from(sequence)
        .map_err(|_| JournalError::InvalidData(format!("negative sequence {sequence}")))
}
