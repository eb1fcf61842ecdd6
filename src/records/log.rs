//! Durable transaction log.
//!
//! Each committed transaction is one frame:
//! `len (u32 LE) | MessagePack(LogEntry) | crc32 (u32 LE)`.
//! The file starts with a short magic + version header.

use crate::entities::Record;
use crate::error::{Result, StoreError};
use crate::types::{Timestamp, SCHEMA_VERSION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the transaction log.
const LOG_MAGIC: &[u8; 4] = b"CSL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// One committed transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub schema_version: u32,
    pub committed_at: Timestamp,
    /// New versions plus re-written predecessors, in apply order.
    pub records: Vec<Record>,
}

/// Borrowed twin of [`LogEntry`] used on the write path.
#[derive(Serialize)]
struct LogEntryRef<'a> {
    sequence: u64,
    schema_version: u32,
    committed_at: Timestamp,
    records: &'a [Record],
}

/// Append-only transaction log. Owned by the store's worker.
pub struct TransactionLog {
    path: PathBuf,
    file: File,
    size: u64,
    next_sequence: u64,
    writes_since_sync: u64,
    sync_interval: u64,
}

impl TransactionLog {
    /// Open or create a log, returning every committed entry for replay.
    ///
    /// A torn or checksum-failing final frame is truncated away. A bad frame
    /// followed by more data is reported as corruption.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.is_empty() {
            write_header(&mut file)?;
            bytes.extend_from_slice(LOG_MAGIC);
            bytes.push(LOG_VERSION);
        }

        if bytes.len() < HEADER_LEN as usize || &bytes[..4] != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid log magic".into()));
        }
        if bytes[4] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported log version: {}",
                bytes[4]
            )));
        }

        let (entries, valid_len) = scan(&bytes)?;
        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                discarded = bytes.len() - valid_len,
                "truncating incomplete transaction at end of log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let next_sequence = entries.last().map_or(1, |e| e.sequence + 1);
        debug!(path = %path.display(), entries = entries.len(), "opened transaction log");

        let log = Self {
            path,
            file,
            size: valid_len as u64,
            next_sequence,
            writes_since_sync: 0,
            sync_interval: sync_interval.max(1),
        };
        Ok((log, entries))
    }

    /// Append one transaction. Returns its sequence number.
    ///
    /// On failure the file is cut back to its previous length, so a failed
    /// append is never replayed.
    pub fn append(&mut self, records: &[Record]) -> Result<u64> {
        let sequence = self.next_sequence;
        let entry = LogEntryRef {
            sequence,
            schema_version: SCHEMA_VERSION,
            committed_at: Utc::now(),
            records,
        };
        let encoded = rmp_serde::to_vec_named(&entry)?;
        check_frame_len(encoded.len())?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());

        let sync = self.writes_since_sync + 1 >= self.sync_interval;
        if let Err(e) = self.write_frame(&frame, sync) {
            warn!(path = %self.path.display(), error = %e, "append failed; rolling back");
            if let Err(rollback) = self.file.set_len(self.size) {
                warn!(path = %self.path.display(), error = %rollback, "rollback failed");
            }
            return Err(e);
        }

        self.size += frame.len() as u64;
        self.next_sequence += 1;
        self.writes_since_sync = if sync { 0 } else { self.writes_since_sync + 1 };
        Ok(sequence)
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.write_all(frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Force pending writes to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Discard every entry, keeping only the header.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(HEADER_LEN)?;
        self.file.sync_all()?;
        self.size = HEADER_LEN;
        self.next_sequence = 1;
        self.writes_since_sync = 0;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Frames the reader would refuse are refused on write too.
fn check_frame_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(StoreError::InvalidOperation(format!(
            "transaction of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(())
}

fn write_header(file: &mut File) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(LOG_MAGIC)?;
    file.write_all(&[LOG_VERSION])?;
    file.sync_all()?;
    Ok(())
}

/// Decode frames after the header. Returns the entries and the length of the
/// valid prefix.
fn scan(bytes: &[u8]) -> Result<(Vec<LogEntry>, usize)> {
    let mut entries = Vec::new();
    let mut offset = HEADER_LEN as usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < 4 {
            break;
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(StoreError::Corruption(format!(
                "log frame at offset {} is too large ({} bytes)",
                offset, len
            )));
        }
        let frame_len = 4 + len + 4;
        if rest.len() < frame_len {
            break;
        }

        let payload = &rest[4..4 + len];
        let stored = u32::from_le_bytes([
            rest[4 + len],
            rest[5 + len],
            rest[6 + len],
            rest[7 + len],
        ]);
        let computed = crc32fast::hash(payload);
        if stored != computed {
            if offset + frame_len == bytes.len() {
                break;
            }
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        entries.push(rmp_serde::from_slice(payload)?);
        offset += frame_len;
    }

    Ok((entries, offset))
}
