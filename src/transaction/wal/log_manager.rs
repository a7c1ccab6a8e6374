use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("Failed to serialize log record: {0}")]
    SerializationError(String),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}

/// Stubbed write-ahead log. Records are framed with a length prefix and
/// buffered in memory; `flush` appends the buffer to the log file through
/// the disk manager. Recovery is not implemented.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    next_lsn: AtomicU64,
    persistent_lsn: AtomicU64,
    buffer: Mutex<Vec<u8>>,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self {
            disk_manager,
            next_lsn: AtomicU64::new(1),
            persistent_lsn: AtomicU64::new(0),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Assign the next LSN and buffer a serialized record.
    pub fn append_record(
        &self,
        txn_id: TxnId,
        prev_lsn: Lsn,
        record_type: LogRecordType,
    ) -> Result<Lsn, LogManagerError> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let record = LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
        };
        let bytes = bincode::serialize(&record)
            .map_err(|e| LogManagerError::SerializationError(e.to_string()))?;

        let mut buffer = self.buffer.lock();
        buffer.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&bytes);
        Ok(lsn)
    }

    /// Write the buffered records out to the log file.
    pub fn flush(&self) -> Result<(), LogManagerError> {
        let data = {
            let mut buffer = self.buffer.lock();
            std::mem::take(&mut *buffer)
        };
        if !data.is_empty() {
            self.disk_manager.write_log(&data)?;
        }
        self.persistent_lsn
            .store(self.next_lsn.load(Ordering::SeqCst) - 1, Ordering::SeqCst);
        Ok(())
    }

    pub fn persistent_lsn(&self) -> Lsn {
        self.persistent_lsn.load(Ordering::SeqCst)
    }
}
