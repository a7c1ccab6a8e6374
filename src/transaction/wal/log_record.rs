use serde::{Deserialize, Serialize};

use crate::common::types::{Lsn, TxnId};

/// Transaction lifecycle record kinds. Data operations and recovery are
/// not implemented; the surface exists so the storage layer has somewhere
/// to hang its write-ahead hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecordType {
    Begin,
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let record = LogRecord {
            lsn: 42,
            txn_id: 7,
            prev_lsn: 41,
            record_type: LogRecordType::Commit,
        };
        let bytes = bincode::serialize(&record).unwrap();
        let out: LogRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(out, record);
    }
}
