use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};
use crate::transaction::wal::log_manager::LogManager;
use crate::transaction::wal::log_record::LogRecordType;

/// Process-wide registry of active transactions. The deadlock detector
/// resolves victim ids through it.
static ACTIVE_TRANSACTIONS: Lazy<RwLock<HashMap<TxnId, Arc<Transaction>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Ids are handed out process-wide so the registry never sees two
/// transactions with the same id.
static NEXT_TXN_ID: AtomicI32 = AtomicI32::new(0);

/// Look up an active transaction by id.
pub fn get_transaction(txn_id: TxnId) -> Option<Arc<Transaction>> {
    ACTIVE_TRANSACTIONS.read().get(&txn_id).cloned()
}

/// Creates and tracks transactions; commit and abort release every lock
/// the transaction still holds (strict two-phase locking).
pub struct TransactionManager {
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(log_manager: Arc<LogManager>, lock_manager: Arc<LockManager>) -> Self {
        Self {
            log_manager,
            lock_manager,
        }
    }

    /// Begin a new transaction at the given isolation level.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>, TransactionError> {
        let txn_id = NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));

        let lsn = self
            .log_manager
            .append_record(txn_id, txn.prev_lsn(), LogRecordType::Begin)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_prev_lsn(lsn);

        ACTIVE_TRANSACTIONS.write().insert(txn_id, Arc::clone(&txn));
        Ok(txn)
    }

    /// Commit: log, flush, release all locks, deregister.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        match txn.state() {
            TransactionState::Growing | TransactionState::Shrinking => {}
            _ => return Err(TransactionError::InvalidState(txn.id())),
        }
        let lsn = self
            .log_manager
            .append_record(txn.id(), txn.prev_lsn(), LogRecordType::Commit)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_prev_lsn(lsn);
        self.log_manager
            .flush()
            .map_err(|e| TransactionError::LogError(e.to_string()))?;

        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all_locks(txn);
        ACTIVE_TRANSACTIONS.write().remove(&txn.id());
        Ok(())
    }

    /// Abort: log, release all locks, deregister. Safe to call on a
    /// transaction the deadlock detector already aborted.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if txn.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(txn.id()));
        }
        let lsn = self
            .log_manager
            .append_record(txn.id(), txn.prev_lsn(), LogRecordType::Abort)
            .map_err(|e| TransactionError::LogError(e.to_string()))?;
        txn.set_prev_lsn(lsn);

        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all_locks(txn);
        ACTIVE_TRANSACTIONS.write().remove(&txn.id());
        Ok(())
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn test_manager() -> (TransactionManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk_manager = Arc::new(DiskManager::new(file.path()).unwrap());
        let log_manager = Arc::new(LogManager::new(disk_manager));
        let lock_manager = Arc::new(LockManager::new());
        (TransactionManager::new(log_manager, lock_manager), file)
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let (tm, _file) = test_manager();
        let t1 = tm.begin(IsolationLevel::ReadCommitted).unwrap();
        let t2 = tm.begin(IsolationLevel::RepeatableRead).unwrap();
        assert!(t2.id() > t1.id());
        assert_eq!(t1.state(), TransactionState::Growing);
        assert!(get_transaction(t1.id()).is_some());

        tm.commit(&t1).unwrap();
        tm.abort(&t2).unwrap();
    }

    #[test]
    fn test_commit_finalizes_state() {
        let (tm, _file) = test_manager();
        let txn = tm.begin(IsolationLevel::ReadCommitted).unwrap();
        tm.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(get_transaction(txn.id()).is_none());

        // A second commit is rejected.
        assert!(matches!(
            tm.commit(&txn),
            Err(TransactionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_abort_after_detector_abort_is_ok() {
        let (tm, _file) = test_manager();
        let txn = tm.begin(IsolationLevel::ReadCommitted).unwrap();
        // The deadlock detector sets the state first; the client's own
        // abort must still clean up without error.
        txn.set_state(TransactionState::Aborted);
        tm.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(get_transaction(txn.id()).is_none());
    }
}
