use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under strict two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already committed or aborted")]
    InvalidState(TxnId),

    #[error("Failed to write to WAL: {0}")]
    LogError(String),

    #[error("Internal transaction error: {0}")]
    InternalError(String),
}

/// An active database transaction. State and lock sets carry interior
/// mutability: the deadlock detector aborts victims from another thread,
/// and the lock manager mirrors granted requests into the lock sets.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    prev_lsn: AtomicU64,

    shared_table_locks: Mutex<HashSet<TableOid>>,
    exclusive_table_locks: Mutex<HashSet<TableOid>>,
    intention_shared_table_locks: Mutex<HashSet<TableOid>>,
    intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,
    shared_intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,

    shared_row_locks: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    exclusive_row_locks: Mutex<HashMap<TableOid, HashSet<Rid>>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicU64::new(0),
            shared_table_locks: Mutex::new(HashSet::new()),
            exclusive_table_locks: Mutex::new(HashSet::new()),
            intention_shared_table_locks: Mutex::new(HashSet::new()),
            intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_row_locks: Mutex::new(HashMap::new()),
            exclusive_row_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    fn table_lock_set(&self, mode: LockMode) -> &Mutex<HashSet<TableOid>> {
        match mode {
            LockMode::Shared => &self.shared_table_locks,
            LockMode::Exclusive => &self.exclusive_table_locks,
            LockMode::IntentionShared => &self.intention_shared_table_locks,
            LockMode::IntentionExclusive => &self.intention_exclusive_table_locks,
            LockMode::SharedIntentionExclusive => &self.shared_intention_exclusive_table_locks,
        }
    }

    pub fn add_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.table_lock_set(mode).lock().insert(oid);
    }

    pub fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.table_lock_set(mode).lock().remove(&oid);
    }

    pub fn holds_table_lock(&self, mode: LockMode, oid: TableOid) -> bool {
        self.table_lock_set(mode).lock().contains(&oid)
    }

    pub fn add_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => unreachable!("row locks are S or X only"),
        };
        set.lock().entry(oid).or_default().insert(rid);
    }

    pub fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => unreachable!("row locks are S or X only"),
        };
        let mut map = set.lock();
        if let Some(rids) = map.get_mut(&oid) {
            rids.remove(&rid);
            if rids.is_empty() {
                map.remove(&oid);
            }
        }
    }

    pub fn holds_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) -> bool {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => return false,
        };
        set.lock().get(&oid).is_some_and(|rids| rids.contains(&rid))
    }

    /// True if any row lock on `oid` is still held; a table lock must not
    /// be released while these exist.
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        self.shared_row_locks
            .lock()
            .get(&oid)
            .is_some_and(|rids| !rids.is_empty())
            || self
                .exclusive_row_locks
                .lock()
                .get(&oid)
                .is_some_and(|rids| !rids.is_empty())
    }

    /// Snapshot of `(oid, rid)` pairs for all held row locks of one mode.
    pub fn row_locks_snapshot(&self, mode: LockMode) -> Vec<(TableOid, Rid)> {
        let set = match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => return Vec::new(),
        };
        set.lock()
            .iter()
            .flat_map(|(&oid, rids)| rids.iter().map(move |&rid| (oid, rid)))
            .collect()
    }

    /// Snapshot of every table oid the transaction holds any lock on.
    pub fn table_locks_snapshot(&self) -> Vec<TableOid> {
        let mut oids = HashSet::new();
        oids.extend(self.shared_table_locks.lock().iter().copied());
        oids.extend(self.exclusive_table_locks.lock().iter().copied());
        oids.extend(self.intention_shared_table_locks.lock().iter().copied());
        oids.extend(self.intention_exclusive_table_locks.lock().iter().copied());
        oids.extend(
            self.shared_intention_exclusive_table_locks
                .lock()
                .iter()
                .copied(),
        );
        oids.into_iter().collect()
    }
}
