use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId, INVALID_TXN_ID};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};
use crate::transaction::concurrency::transaction_manager;

/// How often the background worker scans for deadlocks.
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// The five multi-granularity lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The compatibility matrix: can `self` be granted while `granted` is
    /// already held by another transaction?
    pub fn compatible_with(self, granted: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => granted != Exclusive,
            IntentionExclusive => matches!(granted, IntentionShared | IntentionExclusive),
            Shared => matches!(granted, IntentionShared | Shared),
            SharedIntentionExclusive => granted == IntentionShared,
            Exclusive => false,
        }
    }

    /// Legal upgrade transitions: IS -> {S, X, IX, SIX}; S -> {X, SIX};
    /// IX -> {X, SIX}; SIX -> {X}.
    pub fn upgradable_to(self, target: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, target),
            (IntentionShared, Shared)
                | (IntentionShared, Exclusive)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }
}

/// Reason codes surfaced when a precondition failure aborts a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    AttemptedIntentionLockOnRow,
    UpgradeConflict,
    IncompatibleUpgrade,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
    AttemptedUnlockButNoLockHeld,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read uncommitted"
            }
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::UpgradeConflict => "another transaction is already upgrading",
            AbortReason::IncompatibleUpgrade => "illegal lock upgrade",
            AbortReason::TableLockNotPresent => "row lock without a sufficient table lock",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked before its row locks"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a lock held",
        };
        write!(f, "{}", msg)
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("transaction {txn_id} aborted: {reason}")]
    TransactionAborted { txn_id: TxnId, reason: AbortReason },
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    #[allow(dead_code)]
    oid: TableOid,
    rid: Option<Rid>,
    granted: bool,
}

struct QueueInner {
    requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading in this queue, or INVALID_TXN_ID.
    upgrading: TxnId,
}

/// Per-resource FIFO request queue: a mutex, a condition variable, and the
/// upgrading slot.
struct LockRequestQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Table- and row-level lock manager enforcing strict two-phase locking
/// under three isolation levels, with upgrade priority and a periodic
/// waits-for cycle detector that aborts the youngest transaction.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Built fresh each detection round, dropped at the end of the round.
    waits_for: Mutex<BTreeMap<TxnId, BTreeSet<TxnId>>>,
    detector_running: Arc<AtomicBool>,
    detector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            waits_for: Mutex::new(BTreeMap::new()),
            detector_running: Arc::new(AtomicBool::new(false)),
            detector_handle: Mutex::new(None),
        }
    }

    // ------------------------------------------------------------------
    // Table locks
    // ------------------------------------------------------------------

    /// Acquire a table lock, blocking until grantable. Returns Ok(false)
    /// for terminal-state transactions and for waiters aborted mid-wait;
    /// precondition violations abort the transaction and return an error.
    pub fn lock_table(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, LockError> {
        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => return Ok(false),
            _ => {}
        }
        self.check_table_preconditions(txn, mode)?;

        let queue = self.table_queue(oid);
        let mut inner = queue.inner.lock();

        // Re-lock or upgrade if this transaction already holds the table.
        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if inner.upgrading != INVALID_TXN_ID {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !held.upgradable_to(mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            inner.requests.remove(pos);
            txn.remove_table_lock(held, oid);
            inner.upgrading = txn.id();
        }

        inner.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            oid,
            rid: None,
            granted: false,
        });

        loop {
            // Re-check on every wake: the deadlock detector may have
            // aborted us, and spurious wakes must not grant.
            if txn.state() == TransactionState::Aborted {
                Self::remove_waiting_request(&mut inner, txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::grantable(&inner, txn.id(), mode) {
                Self::grant(&mut inner, txn.id());
                txn.add_table_lock(mode, oid);
                debug!("txn {} granted {:?} on table {}", txn.id(), mode, oid);
                return Ok(true);
            }
            queue.cv.wait(&mut inner);
        }
    }

    /// Release a table lock, transitioning Growing -> Shrinking where the
    /// isolation level calls for it.
    pub fn unlock_table(&self, txn: &Transaction, oid: TableOid) -> Result<bool, LockError> {
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }
        let Some(queue) = self.existing_table_queue(oid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mut inner = queue.inner.lock();

        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(inner);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mode = inner.requests[pos].mode;
        self.apply_unlock_transition(txn, mode);
        inner.requests.remove(pos);
        txn.remove_table_lock(mode, oid);
        queue.cv.notify_all();
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Row locks
    // ------------------------------------------------------------------

    /// Acquire a row lock (S or X only). The transaction must already hold
    /// a sufficient lock on the owning table.
    pub fn lock_row(
        &self,
        txn: &Transaction,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, LockError> {
        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => return Ok(false),
            _ => {}
        }
        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_row_preconditions(txn, mode)?;

        if !self.holds_sufficient_table_lock(txn, oid, mode) {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        let queue = self.row_queue(rid);
        let mut inner = queue.inner.lock();

        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            let held = inner.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if inner.upgrading != INVALID_TXN_ID {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            // The only legal row upgrade is S -> X.
            if !(held == LockMode::Shared && mode == LockMode::Exclusive) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            inner.requests.remove(pos);
            txn.remove_row_lock(held, oid, rid);
            inner.upgrading = txn.id();
        }

        inner.requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            oid,
            rid: Some(rid),
            granted: false,
        });

        loop {
            if txn.state() == TransactionState::Aborted {
                Self::remove_waiting_request(&mut inner, txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::grantable(&inner, txn.id(), mode) {
                Self::grant(&mut inner, txn.id());
                txn.add_row_lock(mode, oid, rid);
                debug!("txn {} granted {:?} on row {}", txn.id(), mode, rid);
                return Ok(true);
            }
            queue.cv.wait(&mut inner);
        }
    }

    /// Release a row lock.
    pub fn unlock_row(&self, txn: &Transaction, oid: TableOid, rid: Rid) -> Result<bool, LockError> {
        let Some(queue) = self.existing_row_queue(rid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mut inner = queue.inner.lock();

        let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        else {
            drop(inner);
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        let mode = inner.requests[pos].mode;
        self.apply_unlock_transition(txn, mode);
        inner.requests.remove(pos);
        txn.remove_row_lock(mode, oid, rid);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Release everything a transaction still holds: row locks first, then
    /// table locks. Used at commit/abort and on deadlock victims.
    pub fn release_all_locks(&self, txn: &Transaction) {
        for mode in [LockMode::Shared, LockMode::Exclusive] {
            for (oid, rid) in txn.row_locks_snapshot(mode) {
                let _ = self.unlock_row(txn, oid, rid);
            }
        }
        for oid in txn.table_locks_snapshot() {
            let _ = self.unlock_table(txn, oid);
        }
    }

    // ------------------------------------------------------------------
    // Deadlock detection
    // ------------------------------------------------------------------

    /// Spawn the background cycle detector.
    pub fn start_deadlock_detection(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        let running = Arc::clone(&self.detector_running);
        running.store(true, Ordering::SeqCst);
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                manager.run_cycle_detection();
            }
        });
        *self.detector_handle.lock() = Some(handle);
    }

    pub fn stop_deadlock_detection(&self) {
        self.detector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// One detection round: build the waits-for graph, abort the youngest
    /// transaction on each cycle until none remain, then drop the graph.
    pub fn run_cycle_detection(&self) {
        loop {
            {
                let mut graph = self.waits_for.lock();
                graph.clear();
                self.collect_edges(&mut graph);
                let Some(cycle) = Self::find_cycle(&graph) else {
                    graph.clear();
                    return;
                };
                let victim = *cycle.iter().max().expect("cycle is non-empty");
                debug!("deadlock cycle {:?}, aborting youngest txn {}", cycle, victim);
                drop(graph);

                if let Some(txn) = transaction_manager::get_transaction(victim) {
                    txn.set_state(TransactionState::Aborted);
                    self.release_all_locks(&txn);
                }
            }
            // Wake every waiter so aborted victims exit their waits, then
            // look for further cycles.
            self.broadcast_all();
        }
    }

    /// Edges `waiter -> holder` per queue; neighbor sets are kept sorted so
    /// traversal order is deterministic.
    fn collect_edges(&self, graph: &mut BTreeMap<TxnId, BTreeSet<TxnId>>) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_lock_map.lock();
            let rows = self.row_lock_map.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };
        for queue in queues {
            let inner = queue.inner.lock();
            for waiter in inner.requests.iter().filter(|r| !r.granted) {
                for holder in inner.requests.iter().filter(|r| r.granted) {
                    if waiter.txn_id != holder.txn_id {
                        graph.entry(waiter.txn_id).or_default().insert(holder.txn_id);
                    }
                }
            }
        }
    }

    /// Depth-first search in ascending txn-id order; returns the vertices
    /// of the first cycle found.
    fn find_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
        fn dfs(
            vertex: TxnId,
            graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
            path: &mut Vec<TxnId>,
            on_path: &mut HashSet<TxnId>,
            visited: &mut HashSet<TxnId>,
        ) -> Option<Vec<TxnId>> {
            if on_path.contains(&vertex) {
                let start = path
                    .iter()
                    .position(|&v| v == vertex)
                    .expect("vertex is on the current path");
                return Some(path[start..].to_vec());
            }
            if !visited.insert(vertex) {
                return None;
            }
            path.push(vertex);
            on_path.insert(vertex);
            if let Some(neighbors) = graph.get(&vertex) {
                for &next in neighbors {
                    if let Some(cycle) = dfs(next, graph, path, on_path, visited) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            on_path.remove(&vertex);
            None
        }

        let mut visited = HashSet::new();
        for &start in graph.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(cycle) = dfs(start, graph, &mut path, &mut on_path, &mut visited) {
                return Some(cycle);
            }
        }
        None
    }

    fn broadcast_all(&self) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_lock_map.lock();
            let rows = self.row_lock_map.lock();
            tables.values().chain(rows.values()).cloned().collect()
        };
        for queue in queues {
            let _inner = queue.inner.lock();
            queue.cv.notify_all();
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn abort(&self, txn: &Transaction, reason: AbortReason) -> LockError {
        txn.set_state(TransactionState::Aborted);
        LockError::TransactionAborted {
            txn_id: txn.id(),
            reason,
        }
    }

    /// State/isolation preconditions for table locks.
    fn check_table_preconditions(&self, txn: &Transaction, mode: LockMode) -> Result<(), LockError> {
        use LockMode::*;
        match (txn.state(), txn.isolation_level()) {
            (TransactionState::Shrinking, IsolationLevel::RepeatableRead) => {
                Err(self.abort(txn, AbortReason::LockOnShrinking))
            }
            (TransactionState::Shrinking, IsolationLevel::ReadCommitted) => {
                if matches!(mode, IntentionShared | Shared) {
                    Ok(())
                } else {
                    Err(self.abort(txn, AbortReason::LockOnShrinking))
                }
            }
            (TransactionState::Shrinking, IsolationLevel::ReadUncommitted) => {
                if matches!(mode, Shared | IntentionShared) {
                    Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted))
                } else {
                    Err(self.abort(txn, AbortReason::LockOnShrinking))
                }
            }
            (_, IsolationLevel::ReadUncommitted) => {
                if matches!(mode, IntentionExclusive | Exclusive) {
                    Ok(())
                } else {
                    Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted))
                }
            }
            _ => Ok(()),
        }
    }

    /// State/isolation preconditions for row locks; mirrors the table rules
    /// restricted to S and X.
    fn check_row_preconditions(&self, txn: &Transaction, mode: LockMode) -> Result<(), LockError> {
        match (txn.state(), txn.isolation_level()) {
            (TransactionState::Shrinking, IsolationLevel::RepeatableRead) => {
                Err(self.abort(txn, AbortReason::LockOnShrinking))
            }
            (TransactionState::Shrinking, IsolationLevel::ReadCommitted) => {
                if mode == LockMode::Shared {
                    Ok(())
                } else {
                    Err(self.abort(txn, AbortReason::LockOnShrinking))
                }
            }
            (TransactionState::Shrinking, IsolationLevel::ReadUncommitted) => {
                if mode == LockMode::Shared {
                    Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted))
                } else {
                    Err(self.abort(txn, AbortReason::LockOnShrinking))
                }
            }
            (_, IsolationLevel::ReadUncommitted) => {
                if mode == LockMode::Exclusive {
                    Ok(())
                } else {
                    Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted))
                }
            }
            _ => Ok(()),
        }
    }

    /// A row lock needs backing at the table level: any table lock for an S
    /// row, one of {IX, SIX, X} for an X row.
    fn holds_sufficient_table_lock(&self, txn: &Transaction, oid: TableOid, mode: LockMode) -> bool {
        let Some(queue) = self.existing_table_queue(oid) else {
            return false;
        };
        let inner = queue.inner.lock();
        inner.requests.iter().any(|r| {
            r.txn_id == txn.id()
                && r.granted
                && match mode {
                    LockMode::Shared => true,
                    LockMode::Exclusive => matches!(
                        r.mode,
                        LockMode::IntentionExclusive
                            | LockMode::SharedIntentionExclusive
                            | LockMode::Exclusive
                    ),
                    _ => false,
                }
        })
    }

    /// A request is grantable iff its mode is compatible with every granted
    /// request and no other transaction is mid-upgrade in this queue.
    fn grantable(inner: &QueueInner, txn_id: TxnId, mode: LockMode) -> bool {
        if inner.upgrading != INVALID_TXN_ID && inner.upgrading != txn_id {
            return false;
        }
        inner
            .requests
            .iter()
            .filter(|r| r.granted)
            .all(|r| mode.compatible_with(r.mode))
    }

    fn grant(inner: &mut QueueInner, txn_id: TxnId) {
        if inner.upgrading == txn_id {
            inner.upgrading = INVALID_TXN_ID;
        }
        let request = inner
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && !r.granted)
            .expect("waiting request present");
        request.granted = true;
    }

    fn remove_waiting_request(inner: &mut QueueInner, txn_id: TxnId) {
        if let Some(pos) = inner
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id && !r.granted)
        {
            inner.requests.remove(pos);
        }
        if inner.upgrading == txn_id {
            inner.upgrading = INVALID_TXN_ID;
        }
    }

    /// Releasing S or X under REPEATABLE_READ, or X under the other two
    /// levels, moves a growing transaction into its shrinking phase.
    fn apply_unlock_transition(&self, txn: &Transaction, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        Arc::clone(
            map.entry(oid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn existing_table_queue(&self, oid: TableOid) -> Option<Arc<LockRequestQueue>> {
        self.table_lock_map.lock().get(&oid).cloned()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        Arc::clone(
            map.entry(rid)
                .or_insert_with(|| Arc::new(LockRequestQueue::new())),
        )
    }

    fn existing_row_queue(&self, rid: Rid) -> Option<Arc<LockRequestQueue>> {
        self.row_lock_map.lock().get(&rid).cloned()
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_deadlock_detection();
    }
}
