pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

pub use lock_manager::{AbortReason, LockError, LockManager, LockMode, CYCLE_DETECTION_INTERVAL};
pub use transaction::{IsolationLevel, Transaction, TransactionError, TransactionState};
pub use transaction_manager::TransactionManager;
