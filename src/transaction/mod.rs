pub mod concurrency;
pub mod wal;

pub use concurrency::{
    IsolationLevel, LockManager, LockMode, Transaction, TransactionError, TransactionManager,
    TransactionState,
};
pub use wal::log_manager::LogManager;
