use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use karstdb::storage::buffer::BufferPoolManager;
use karstdb::storage::disk::DiskManager;
use karstdb::transaction::concurrency::LockManager;
use karstdb::transaction::wal::LogManager;
use karstdb::transaction::TransactionManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    create_test_buffer_pool_k(pool_size, 2)
}

#[allow(dead_code)]
pub fn create_test_buffer_pool_k(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, disk_manager)?);
    Ok((buffer_pool, file))
}

// Transaction manager wired to a lock manager over a temp log file
#[allow(dead_code)]
pub fn create_test_txn_manager() -> Result<(TransactionManager, Arc<LockManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let log_manager = Arc::new(LogManager::new(disk_manager));
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(log_manager, Arc::clone(&lock_manager));
    Ok((txn_manager, lock_manager, file))
}
