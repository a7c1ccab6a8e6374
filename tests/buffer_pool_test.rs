use anyhow::Result;

use karstdb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page_ids_are_sequential() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, first) = buffer_pool.new_page()?;
    let (_, second) = buffer_pool.new_page()?;
    assert_eq!(first, 0);
    assert_eq!(second, 1);

    buffer_pool.unpin_page(first, false)?;
    buffer_pool.unpin_page(second, false)?;
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[100..109].copy_from_slice(b"Test Data");
    }
    buffer_pool.unpin_page(page_id, true)?;

    // Churn through enough pages to evict the first one.
    for _ in 0..4 {
        let (_, id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(id, false)?;
    }

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let guard = fetched.read();
        assert_eq!(&guard.data[100..109], b"Test Data");
        assert_eq!(guard.page_id, page_id);
    }
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_pool_exhaustion_and_recovery() -> Result<()> {
    // Mirrors the two-frame scenario: pin both frames, fail a third
    // allocation, then unpin and watch the dirty evictee reach disk.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (page0, id0) = buffer_pool.new_page()?;
    let (_page1, id1) = buffer_pool.new_page()?;
    assert_eq!(id0, 0);
    assert_eq!(id1, 1);

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::PoolExhausted)
    ));

    {
        let mut guard = page0.write();
        guard.data[0..6].copy_from_slice(b"page 0");
    }
    buffer_pool.unpin_page(id0, true)?;

    let writes_before = buffer_pool.disk_manager().num_writes();
    let (_page2, id2) = buffer_pool.new_page()?;
    assert_eq!(id2, 2);
    // The frame that held page 0 was dirty, so eviction wrote it out.
    assert!(buffer_pool.disk_manager().num_writes() > writes_before);

    // Page 0 reads back from disk with its contents intact.
    buffer_pool.unpin_page(id1, false)?;
    let fetched = buffer_pool.fetch_page(id0)?;
    {
        let guard = fetched.read();
        assert_eq!(&guard.data[0..6], b"page 0");
    }
    buffer_pool.unpin_page(id0, false)?;
    Ok(())
}

#[test]
fn test_unpin_errors() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    // Not resident at all.
    assert!(matches!(
        buffer_pool.unpin_page(99, false),
        Err(BufferPoolError::PageNotFound(99))
    ));

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;
    // Already at pin count zero.
    assert!(matches!(
        buffer_pool.unpin_page(page_id, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));
    Ok(())
}

#[test]
fn test_pin_count_tracks_fetches() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    let _again = buffer_pool.fetch_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(2));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));
    Ok(())
}

#[test]
fn test_flush_clears_dirty_state() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[0..5].copy_from_slice(b"fsync");
    }
    buffer_pool.unpin_page(page_id, true)?;
    buffer_pool.flush_page(page_id)?;

    // Round-trip through disk.
    let mut buf = [0u8; karstdb::common::types::PAGE_SIZE];
    buffer_pool.disk_manager().read_page(page_id, &mut buf)?;
    assert_eq!(&buf[0..5], b"fsync");
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(8)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut guard = page.write();
            guard.data[0] = i;
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }
    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let mut buf = [0u8; karstdb::common::types::PAGE_SIZE];
        buffer_pool.disk_manager().read_page(page_id, &mut buf)?;
        assert_eq!(buf[0], i as u8);
    }
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // Pinned pages cannot be deleted.
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), None);

    // Deleting a non-resident page succeeds as a no-op.
    buffer_pool.delete_page(page_id)?;
    buffer_pool.delete_page(12345)?;
    Ok(())
}

#[test]
fn test_fully_pinned_pool_recovers_after_unpin() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (_, a) = buffer_pool.new_page()?;
    let (_, b) = buffer_pool.new_page()?;
    assert!(matches!(
        buffer_pool.fetch_page(999),
        Err(BufferPoolError::PoolExhausted)
    ));
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::PoolExhausted)
    ));

    buffer_pool.unpin_page(a, false)?;
    let (_, c) = buffer_pool.new_page()?;
    assert!(c > b);
    Ok(())
}
