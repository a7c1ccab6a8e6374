use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Stored on disk as a little-endian i32.
pub type PageId = i32;

/// Sentinel meaning "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Page 0 holds the `{index name -> root page id}` records
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = i32;

/// Sentinel meaning "no transaction"
pub const INVALID_TXN_ID: TxnId = -1;

/// Table OID type
pub type TableOid = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Record ID: the physical address of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.page_id, self.slot)
    }
}

/// Page structure
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload and forget the identity
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

/// Smart pointer to a page. The RwLock doubles as the page latch used by
/// index operations while the page is resident.
pub type PagePtr = Arc<RwLock<Page>>;
