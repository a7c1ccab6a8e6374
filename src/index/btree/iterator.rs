use std::sync::Arc;

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::page::{deserialize_node, BTreeNode, NodePayload};
use crate::index::btree::tree::PageReadGuard;
use crate::storage::buffer::BufferPoolManager;

struct LeafCursor<K> {
    page_id: PageId,
    // The read latch is held for as long as the iterator sits on this leaf;
    // it is dropped before the sibling leaf is latched.
    guard: PageReadGuard,
    node: BTreeNode<K>,
}

/// Forward-only range iterator over the leaf chain. Yields `(key, rid)`
/// pairs in key order; ends when the rightmost leaf is exhausted.
pub struct BPlusTreeIter<K> {
    buffer_pool: Arc<BufferPoolManager>,
    cursor: Option<LeafCursor<K>>,
    index: usize,
}

impl<K> BPlusTreeIter<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        position: Option<(PageId, PageReadGuard, BTreeNode<K>)>,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            cursor: position.map(|(page_id, guard, node)| LeafCursor {
                page_id,
                guard,
                node,
            }),
            index,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            cursor: None,
            index: 0,
        }
    }

    fn release_cursor(&mut self) -> Result<(), BTreeError> {
        if let Some(cursor) = self.cursor.take() {
            let page_id = cursor.page_id;
            drop(cursor.guard);
            self.buffer_pool.unpin_page(page_id, false)?;
        }
        Ok(())
    }
}

impl<K> Iterator for BPlusTreeIter<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let cursor = self.cursor.as_ref()?;
            let NodePayload::Leaf {
                next_page_id,
                entries,
            } = &cursor.node.payload
            else {
                return Some(Err(BTreeError::InvalidPageFormat(cursor.page_id)));
            };

            if self.index < entries.len() {
                let entry = entries[self.index].clone();
                self.index += 1;
                return Some(Ok(entry));
            }

            // End of this leaf: release it, then move along the sibling
            // chain.
            let next_id = *next_page_id;
            if let Err(e) = self.release_cursor() {
                return Some(Err(e));
            }
            if next_id == INVALID_PAGE_ID {
                return None;
            }

            let page = match self.buffer_pool.fetch_page(next_id) {
                Ok(page) => page,
                Err(e) => return Some(Err(e.into())),
            };
            let guard = page.read_arc();
            let node = match deserialize_node::<K>(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(next_id, false);
                    return Some(Err(e));
                }
            };
            self.cursor = Some(LeafCursor {
                page_id: next_id,
                guard,
                node,
            });
            self.index = 0;
        }
    }
}

impl<K> Drop for BPlusTreeIter<K> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            let page_id = cursor.page_id;
            drop(cursor.guard);
            if let Err(e) = self.buffer_pool.unpin_page(page_id, false) {
                warn!("failed to unpin iterator leaf {}: {}", page_id, e);
            }
        }
    }
}
