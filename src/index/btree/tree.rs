use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, MutexGuard, RawRwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header;
use crate::index::btree::iterator::BPlusTreeIter;
use crate::index::btree::page::{
    deserialize_node, serialize_node, set_parent_in_page, BTreeNode, NodePayload,
};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

pub(crate) type PageReadGuard = ArcRwLockReadGuard<RawRwLock, crate::common::types::Page>;
pub(crate) type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, crate::common::types::Page>;

type RootGuard<'a> = MutexGuard<'a, PageId>;

/// A write-latched, pinned page together with its deserialized node.
/// Serialized back and unpinned on release when marked dirty.
struct LatchedNode<K> {
    page_id: PageId,
    guard: PageWriteGuard,
    node: BTreeNode<K>,
    dirty: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum WriteOp {
    Insert,
    Delete,
}

enum ReadTarget<'a, K> {
    Key(&'a K),
    Leftmost,
}

/// Persistent B+Tree index. Pages live in the buffer pool; every page's
/// RwLock is its latch and descents crab down the tree, keeping ancestor
/// write latches only while a child might split or underflow.
///
/// The root mutex guards `root_page_id` and is the first latch taken by any
/// operation that might install a new root.
pub struct BPlusTree<K> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: Mutex<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _phantom: PhantomData<fn(K) -> K>,
}

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
{
    /// Open or create the index named `index_name`. On a fresh database
    /// file this materializes the header page; on an existing one the root
    /// recorded under the name is picked up.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        debug_assert!(leaf_max_size >= 2 && internal_max_size >= 3);
        let index_name = index_name.into();

        if buffer_pool.disk_manager().num_pages().map_err(BufferPoolError::from)? == 0 {
            let (_page, page_id) = buffer_pool.new_page()?;
            debug_assert_eq!(page_id, HEADER_PAGE_ID);
            buffer_pool.unpin_page(page_id, true)?;
            buffer_pool.flush_page(page_id)?;
        }

        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let existing = {
            let guard = header_page.read();
            header::find_root(&guard, &index_name)
        };
        let root = match existing {
            Some(id) => id,
            None => {
                let mut guard = header_page.write();
                header::set_root(&mut guard, &index_name, INVALID_PAGE_ID)?;
                INVALID_PAGE_ID
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, existing.is_none())?;

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Mutex::new(root),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let Some((page_id, guard)) = self.find_leaf_read(ReadTarget::Key(key))? else {
            return Ok(None);
        };
        let node = deserialize_node::<K>(&guard)?;
        let result = node.leaf_lookup(key);
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false)?;
        Ok(result)
    }

    /// Insert a unique key. Returns false (tree unchanged) for duplicates.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_guard = Some(self.root_page_id.lock());

        if **root_guard.as_ref().expect("root latch") == INVALID_PAGE_ID {
            // Empty tree: start a new root leaf while still holding the
            // root latch, then fall through to the ordinary descent.
            let (page, page_id) = self.buffer_pool.new_page()?;
            let node: BTreeNode<K> =
                BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            {
                let mut guard = page.write();
                serialize_node(&node, &mut guard)?;
            }
            self.buffer_pool.unpin_page(page_id, true)?;
            **root_guard.as_mut().expect("root latch") = page_id;
            self.update_root_record(page_id)?;
        }

        let mut chain = self.descend_for_write(&key, WriteOp::Insert, &mut root_guard)?;

        let inserted = {
            let leaf = chain.last_mut().expect("descent reaches a leaf");
            if leaf.node.leaf_insert(key, rid) {
                leaf.dirty = true;
                true
            } else {
                false
            }
        };
        if inserted && chain.last().expect("leaf").node.size() >= self.leaf_max_size as usize {
            self.split_and_propagate(&mut chain, &mut root_guard)?;
        }
        self.release_chain(&mut chain)?;
        Ok(inserted)
    }

    /// Remove a key. Removing a missing key is a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut root_guard = Some(self.root_page_id.lock());
        if **root_guard.as_ref().expect("root latch") == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut chain = self.descend_for_write(key, WriteOp::Delete, &mut root_guard)?;

        {
            let leaf = chain.last_mut().expect("descent reaches a leaf");
            if !leaf.node.leaf_remove(key) {
                self.release_chain(&mut chain)?;
                return Ok(());
            }
            leaf.dirty = true;
        }
        self.handle_underflow(&mut chain, &mut root_guard)?;
        self.release_chain(&mut chain)?;
        Ok(())
    }

    /// Iterator positioned at the leftmost entry.
    pub fn iter(&self) -> Result<BPlusTreeIter<K>, BTreeError> {
        match self.find_leaf_read(ReadTarget::Leftmost)? {
            Some((page_id, guard)) => {
                let node = deserialize_node::<K>(&guard)?;
                Ok(BPlusTreeIter::new(
                    Arc::clone(&self.buffer_pool),
                    Some((page_id, guard, node)),
                    0,
                ))
            }
            None => Ok(BPlusTreeIter::empty(Arc::clone(&self.buffer_pool))),
        }
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<BPlusTreeIter<K>, BTreeError> {
        match self.find_leaf_read(ReadTarget::Key(key))? {
            Some((page_id, guard)) => {
                let node = deserialize_node::<K>(&guard)?;
                let index = match &node.payload {
                    NodePayload::Leaf { entries, .. } => {
                        entries.partition_point(|(k, _)| k < key)
                    }
                    NodePayload::Internal { .. } => {
                        return Err(BTreeError::InvalidPageFormat(page_id))
                    }
                };
                Ok(BPlusTreeIter::new(
                    Arc::clone(&self.buffer_pool),
                    Some((page_id, guard, node)),
                    index,
                ))
            }
            None => Ok(BPlusTreeIter::empty(Arc::clone(&self.buffer_pool))),
        }
    }

    // ------------------------------------------------------------------
    // Descents
    // ------------------------------------------------------------------

    /// Read crabbing: latch the child, then release the parent.
    fn find_leaf_read(
        &self,
        target: ReadTarget<'_, K>,
    ) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        let root_latch = self.root_page_id.lock();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let page = self.buffer_pool.fetch_page(root_id)?;
        let mut guard = page.read_arc();
        drop(root_latch);
        let mut page_id = root_id;

        loop {
            let node = deserialize_node::<K>(&guard)?;
            if node.is_leaf() {
                return Ok(Some((page_id, guard)));
            }
            let child_id = match &target {
                ReadTarget::Key(key) => node.child_at(node.child_index(key)),
                ReadTarget::Leftmost => node.child_at(0),
            };
            // Pin the child before latching it, then hand over the latch.
            let child_page = self.buffer_pool.fetch_page(child_id)?;
            let child_guard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            guard = child_guard;
            page_id = child_id;
        }
    }

    /// Write crabbing: keep the whole ancestor chain latched until a child
    /// proves safe for the operation, then release everything above it.
    fn descend_for_write<'a>(
        &'a self,
        key: &K,
        op: WriteOp,
        root_guard: &mut Option<RootGuard<'a>>,
    ) -> Result<Vec<LatchedNode<K>>, BTreeError> {
        let root_id = **root_guard.as_ref().expect("root latch");
        let page = self.buffer_pool.fetch_page(root_id)?;
        let guard = page.write_arc();
        let node = deserialize_node::<K>(&guard)?;
        let mut chain = vec![LatchedNode {
            page_id: root_id,
            guard,
            node,
            dirty: false,
        }];

        loop {
            let last = chain.last().expect("chain is never empty");
            if last.node.is_leaf() {
                return Ok(chain);
            }
            let child_id = last.node.child_at(last.node.child_index(key));
            let child_page = self.buffer_pool.fetch_page(child_id)?;
            let child_guard = child_page.write_arc();
            let child_node = deserialize_node::<K>(&child_guard)?;
            let safe = match op {
                WriteOp::Insert => child_node.insert_safe(),
                WriteOp::Delete => child_node.delete_safe(),
            };
            chain.push(LatchedNode {
                page_id: child_id,
                guard: child_guard,
                node: child_node,
                dirty: false,
            });
            if safe {
                let child = chain.pop().expect("just pushed");
                self.release_chain(&mut chain)?;
                *root_guard = None;
                chain.push(child);
            }
        }
    }

    // ------------------------------------------------------------------
    // Structure modifications
    // ------------------------------------------------------------------

    /// Split the overfull leaf at the chain tail and push separators up
    /// through the latched ancestors, growing a new root if needed.
    fn split_and_propagate(
        &self,
        chain: &mut Vec<LatchedNode<K>>,
        root_guard: &mut Option<RootGuard<'_>>,
    ) -> Result<(), BTreeError> {
        let mut level = chain.len() - 1;

        // Leaf split: right half moves to a fresh page linked after us.
        let (new_page, new_page_id) = self.buffer_pool.new_page()?;
        let mut right: BTreeNode<K> =
            BTreeNode::new_leaf(new_page_id, INVALID_PAGE_ID, self.leaf_max_size);
        let sep = {
            let leaf = chain.last_mut().expect("leaf");
            let NodePayload::Leaf {
                next_page_id,
                entries,
            } = &mut leaf.node.payload
            else {
                unreachable!("split_and_propagate starts at a leaf");
            };
            let split_at = entries.len() / 2;
            let moved = entries.split_off(split_at);
            let NodePayload::Leaf {
                next_page_id: right_next,
                entries: right_entries,
            } = &mut right.payload
            else {
                unreachable!();
            };
            *right_next = *next_page_id;
            *right_entries = moved;
            *next_page_id = new_page_id;
            leaf.dirty = true;
            match &right.payload {
                NodePayload::Leaf { entries, .. } => entries[0].0.clone(),
                NodePayload::Internal { .. } => unreachable!(),
            }
        };

        let mut pending = Some((sep, new_page_id, right, new_page));

        while let Some((sep, right_id, mut right_node, right_page)) = pending.take() {
            if chain[level].node.parent_page_id == INVALID_PAGE_ID {
                // The split node is the root: grow a new root above it.
                let (root_page, root_id) = self.buffer_pool.new_page()?;
                let mut root: BTreeNode<K> =
                    BTreeNode::new_internal(root_id, INVALID_PAGE_ID, self.internal_max_size);
                if let NodePayload::Internal { keys, children } = &mut root.payload {
                    children.push(chain[level].page_id);
                    keys.push(sep);
                    children.push(right_id);
                }
                chain[level].node.parent_page_id = root_id;
                chain[level].dirty = true;
                right_node.parent_page_id = root_id;
                {
                    let mut guard = right_page.write();
                    serialize_node(&right_node, &mut guard)?;
                }
                self.buffer_pool.unpin_page(right_id, true)?;
                {
                    let mut guard = root_page.write();
                    serialize_node(&root, &mut guard)?;
                }
                self.buffer_pool.unpin_page(root_id, true)?;

                **root_guard
                    .as_mut()
                    .expect("root latch must be held for a root split") = root_id;
                self.update_root_record(root_id)?;
                return Ok(());
            }

            // The parent is latched right above us in the chain.
            let parent_idx = level - 1;
            debug_assert_eq!(chain[parent_idx].page_id, chain[level].node.parent_page_id);
            right_node.parent_page_id = chain[parent_idx].page_id;
            {
                let mut guard = right_page.write();
                serialize_node(&right_node, &mut guard)?;
            }
            self.buffer_pool.unpin_page(right_id, true)?;

            let parent = &mut chain[parent_idx];
            parent.node.internal_insert(sep, right_id);
            parent.dirty = true;
            if parent.node.size() > self.internal_max_size as usize {
                pending = Some(self.split_internal(parent_idx, chain)?);
            }
            level = parent_idx;
        }
        Ok(())
    }

    /// Split the overfull internal node at `chain[idx]`, re-parenting every
    /// moved child, and return the separator and right node to insert one
    /// level up.
    fn split_internal(
        &self,
        idx: usize,
        chain: &mut Vec<LatchedNode<K>>,
    ) -> Result<(K, PageId, BTreeNode<K>, crate::common::types::PagePtr), BTreeError> {
        let (new_page, new_id) = self.buffer_pool.new_page()?;

        let (push_up, right_keys, right_children) = {
            let node = &mut chain[idx].node;
            let left_children = (node.max_size as usize + 1).div_ceil(2);
            let NodePayload::Internal { keys, children } = &mut node.payload else {
                unreachable!("split_internal on a leaf");
            };
            let right_children = children.split_off(left_children);
            let mut right_keys = keys.split_off(left_children - 1);
            let push_up = right_keys.remove(0);
            (push_up, right_keys, right_children)
        };
        chain[idx].dirty = true;

        // Children that moved right now belong to the new page. The one on
        // our own descent path is updated through its latched chain entry;
        // the rest get their parent pointer rewritten in place.
        for &child_id in &right_children {
            if let Some(pos) = chain.iter().position(|n| n.page_id == child_id) {
                chain[pos].node.parent_page_id = new_id;
                chain[pos].dirty = true;
            } else {
                let child_page = self.buffer_pool.fetch_page(child_id)?;
                {
                    let mut guard = child_page.write();
                    set_parent_in_page(&mut guard, new_id);
                }
                self.buffer_pool.unpin_page(child_id, true)?;
            }
        }

        let mut right: BTreeNode<K> =
            BTreeNode::new_internal(new_id, INVALID_PAGE_ID, self.internal_max_size);
        if let NodePayload::Internal { keys, children } = &mut right.payload {
            *keys = right_keys;
            *children = right_children;
        }
        Ok((push_up, new_id, right, new_page))
    }

    /// Resolve underflow at the chain tail, merging or redistributing with
    /// a sibling and walking up as merges shrink the parent.
    fn handle_underflow(
        &self,
        chain: &mut Vec<LatchedNode<K>>,
        root_guard: &mut Option<RootGuard<'_>>,
    ) -> Result<(), BTreeError> {
        loop {
            let current = chain.last().expect("chain is never empty");

            if current.node.parent_page_id == INVALID_PAGE_ID {
                self.shrink_root(chain, root_guard)?;
                return Ok(());
            }
            if current.node.size() >= current.node.min_size() {
                return Ok(());
            }

            let merged = self.merge_or_redistribute(chain)?;
            if !merged {
                return Ok(());
            }
            // A merge removed a separator from the parent, which may now
            // underflow itself; continue one level up.
        }
    }

    /// Root special cases after a delete: an empty leaf root empties the
    /// tree; an internal root with a single child hands the root to it.
    fn shrink_root(
        &self,
        chain: &mut Vec<LatchedNode<K>>,
        root_guard: &mut Option<RootGuard<'_>>,
    ) -> Result<(), BTreeError> {
        let root = chain.last().expect("root");

        if root.node.is_leaf() && root.node.size() == 0 {
            let node = chain.pop().expect("root");
            let page_id = node.page_id;
            drop(node.guard);
            self.buffer_pool.unpin_page(page_id, true)?;
            self.delete_page_best_effort(page_id)?;

            **root_guard.as_mut().expect("root latch held") = INVALID_PAGE_ID;
            self.update_root_record(INVALID_PAGE_ID)?;
            return Ok(());
        }

        if !root.node.is_leaf() && root.node.size() == 1 {
            let node = chain.pop().expect("root");
            let new_root_id = node.node.child_at(0);
            let page_id = node.page_id;
            drop(node.guard);
            self.buffer_pool.unpin_page(page_id, true)?;
            self.delete_page_best_effort(page_id)?;

            let child_page = self.buffer_pool.fetch_page(new_root_id)?;
            {
                let mut guard = child_page.write();
                set_parent_in_page(&mut guard, INVALID_PAGE_ID);
            }
            self.buffer_pool.unpin_page(new_root_id, true)?;

            **root_guard.as_mut().expect("root latch held") = new_root_id;
            self.update_root_record(new_root_id)?;
        }
        Ok(())
    }

    /// Merge the underflowing chain tail with a sibling when both fit in
    /// one page (returns true, with the separator removed from the parent),
    /// or move one entry over from the richer sibling (returns false).
    fn merge_or_redistribute(&self, chain: &mut Vec<LatchedNode<K>>) -> Result<bool, BTreeError> {
        let parent_idx = chain.len() - 2;
        let current_id = chain.last().expect("current").page_id;

        // Locate ourselves in the parent; prefer the left sibling.
        let (sep_idx, sibling_id, sibling_is_pred) = {
            let NodePayload::Internal { keys: _, children } = &chain[parent_idx].node.payload
            else {
                unreachable!("parent of a latched child is internal");
            };
            let pos = children
                .iter()
                .position(|&c| c == current_id)
                .expect("child missing from its parent");
            if pos > 0 {
                (pos - 1, children[pos - 1], true)
            } else {
                (pos, children[pos + 1], false)
            }
        };
        let sep_key = {
            let NodePayload::Internal { keys, .. } = &chain[parent_idx].node.payload else {
                unreachable!();
            };
            keys[sep_idx].clone()
        };

        let sibling_page = self.buffer_pool.fetch_page(sibling_id)?;
        let sibling_guard = sibling_page.write_arc();
        let mut sibling_node = deserialize_node::<K>(&sibling_guard)?;

        let max_size = chain.last().expect("current").node.max_size as usize;
        if sibling_node.size() + chain.last().expect("current").node.size() <= max_size {
            self.merge_into_left(chain, sibling_guard, sibling_node, sibling_is_pred, &sep_key)?;
            let parent = chain.last_mut().expect("parent");
            parent.node.internal_remove(&sep_key);
            parent.dirty = true;
            Ok(true)
        } else {
            self.redistribute(
                chain,
                &mut sibling_node,
                sibling_is_pred,
                sep_idx,
                sep_key,
            )?;
            let mut sibling_guard = sibling_guard;
            serialize_node(&sibling_node, &mut sibling_guard)?;
            drop(sibling_guard);
            self.buffer_pool.unpin_page(sibling_id, true)?;
            Ok(false)
        }
    }

    /// Concatenate right into left, splice the leaf chain, delete the
    /// absorbed page. Pops the current node off the chain either way.
    fn merge_into_left(
        &self,
        chain: &mut Vec<LatchedNode<K>>,
        sibling_guard: PageWriteGuard,
        sibling_node: BTreeNode<K>,
        sibling_is_pred: bool,
        sep_key: &K,
    ) -> Result<(), BTreeError> {
        let current = chain.pop().expect("current");
        let sibling_id = sibling_node.page_id;

        let (mut left_node, mut left_guard, left_id, mut right_node, right_guard, right_id) =
            if sibling_is_pred {
                (
                    sibling_node,
                    sibling_guard,
                    sibling_id,
                    current.node,
                    current.guard,
                    current.page_id,
                )
            } else {
                (
                    current.node,
                    current.guard,
                    current.page_id,
                    sibling_node,
                    sibling_guard,
                    sibling_id,
                )
            };

        match (&mut left_node.payload, &mut right_node.payload) {
            (
                NodePayload::Leaf {
                    next_page_id: left_next,
                    entries: left_entries,
                },
                NodePayload::Leaf {
                    next_page_id: right_next,
                    entries: right_entries,
                },
            ) => {
                left_entries.append(right_entries);
                *left_next = *right_next;
            }
            (
                NodePayload::Internal {
                    keys: left_keys,
                    children: left_children,
                },
                NodePayload::Internal {
                    keys: right_keys,
                    children: right_children,
                },
            ) => {
                // The separator comes down between the two halves; absorbed
                // children change parents.
                left_keys.push(sep_key.clone());
                left_keys.append(right_keys);
                for &child_id in right_children.iter() {
                    let child_page = self.buffer_pool.fetch_page(child_id)?;
                    {
                        let mut guard = child_page.write();
                        set_parent_in_page(&mut guard, left_id);
                    }
                    self.buffer_pool.unpin_page(child_id, true)?;
                }
                left_children.append(right_children);
            }
            _ => unreachable!("merging siblings of different kinds"),
        }

        serialize_node(&left_node, &mut left_guard)?;
        drop(left_guard);
        self.buffer_pool.unpin_page(left_id, true)?;

        drop(right_guard);
        self.buffer_pool.unpin_page(right_id, true)?;
        self.delete_page_best_effort(right_id)?;
        Ok(())
    }

    /// Drop a structurally unreachable page from the pool. A concurrent
    /// reader may still hold a pin on it; the page is then merely orphaned.
    fn delete_page_best_effort(&self, page_id: PageId) -> Result<(), BTreeError> {
        match self.buffer_pool.delete_page(page_id) {
            Ok(()) | Err(BufferPoolError::PagePinned(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move one entry from the richer sibling to the deficit node and fix
    /// the separator in the parent. Current stays on the chain.
    fn redistribute(
        &self,
        chain: &mut Vec<LatchedNode<K>>,
        sibling_node: &mut BTreeNode<K>,
        sibling_is_pred: bool,
        sep_idx: usize,
        sep_key: K,
    ) -> Result<(), BTreeError> {
        let chain_len = chain.len();
        let (parent_and_rest, current_slice) = chain.split_at_mut(chain_len - 1);
        let parent = parent_and_rest.last_mut().expect("parent");
        let current = &mut current_slice[0];

        let new_sep: K = match (&mut current.node.payload, &mut sibling_node.payload) {
            (
                NodePayload::Leaf { entries, .. },
                NodePayload::Leaf {
                    entries: sib_entries,
                    ..
                },
            ) => {
                if sibling_is_pred {
                    let moved = sib_entries.pop().expect("donor sibling is not empty");
                    let new_sep = moved.0.clone();
                    entries.insert(0, moved);
                    new_sep
                } else {
                    let moved = sib_entries.remove(0);
                    entries.push(moved);
                    sib_entries[0].0.clone()
                }
            }
            (
                NodePayload::Internal { keys, children },
                NodePayload::Internal {
                    keys: sib_keys,
                    children: sib_children,
                },
            ) => {
                if sibling_is_pred {
                    let moved_child = sib_children.pop().expect("donor sibling is not empty");
                    let moved_key = sib_keys.pop().expect("donor sibling has keys");
                    children.insert(0, moved_child);
                    keys.insert(0, sep_key);
                    self.reparent(moved_child, current.node.page_id)?;
                    moved_key
                } else {
                    let moved_child = sib_children.remove(0);
                    let moved_key = sib_keys.remove(0);
                    children.push(moved_child);
                    keys.push(sep_key);
                    self.reparent(moved_child, current.node.page_id)?;
                    moved_key
                }
            }
            _ => unreachable!("redistributing between siblings of different kinds"),
        };

        let NodePayload::Internal { keys, .. } = &mut parent.node.payload else {
            unreachable!("parent is internal");
        };
        keys[sep_idx] = new_sep;
        parent.dirty = true;
        current.dirty = true;
        Ok(())
    }

    fn reparent(&self, child_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        let child_page = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut guard = child_page.write();
            set_parent_in_page(&mut guard, parent_id);
        }
        self.buffer_pool.unpin_page(child_id, true)?;
        Ok(())
    }

    /// Release every latched node, deepest first, writing back dirty ones.
    fn release_chain(&self, chain: &mut Vec<LatchedNode<K>>) -> Result<(), BTreeError> {
        while let Some(mut latched) = chain.pop() {
            if latched.dirty {
                serialize_node(&latched.node, &mut latched.guard)?;
            }
            let page_id = latched.page_id;
            let dirty = latched.dirty;
            drop(latched.guard);
            self.buffer_pool.unpin_page(page_id, dirty)?;
        }
        Ok(())
    }

    /// Rewrite this index's `{name -> root}` record on the header page.
    fn update_root_record(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header_page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = header_page.write();
            header::set_root(&mut guard, &self.index_name, root_page_id)?;
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }
}
