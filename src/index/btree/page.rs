use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;

// Common header layout, 24 bytes:
//   page_type: u32, lsn: u32, size: u32, max_size: u32,
//   parent_page_id: i32, page_id: i32
pub const NODE_HEADER_SIZE: usize = 24;
// Leaf pages reserve 4 bytes after the header for next_page_id.
pub const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 4;

const PAGE_TYPE_LEAF: u32 = 1;
const PAGE_TYPE_INTERNAL: u32 = 2;

/// In-memory form of a B+Tree page. The two flavors share the common header
/// fields and are distinguished by the payload variant.
pub struct BTreeNode<K> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub max_size: u32,
    pub payload: NodePayload<K>,
}

pub enum NodePayload<K> {
    /// Sorted `(key, rid)` pairs plus the sibling link.
    Leaf {
        next_page_id: PageId,
        entries: Vec<(K, Rid)>,
    },
    /// `children.len() == keys.len() + 1`; `keys[i]` separates
    /// `children[i]` and `children[i + 1]`.
    Internal {
        keys: Vec<K>,
        children: Vec<PageId>,
    },
}

impl<K: Ord + Clone> BTreeNode<K> {
    pub fn new_leaf(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        Self {
            page_id,
            parent_page_id,
            max_size,
            payload: NodePayload::Leaf {
                next_page_id: INVALID_PAGE_ID,
                entries: Vec::new(),
            },
        }
    }

    pub fn new_internal(page_id: PageId, parent_page_id: PageId, max_size: u32) -> Self {
        Self {
            page_id,
            parent_page_id,
            max_size,
            payload: NodePayload::Internal {
                keys: Vec::new(),
                children: Vec::new(),
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.payload, NodePayload::Leaf { .. })
    }

    /// Number of key/value pairs (leaf) or child pointers (internal).
    pub fn size(&self) -> usize {
        match &self.payload {
            NodePayload::Leaf { entries, .. } => entries.len(),
            NodePayload::Internal { children, .. } => children.len(),
        }
    }

    /// Minimum size of a non-root page.
    pub fn min_size(&self) -> usize {
        (self.max_size as usize).div_ceil(2)
    }

    /// True when one more insert cannot overflow this page.
    pub fn insert_safe(&self) -> bool {
        self.size() < self.max_size as usize - 1
    }

    /// True when one removal cannot underflow this page.
    pub fn delete_safe(&self) -> bool {
        self.size() > self.min_size()
    }

    /// The child to follow looking for `key`: the greatest separator that is
    /// less than or equal to the target wins; equal keys go right.
    pub fn child_index(&self, key: &K) -> usize {
        match &self.payload {
            NodePayload::Internal { keys, .. } => match keys.binary_search(key) {
                Ok(i) => i + 1,
                Err(i) => i,
            },
            NodePayload::Leaf { .. } => unreachable!("child_index on a leaf"),
        }
    }

    pub fn child_at(&self, index: usize) -> PageId {
        match &self.payload {
            NodePayload::Internal { children, .. } => children[index],
            NodePayload::Leaf { .. } => unreachable!("child_at on a leaf"),
        }
    }

    /// Point lookup within a leaf.
    pub fn leaf_lookup(&self, key: &K) -> Option<Rid> {
        match &self.payload {
            NodePayload::Leaf { entries, .. } => entries
                .binary_search_by(|(k, _)| k.cmp(key))
                .ok()
                .map(|i| entries[i].1),
            NodePayload::Internal { .. } => unreachable!("leaf_lookup on an internal page"),
        }
    }

    /// Sorted insert into a leaf. Returns false for a duplicate key.
    pub fn leaf_insert(&mut self, key: K, rid: Rid) -> bool {
        match &mut self.payload {
            NodePayload::Leaf { entries, .. } => {
                match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                    Ok(_) => false,
                    Err(pos) => {
                        entries.insert(pos, (key, rid));
                        true
                    }
                }
            }
            NodePayload::Internal { .. } => unreachable!("leaf_insert on an internal page"),
        }
    }

    /// Remove `key` from a leaf. Returns false if absent.
    pub fn leaf_remove(&mut self, key: &K) -> bool {
        match &mut self.payload {
            NodePayload::Leaf { entries, .. } => {
                match entries.binary_search_by(|(k, _)| k.cmp(key)) {
                    Ok(pos) => {
                        entries.remove(pos);
                        true
                    }
                    Err(_) => false,
                }
            }
            NodePayload::Internal { .. } => unreachable!("leaf_remove on an internal page"),
        }
    }

    /// Insert a separator and the child to its right, keeping keys sorted.
    pub fn internal_insert(&mut self, key: K, child: PageId) {
        match &mut self.payload {
            NodePayload::Internal { keys, children } => {
                let pos = match keys.binary_search(&key) {
                    Ok(i) => i,
                    Err(i) => i,
                };
                keys.insert(pos, key);
                children.insert(pos + 1, child);
            }
            NodePayload::Leaf { .. } => unreachable!("internal_insert on a leaf"),
        }
    }

    /// Remove separator `key` and the child pointer to its right.
    pub fn internal_remove(&mut self, key: &K) -> bool {
        match &mut self.payload {
            NodePayload::Internal { keys, children } => match keys.binary_search(key) {
                Ok(pos) => {
                    keys.remove(pos);
                    children.remove(pos + 1);
                    true
                }
                Err(_) => false,
            },
            NodePayload::Leaf { .. } => unreachable!("internal_remove on a leaf"),
        }
    }
}

/// Serialize a node into the page bytes it lives in.
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize,
{
    page.data.fill(0);

    let (page_type, size) = match &node.payload {
        NodePayload::Leaf { entries, .. } => (PAGE_TYPE_LEAF, entries.len()),
        NodePayload::Internal { children, .. } => (PAGE_TYPE_INTERNAL, children.len()),
    };
    LittleEndian::write_u32(&mut page.data[0..4], page_type);
    LittleEndian::write_u32(&mut page.data[4..8], page.lsn as u32);
    LittleEndian::write_u32(&mut page.data[8..12], size as u32);
    LittleEndian::write_u32(&mut page.data[12..16], node.max_size);
    LittleEndian::write_i32(&mut page.data[16..20], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[20..24], node.page_id);

    match &node.payload {
        NodePayload::Leaf {
            next_page_id,
            entries,
        } => {
            LittleEndian::write_i32(&mut page.data[24..28], *next_page_id);
            let mut offset = LEAF_HEADER_SIZE;
            for (key, rid) in entries {
                offset = write_key(page, offset, key)?;
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], rid.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], rid.slot);
                offset += 8;
            }
        }
        NodePayload::Internal { keys, children } => {
            let mut offset = NODE_HEADER_SIZE;
            for (i, child) in children.iter().enumerate() {
                // Slot 0 carries no key; its length prefix is present but zero.
                offset = if i == 0 {
                    write_empty_key(page, offset)?
                } else {
                    write_key(page, offset, &keys[i - 1])?
                };
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }
    Ok(())
}

/// Deserialize the node stored in a page.
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned,
{
    let page_type = LittleEndian::read_u32(&page.data[0..4]);
    let size = LittleEndian::read_u32(&page.data[8..12]) as usize;
    let max_size = LittleEndian::read_u32(&page.data[12..16]);
    let parent_page_id = LittleEndian::read_i32(&page.data[16..20]);
    let page_id = LittleEndian::read_i32(&page.data[20..24]);

    let payload = match page_type {
        PAGE_TYPE_LEAF => {
            let next_page_id = LittleEndian::read_i32(&page.data[24..28]);
            let mut offset = LEAF_HEADER_SIZE;
            let mut entries = Vec::with_capacity(size);
            for _ in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                let rid = Rid::new(
                    LittleEndian::read_i32(&page.data[next..next + 4]),
                    LittleEndian::read_u32(&page.data[next + 4..next + 8]),
                );
                let key = key.ok_or_else(|| {
                    BTreeError::DeserializationError("leaf entry with empty key".to_string())
                })?;
                entries.push((key, rid));
                offset = next + 8;
            }
            NodePayload::Leaf {
                next_page_id,
                entries,
            }
        }
        PAGE_TYPE_INTERNAL => {
            let mut offset = NODE_HEADER_SIZE;
            let mut keys = Vec::with_capacity(size.saturating_sub(1));
            let mut children = Vec::with_capacity(size);
            for i in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                if i > 0 {
                    keys.push(key.ok_or_else(|| {
                        BTreeError::DeserializationError("missing separator key".to_string())
                    })?);
                }
                children.push(LittleEndian::read_i32(&page.data[next..next + 4]));
                offset = next + 4;
            }
            NodePayload::Internal { keys, children }
        }
        _ => return Err(BTreeError::InvalidPageFormat(page.page_id)),
    };

    Ok(BTreeNode {
        page_id,
        parent_page_id,
        max_size,
        payload,
    })
}

/// Rewrite just the parent pointer field of a serialized node in place.
pub fn set_parent_in_page(page: &mut Page, parent_page_id: PageId) {
    LittleEndian::write_i32(&mut page.data[16..20], parent_page_id);
}

fn write_key<K: Serialize>(page: &mut Page, offset: usize, key: &K) -> Result<usize, BTreeError> {
    let bytes = bincode::serialize(key)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if offset + 2 + bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_u16(&mut page.data[offset..offset + 2], bytes.len() as u16);
    page.data[offset + 2..offset + 2 + bytes.len()].copy_from_slice(&bytes);
    Ok(offset + 2 + bytes.len())
}

fn write_empty_key(page: &mut Page, offset: usize) -> Result<usize, BTreeError> {
    if offset + 2 > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_u16(&mut page.data[offset..offset + 2], 0);
    Ok(offset + 2)
}

fn read_key<K: DeserializeOwned>(page: &Page, offset: usize) -> Result<(Option<K>, usize), BTreeError> {
    let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
    let start = offset + 2;
    if len == 0 {
        return Ok((None, start));
    }
    if start + len > PAGE_SIZE {
        return Err(BTreeError::DeserializationError(
            "key extends past page end".to_string(),
        ));
    }
    let key = bincode::deserialize(&page.data[start..start + len])
        .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
    Ok((Some(key), start + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_page(page_id: PageId) -> Page {
        Page::new(page_id)
    }

    #[test]
    fn test_leaf_round_trip() {
        let mut node = BTreeNode::<i64>::new_leaf(3, 1, 64);
        assert!(node.leaf_insert(10, Rid::new(7, 0)));
        assert!(node.leaf_insert(5, Rid::new(7, 1)));
        assert!(node.leaf_insert(20, Rid::new(8, 2)));
        if let NodePayload::Leaf { next_page_id, .. } = &mut node.payload {
            *next_page_id = 9;
        }

        let mut page = blank_page(3);
        serialize_node(&node, &mut page).unwrap();
        let out = deserialize_node::<i64>(&page).unwrap();

        assert_eq!(out.page_id, 3);
        assert_eq!(out.parent_page_id, 1);
        assert_eq!(out.max_size, 64);
        assert!(out.is_leaf());
        match out.payload {
            NodePayload::Leaf {
                next_page_id,
                entries,
            } => {
                assert_eq!(next_page_id, 9);
                assert_eq!(
                    entries,
                    vec![
                        (5, Rid::new(7, 1)),
                        (10, Rid::new(7, 0)),
                        (20, Rid::new(8, 2))
                    ]
                );
            }
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_internal_round_trip_slot_zero_unused() {
        let mut node = BTreeNode::<i64>::new_internal(4, INVALID_PAGE_ID, 32);
        if let NodePayload::Internal { keys, children } = &mut node.payload {
            children.push(10);
            keys.extend([7, 15]);
            children.extend([11, 12]);
        }

        let mut page = blank_page(4);
        serialize_node(&node, &mut page).unwrap();

        // Slot 0's key range is a zero-length placeholder.
        assert_eq!(LittleEndian::read_u16(&page.data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + 2]), 0);

        let out = deserialize_node::<i64>(&page).unwrap();
        assert_eq!(out.parent_page_id, INVALID_PAGE_ID);
        match out.payload {
            NodePayload::Internal { keys, children } => {
                assert_eq!(keys, vec![7, 15]);
                assert_eq!(children, vec![10, 11, 12]);
            }
            _ => panic!("expected internal"),
        }
    }

    #[test]
    fn test_duplicate_leaf_insert_rejected() {
        let mut node = BTreeNode::<i32>::new_leaf(1, INVALID_PAGE_ID, 8);
        assert!(node.leaf_insert(1, Rid::new(1, 1)));
        assert!(!node.leaf_insert(1, Rid::new(2, 2)));
        assert_eq!(node.size(), 1);
        assert_eq!(node.leaf_lookup(&1), Some(Rid::new(1, 1)));
    }

    #[test]
    fn test_child_index_follows_greatest_separator() {
        let mut node = BTreeNode::<i32>::new_internal(1, INVALID_PAGE_ID, 8);
        if let NodePayload::Internal { keys, children } = &mut node.payload {
            keys.extend([10, 20, 30]);
            children.extend([100, 101, 102, 103]);
        }
        assert_eq!(node.child_index(&5), 0);
        assert_eq!(node.child_index(&10), 1);
        assert_eq!(node.child_index(&15), 1);
        assert_eq!(node.child_index(&30), 3);
        assert_eq!(node.child_index(&99), 3);
    }

    #[test]
    fn test_internal_remove_drops_right_child() {
        let mut node = BTreeNode::<i32>::new_internal(1, INVALID_PAGE_ID, 8);
        if let NodePayload::Internal { keys, children } = &mut node.payload {
            keys.extend([10, 20, 30]);
            children.extend([100, 101, 102, 103]);
        }
        assert!(node.internal_remove(&20));
        match &node.payload {
            NodePayload::Internal { keys, children } => {
                assert_eq!(keys, &vec![10, 30]);
                assert_eq!(children, &vec![100, 101, 103]);
            }
            _ => unreachable!(),
        }
        assert!(!node.internal_remove(&25));
    }

    #[test]
    fn test_string_keys_round_trip() {
        let mut node = BTreeNode::<String>::new_leaf(2, INVALID_PAGE_ID, 16);
        for (i, name) in ["ash", "birch", "cedar"].iter().enumerate() {
            assert!(node.leaf_insert(name.to_string(), Rid::new(1, i as u32)));
        }
        let mut page = blank_page(2);
        serialize_node(&node, &mut page).unwrap();
        let out = deserialize_node::<String>(&page).unwrap();
        match out.payload {
            NodePayload::Leaf { entries, .. } => {
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["ash", "birch", "cedar"]);
            }
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_node_too_large() {
        let mut node = BTreeNode::<String>::new_leaf(2, INVALID_PAGE_ID, 1024);
        for i in 0..200 {
            node.leaf_insert(format!("key-{:04}-{}", i, "x".repeat(64)), Rid::new(1, i));
        }
        let mut page = blank_page(2);
        assert!(matches!(
            serialize_node(&node, &mut page),
            Err(BTreeError::NodeTooLarge)
        ));
    }
}
