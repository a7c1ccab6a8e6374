use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;

// Header page layout: record count u32, then fixed-width records of
// { name: 32 bytes zero-padded, root_page_id: i32 }.
const COUNT_SIZE: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

fn record_count(page: &Page) -> usize {
    LittleEndian::read_u32(&page.data[0..COUNT_SIZE]) as usize
}

fn record_offset(index: usize) -> usize {
    COUNT_SIZE + index * RECORD_SIZE
}

fn record_name(page: &Page, index: usize) -> &[u8] {
    let start = record_offset(index);
    let name = &page.data[start..start + NAME_SIZE];
    let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
    &name[..end]
}

/// Look up the root page id recorded for an index name.
pub fn find_root(page: &Page, name: &str) -> Option<PageId> {
    let count = record_count(page);
    (0..count.min(MAX_RECORDS))
        .find(|&i| record_name(page, i) == name.as_bytes())
        .map(|i| {
            let start = record_offset(i) + NAME_SIZE;
            LittleEndian::read_i32(&page.data[start..start + 4])
        })
}

/// Insert or update the `{name -> root_page_id}` record.
pub fn set_root(page: &mut Page, name: &str, root_page_id: PageId) -> Result<(), BTreeError> {
    if name.len() > NAME_SIZE {
        return Err(BTreeError::SerializationError(format!(
            "index name '{}' longer than {} bytes",
            name, NAME_SIZE
        )));
    }
    let count = record_count(page);
    let slot = (0..count.min(MAX_RECORDS)).find(|&i| record_name(page, i) == name.as_bytes());

    let index = match slot {
        Some(i) => i,
        None => {
            if count >= MAX_RECORDS {
                return Err(BTreeError::HeaderPageFull);
            }
            LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], (count + 1) as u32);
            count
        }
    };

    let start = record_offset(index);
    page.data[start..start + NAME_SIZE].fill(0);
    page.data[start..start + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_i32(&mut page.data[start + NAME_SIZE..start + NAME_SIZE + 4], root_page_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_insert_and_find() {
        let mut page = Page::new(0);
        assert_eq!(find_root(&page, "orders_pk"), None);

        set_root(&mut page, "orders_pk", 17).unwrap();
        set_root(&mut page, "users_pk", 4).unwrap();
        assert_eq!(find_root(&page, "orders_pk"), Some(17));
        assert_eq!(find_root(&page, "users_pk"), Some(4));
        assert_eq!(find_root(&page, "missing"), None);
    }

    #[test]
    fn test_update_in_place() {
        let mut page = Page::new(0);
        set_root(&mut page, "idx", 3).unwrap();
        set_root(&mut page, "idx", INVALID_PAGE_ID).unwrap();
        assert_eq!(find_root(&page, "idx"), Some(INVALID_PAGE_ID));
        assert_eq!(record_count(&page), 1);
    }

    #[test]
    fn test_name_too_long() {
        let mut page = Page::new(0);
        let long = "x".repeat(33);
        assert!(set_root(&mut page, &long, 1).is_err());
    }
}
