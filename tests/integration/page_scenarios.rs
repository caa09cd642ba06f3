use slotted::storage::btree::{BinaryCollation, FreeBlock, I32Keys, Page, SetKind};
use slotted::storage::PageOptions;
use slotted::types::{PageId, Result, SlottedError};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small_page() -> Result<Page> {
    Page::new(PageId(1), PageOptions::new().page_size(128), true)
}

fn int_data(i: i32) -> Vec<u8> {
    format!("d{:03}\0", i).into_bytes()
}

#[test]
fn sixth_entry_does_not_fit_in_128_byte_page() -> Result<()> {
    init_tracing();
    let mut page = small_page()?;
    assert_eq!(page.freespace(), 112);
    for i in 0..5 {
        let outcome = page.set(&I32Keys::encode(i), &int_data(i), &I32Keys)?;
        assert_eq!(outcome.kind, SetKind::Inserted);
    }
    let before = page.as_bytes().to_vec();
    let err = page.set(&I32Keys::encode(5), &int_data(5), &I32Keys).unwrap_err();
    assert_eq!(err, SlottedError::NotEnoughSpace);
    assert_eq!(page.cell_count(), 5);
    assert_eq!(page.as_bytes(), &before[..]);
    page.check_invariants(&I32Keys)?;
    Ok(())
}

#[test]
fn shrinking_overwrite_merges_into_adjacent_hole() -> Result<()> {
    init_tracing();
    let mut page = small_page()?;
    page.set(&I32Keys::encode(1234), b"1234\0", &I32Keys)?;
    page.set(&I32Keys::encode(7), b"seven", &I32Keys)?;
    page.set(&I32Keys::encode(8), b"eight", &I32Keys)?;
    page.delete(&I32Keys::encode(7), &I32Keys)?;

    // The hole left by key 7 sits between key 8's payload and key 1234's payload.
    let blocks = page.free_blocks()?;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1], FreeBlock { start: 110, end: 119 });

    let outcome = page.set(&I32Keys::encode(1234), b"22\0", &I32Keys)?;
    assert_eq!(outcome.kind, SetKind::UpdatedInPlace);
    assert!(!outcome.defragmented);
    let blocks = page.free_blocks()?;
    assert_eq!(blocks.len(), 2, "freed bytes must not add a list entry");
    assert_eq!(blocks[1], FreeBlock { start: 110, end: 121 });
    let value = page
        .get(&I32Keys::encode(1234), &I32Keys)?
        .expect("key 1234 present");
    assert_eq!(value.as_bytes(), b"22\0");
    assert_eq!(value.offset(), 121 + 4);
    page.check_invariants(&I32Keys)?;
    Ok(())
}

#[test]
fn split_of_five_entries_keeps_two_on_the_left() -> Result<()> {
    init_tracing();
    let mut page = small_page()?;
    for i in 0..5 {
        page.set(&I32Keys::encode(i), &int_data(i), &I32Keys)?;
    }
    assert_eq!(page.split_point()?, 2);
    let split = page.split(PageId(2))?;

    assert_eq!(page.id(), PageId(1));
    assert_eq!(page.cell_count(), 2);
    assert_eq!(split.right.cell_count(), 3);
    assert_eq!(split.separator, I32Keys::encode(2).to_vec());
    assert_eq!(page.freespace(), 112 - 2 * 21);
    assert_eq!(split.right.freespace(), 112 - 3 * 21);
    for i in 0..2 {
        let data = page.get(&I32Keys::encode(i), &I32Keys)?.expect("left key");
        assert_eq!(data.as_bytes(), &int_data(i)[..]);
    }
    for i in 2..5 {
        let data = split.right.get(&I32Keys::encode(i), &I32Keys)?.expect("right key");
        assert_eq!(data.as_bytes(), &int_data(i)[..]);
    }
    page.check_invariants(&I32Keys)?;
    split.right.check_invariants(&I32Keys)?;
    Ok(())
}

#[test]
fn growing_overwrite_defragments_around_the_old_payload() -> Result<()> {
    init_tracing();
    let cmp = BinaryCollation;
    let mut page = small_page()?;
    page.set(b"a", &[1; 20], &cmp)?;
    page.set(b"b", &[2; 20], &cmp)?;
    page.set(b"c", &[3; 20], &cmp)?;
    assert_eq!(page.freespace(), 13);

    let outcome = page.set(b"b", &[9; 27], &cmp)?;
    assert_eq!(outcome.kind, SetKind::Relocated);
    assert!(outcome.defragmented);
    assert_eq!(page.freeblock_count(), 1);
    assert_eq!(page.freespace(), 6);
    assert_eq!(page.get(b"a", &cmp)?.as_deref(), Some(&[1u8; 20][..]));
    assert_eq!(page.get(b"b", &cmp)?.as_deref(), Some(&[9u8; 27][..]));
    assert_eq!(page.get(b"c", &cmp)?.as_deref(), Some(&[3u8; 20][..]));
    page.check_invariants(&cmp)?;
    Ok(())
}

#[test]
fn growing_overwrite_that_cannot_fit_leaves_page_untouched() -> Result<()> {
    let cmp = BinaryCollation;
    let mut page = small_page()?;
    page.set(b"a", &[1; 27], &cmp)?;
    page.set(b"b", &[2; 27], &cmp)?;
    page.set(b"c", &[3; 10], &cmp)?;
    let before = page.as_bytes().to_vec();
    let err = page.set(b"c", &[4; 27], &cmp).unwrap_err();
    assert_eq!(err, SlottedError::NotEnoughSpace);
    assert_eq!(page.as_bytes(), &before[..]);
    Ok(())
}

#[test]
fn shrinking_overwrite_without_descriptor_room_relocates() -> Result<()> {
    let cmp = BinaryCollation;
    let mut page = small_page()?;
    page.set(b"a", &[1; 20], &cmp)?;
    page.set(b"b", &[2; 20], &cmp)?;
    page.set(b"c", &[3; 20], &cmp)?;
    page.set(b"d", b"", &cmp)?;
    assert_eq!(page.freespace(), 0);

    let outcome = page.set(b"b", &[5; 10], &cmp)?;
    assert_eq!(outcome.kind, SetKind::Relocated);
    assert!(outcome.defragmented);
    assert_eq!(page.freespace(), 10);
    assert_eq!(page.get(b"b", &cmp)?.as_deref(), Some(&[5u8; 10][..]));
    assert_eq!(page.get(b"d", &cmp)?.as_deref(), Some(&b""[..]));
    page.check_invariants(&cmp)?;
    Ok(())
}

#[test]
fn deleting_everything_restores_a_fresh_layout() -> Result<()> {
    let cmp = BinaryCollation;
    let mut page = small_page()?;
    page.set(b"a", &[1; 20], &cmp)?;
    page.set(b"b", &[2; 20], &cmp)?;
    assert!(page.delete(b"a", &cmp)?);
    assert_eq!(page.freeblock_count(), 2);
    assert!(page.delete(b"b", &cmp)?);
    assert!(!page.delete(b"b", &cmp)?);
    assert_eq!(page.cell_count(), 0);
    assert_eq!(page.freeblock_count(), 1);
    assert_eq!(page.freespace(), 112);
    assert_eq!(page.free_blocks()?, vec![FreeBlock { start: 16, end: 128 }]);
    Ok(())
}

#[test]
fn payload_cap_and_empty_keys_are_rejected() -> Result<()> {
    let cmp = BinaryCollation;
    let mut page = small_page()?;
    assert_eq!(
        page.set(b"k", &[0; 28], &cmp).unwrap_err(),
        SlottedError::PayloadTooBig { size: 29, limit: 28 }
    );
    assert!(matches!(page.set(b"", b"x", &cmp), Err(SlottedError::Invalid(_))));
    assert_eq!(page.cell_count(), 0);
    Ok(())
}

#[test]
fn page_image_survives_reload() -> Result<()> {
    let cmp = BinaryCollation;
    let options = PageOptions::new().page_size(128);
    let mut page = Page::new(PageId(3), options.clone(), true)?;
    page.set(b"x", b"1", &cmp)?;
    page.set(b"y", b"22", &cmp)?;
    page.delete(b"x", &cmp)?;
    let reloaded = Page::from_bytes(page.clone().into_bytes(), options)?;
    assert_eq!(reloaded, page);
    assert_eq!(reloaded.get(b"y", &cmp)?.as_deref(), Some(&b"22"[..]));
    Ok(())
}
