use slotted::storage::btree::{BTree, BinaryCollation, I32Keys};
use slotted::storage::PageOptions;
use slotted::types::{PageId, Result};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn first_leaf_split_builds_two_level_tree() -> Result<()> {
    init_tracing();
    let mut tree = BTree::new(PageOptions::new().page_size(128), I32Keys)?;
    for i in 0..6 {
        tree.put(&I32Keys::encode(i), b"data\0")?;
    }
    assert_eq!(tree.height()?, 2);

    let root = tree.pager().get(tree.root_page())?;
    assert!(!root.is_leaf());
    assert_eq!(root.cell_count(), 1);
    assert_eq!(root.key_at(0)?.as_bytes(), &I32Keys::encode(2));
    assert_eq!(root.data_at(0)?.as_bytes(), &1u32.to_le_bytes());
    let right = tree.pager().get(root.rightmost())?;
    assert_eq!(right.cell_count(), 4);
    let left = tree.pager().get(PageId(1))?;
    assert_eq!(left.cell_count(), 2);

    let stats = tree.stats_snapshot();
    assert_eq!(stats.leaf_splits, 1);
    assert_eq!(stats.root_splits, 1);
    assert_eq!(stats.inserts, 6);
    tree.check_invariants()?;
    Ok(())
}

#[test]
fn ascending_inserts_split_internal_pages() -> Result<()> {
    init_tracing();
    let mut tree = BTree::new(PageOptions::new().page_size(128), I32Keys)?;
    for i in 0..500 {
        tree.put(&I32Keys::encode(i), &(i as u32).to_le_bytes())?;
    }
    tree.check_invariants()?;
    let stats = tree.stats_snapshot();
    assert!(stats.internal_splits > 0);
    assert!(stats.root_splits >= 2);
    assert!(tree.height()? >= 3);
    for i in (0..500).step_by(7) {
        assert_eq!(tree.get(&I32Keys::encode(i))?, Some(&(i as u32).to_le_bytes()[..]));
    }
    assert_eq!(tree.get(&I32Keys::encode(500))?, None);
    Ok(())
}

#[test]
fn overwrites_and_deletes_across_leaves() -> Result<()> {
    init_tracing();
    let mut tree = BTree::new(PageOptions::new().page_size(256), BinaryCollation)?;
    let keys: Vec<String> = (0..120).map(|i| format!("user:{i:04}")).collect();
    for key in &keys {
        tree.put(key.as_bytes(), b"v1")?;
    }
    for key in keys.iter().step_by(3) {
        tree.put(key.as_bytes(), b"a much longer second version")?;
    }
    for key in keys.iter().skip(1).step_by(3) {
        assert!(tree.delete(key.as_bytes())?);
    }
    tree.check_invariants()?;

    let entries = tree.entries()?;
    assert_eq!(entries.len(), 80);
    for (idx, key) in keys.iter().enumerate() {
        let expected: Option<&[u8]> = match idx % 3 {
            0 => Some(&b"a much longer second version"[..]),
            1 => None,
            _ => Some(&b"v1"[..]),
        };
        assert_eq!(tree.get(key.as_bytes())?, expected, "key {key}");
    }
    let stats = tree.stats_snapshot();
    assert_eq!(stats.deletes, 40);
    assert!(stats.relocations > 0);
    tree.emit_stats();
    Ok(())
}

#[test]
fn config_file_drives_page_size() -> Result<()> {
    let options = PageOptions::from_toml_str("page_size = 256\ndefrag_on_fragmentation = true\n")?;
    let mut tree = BTree::new(options, BinaryCollation)?;
    tree.put(b"k", b"v")?;
    let root = tree.pager().get(tree.root_page())?;
    assert_eq!(root.as_bytes().len(), 256);
    assert_eq!(tree.pager().options().max_payload(), 60);
    Ok(())
}
