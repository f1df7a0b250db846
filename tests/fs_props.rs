//! Property-based filesystem invariants.

use proptest::collection::vec;
use proptest::prelude::*;

use pennos::fs::disk::{Disk, FREE_BLOCK, LAST_BLOCK};
use pennos::fs::{AbsPath, FileKind, FileSystem};

fn abs(s: &str) -> AbsPath {
    AbsPath::resolve(&AbsPath::root(), s)
}

fn fresh_fs(dir: &tempfile::TempDir) -> FileSystem {
    let path = dir.path().join("fs.img");
    let path = path.to_str().unwrap();
    Disk::mkfs(path, 1, 0, None).unwrap();
    FileSystem::mount(path).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Stored bytes survive a write/read round trip at any offset.
    #[test]
    fn roundtrip(data in vec(any::<u8>(), 0..2048), offset in 0usize..512) {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = fresh_fs(&dir);
        fs.create(&abs("/f"), FileKind::Regular).unwrap();
        fs.write(&abs("/f"), offset, &data, true).unwrap();
        let mut got = vec![0u8; data.len()];
        let n = fs.read(&abs("/f"), offset, &mut got).unwrap();
        prop_assert_eq!(n, data.len());
        prop_assert_eq!(&got, &data);
        if !data.is_empty() {
            let ent = fs.get_meta(&abs("/f"), true).unwrap();
            prop_assert_eq!(ent.size.get() as usize, offset + data.len());
        }
    }

    /// Allocation followed by freeing restores the FAT entry-by-entry.
    #[test]
    fn allocate_free_is_identity(chain_len in 1usize..12) {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = fresh_fs(&dir);
        let before: Vec<u16> = (1..=fs.disk().data_blocks() as u16)
            .map(|b| fs.disk().fat_get(b))
            .collect();
        let first = fs.disk_mut().allocate(0).unwrap();
        let mut prev = first;
        for _ in 1..chain_len {
            prev = fs.disk_mut().allocate(prev).unwrap();
        }
        fs.disk_mut().free_chain(first);
        let after: Vec<u16> = (1..=fs.disk().data_blocks() as u16)
            .map(|b| fs.disk().fat_get(b))
            .collect();
        prop_assert_eq!(before, after);
    }

    /// A directory's size is always 64 times its live entry count.
    #[test]
    fn directory_size_tracks_live_entries(
        create in 1usize..12,
        remove in 0usize..12,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = fresh_fs(&dir);
        fs.create(&abs("/d"), FileKind::Directory).unwrap();
        for i in 0..create {
            fs.create(&abs(&format!("/d/f{}", i)), FileKind::Regular).unwrap();
        }
        let removed = remove.min(create);
        for i in 0..removed {
            let pos = fs.remove(&abs(&format!("/d/f{}", i))).unwrap();
            fs.cleanup(pos);
        }
        let live = create - removed;
        let ent = fs.get_meta(&abs("/d"), true).unwrap();
        prop_assert_eq!(ent.size.get() as usize, 64 * live);
        prop_assert_eq!(fs.list(&abs("/d")).unwrap().len(), live);
    }

    /// After truncate: size 0, no first block, every old block free.
    #[test]
    fn truncate_postconditions(data in vec(any::<u8>(), 1..2048)) {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = fresh_fs(&dir);
        fs.create(&abs("/f"), FileKind::Regular).unwrap();
        fs.write(&abs("/f"), 0, &data, true).unwrap();
        let ent = fs.get_meta(&abs("/f"), true).unwrap();
        let mut blocks = Vec::new();
        let mut block = ent.first_block.get();
        while block != LAST_BLOCK {
            blocks.push(block);
            block = fs.disk().fat_get(block);
        }
        fs.truncate(&abs("/f"), true).unwrap();
        let ent = fs.get_meta(&abs("/f"), true).unwrap();
        prop_assert_eq!(ent.size.get(), 0);
        prop_assert_eq!(ent.first_block.get(), LAST_BLOCK);
        for block in blocks {
            prop_assert_eq!(fs.disk().fat_get(block), FREE_BLOCK);
        }
    }

    /// Entries and contents survive unmount/mount.
    #[test]
    fn remount_preserves_state(names in vec("[a-z]{1,8}", 1..6), data in vec(any::<u8>(), 0..512)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.img");
        let path = path.to_str().unwrap().to_string();
        Disk::mkfs(&path, 1, 0, None).unwrap();
        let mut fs = FileSystem::mount(&path).unwrap();
        let mut unique: Vec<String> = names;
        unique.sort();
        unique.dedup();
        for name in &unique {
            fs.create(&abs(&format!("/{}", name)), FileKind::Regular).unwrap();
            fs.write(&abs(&format!("/{}", name)), 0, &data, true).unwrap();
        }
        fs.unmount();

        let fs = FileSystem::mount(&path).unwrap();
        let mut listed: Vec<String> = fs
            .list(&abs("/"))
            .unwrap()
            .iter()
            .map(|e| e.name_str().to_string())
            .collect();
        listed.sort();
        prop_assert_eq!(&listed, &unique);
        for name in &unique {
            let mut got = vec![0u8; data.len()];
            let n = fs.read(&abs(&format!("/{}", name)), 0, &mut got).unwrap();
            prop_assert_eq!(n, data.len());
            prop_assert_eq!(&got, &data);
        }
    }
}
