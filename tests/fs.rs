//! End-to-end filesystem tests over a freshly formatted backing file.

use pennos::error::FsError;
use pennos::fs::disk::{Disk, FREE_BLOCK, LAST_BLOCK};
use pennos::fs::{AbsPath, FileKind, FileSystem, Perm};
use tempfile::TempDir;

fn abs(s: &str) -> AbsPath {
    AbsPath::resolve(&AbsPath::root(), s)
}

fn mkfs(dir: &TempDir, fat_blocks: usize, config: usize) -> (String, FileSystem) {
    let path = dir
        .path()
        .join("fs.img")
        .to_str()
        .unwrap()
        .to_string();
    Disk::mkfs(&path, fat_blocks, config, None).unwrap();
    (path.clone(), FileSystem::mount(&path).unwrap())
}

/// The chain starting at `first`, in order.
fn chain_of(fs: &FileSystem, first: u16) -> Vec<u16> {
    let mut blocks = Vec::new();
    let mut block = first;
    while block != LAST_BLOCK {
        blocks.push(block);
        block = fs.disk().fat_get(block);
    }
    blocks
}

#[test]
fn write_then_read_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/a"), FileKind::Regular).unwrap();
    fs.write(&abs("/a"), 0, b"hi\n", true).unwrap();
    let mut buf = [0u8; 16];
    let n = fs.read(&abs("/a"), 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hi\n");
    let ent = fs.get_meta(&abs("/a"), true).unwrap();
    assert_eq!(ent.size.get(), 3);
    assert!(ent.mtime.get() > 0);
}

#[test]
fn multi_block_write_spans_chain() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0); // 256-byte blocks
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    fs.create(&abs("/big"), FileKind::Regular).unwrap();
    fs.write(&abs("/big"), 0, &data, true).unwrap();
    let ent = fs.get_meta(&abs("/big"), true).unwrap();
    assert_eq!(ent.size.get() as usize, data.len());
    assert_eq!(chain_of(&fs, ent.first_block.get()).len(), 4);
    let mut buf = vec![0u8; data.len()];
    let n = fs.read(&abs("/big"), 0, &mut buf).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(buf, data);
    // Offset reads cross block boundaries too.
    let mut tail = vec![0u8; 300];
    let n = fs.read(&abs("/big"), 200, &mut tail).unwrap();
    assert_eq!(n, 300);
    assert_eq!(&tail[..], &data[200..500]);
}

#[test]
fn truncate_resets_and_frees() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/f"), FileKind::Regular).unwrap();
    fs.write(&abs("/f"), 0, &[7u8; 700], true).unwrap();
    let ent = fs.get_meta(&abs("/f"), true).unwrap();
    let blocks = chain_of(&fs, ent.first_block.get());
    assert!(!blocks.is_empty());
    fs.truncate(&abs("/f"), true).unwrap();
    let ent = fs.get_meta(&abs("/f"), true).unwrap();
    assert_eq!(ent.size.get(), 0);
    assert_eq!(ent.first_block.get(), LAST_BLOCK);
    for block in blocks {
        assert_eq!(fs.disk().fat_get(block), FREE_BLOCK);
    }
}

#[test]
fn allocate_then_free_restores_fat() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    let snapshot: Vec<u16> = (1..=fs.disk().data_blocks() as u16)
        .map(|b| fs.disk().fat_get(b))
        .collect();
    let first = fs.disk_mut().allocate(0).unwrap();
    let mut prev = first;
    for _ in 0..5 {
        prev = fs.disk_mut().allocate(prev).unwrap();
    }
    fs.disk_mut().free_chain(first);
    let after: Vec<u16> = (1..=fs.disk().data_blocks() as u16)
        .map(|b| fs.disk().fat_get(b))
        .collect();
    assert_eq!(snapshot, after);
}

#[test]
fn directory_size_counts_live_entries() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/d"), FileKind::Directory).unwrap();
    for name in &["x", "y", "z"] {
        fs.create(&abs(&format!("/d/{}", name)), FileKind::Regular)
            .unwrap();
    }
    let ent = fs.get_meta(&abs("/d"), true).unwrap();
    assert_eq!(ent.size.get(), 3 * 64);
    assert_eq!(fs.list(&abs("/d")).unwrap().len(), 3);

    let pos = fs.remove(&abs("/d/y")).unwrap();
    fs.cleanup(pos);
    let ent = fs.get_meta(&abs("/d"), true).unwrap();
    assert_eq!(ent.size.get(), 2 * 64);
    let names: Vec<String> = fs
        .list(&abs("/d"))
        .unwrap()
        .iter()
        .map(|e| e.name_str().to_string())
        .collect();
    assert_eq!(names, vec!["x", "z"]);
}

#[test]
fn removed_slot_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/a"), FileKind::Regular).unwrap();
    fs.create(&abs("/b"), FileKind::Regular).unwrap();
    let pos = fs.remove(&abs("/a")).unwrap();
    fs.cleanup(pos);
    fs.create(&abs("/c"), FileKind::Regular).unwrap();
    // `c` takes `a`'s old slot, so it enumerates first.
    let names: Vec<String> = fs
        .list(&abs("/"))
        .unwrap()
        .iter()
        .map(|e| e.name_str().to_string())
        .collect();
    assert_eq!(names, vec!["c", "b"]);
}

#[test]
fn directory_chain_grows_past_one_block() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0); // 4 entries per 256-byte block
    for i in 0..6 {
        fs.create(&abs(&format!("/f{}", i)), FileKind::Regular)
            .unwrap();
    }
    // Root began at block 1 and must have chained to keep its EOD slot.
    assert_ne!(fs.disk().fat_get(1), LAST_BLOCK);
    assert_eq!(fs.list(&abs("/")).unwrap().len(), 6);
}

#[test]
fn contents_survive_remount() {
    let dir = tempfile::tempdir().unwrap();
    let (path, mut fs) = mkfs(&dir, 2, 1);
    fs.create(&abs("/d"), FileKind::Directory).unwrap();
    fs.create(&abs("/d/keep"), FileKind::Regular).unwrap();
    fs.write(&abs("/d/keep"), 0, b"payload", true).unwrap();
    fs.create(&abs("/gone"), FileKind::Regular).unwrap();
    let pos = fs.remove(&abs("/gone")).unwrap();
    fs.cleanup(pos);
    fs.unmount();

    let fs = FileSystem::mount(&path).unwrap();
    let names: Vec<String> = fs
        .list(&abs("/"))
        .unwrap()
        .iter()
        .map(|e| e.name_str().to_string())
        .collect();
    assert_eq!(names, vec!["d"]);
    let mut buf = [0u8; 32];
    let n = fs.read(&abs("/d/keep"), 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"payload");
}

#[test]
fn links_resolve_to_their_target() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/target"), FileKind::Regular).unwrap();
    fs.write(&abs("/target"), 0, b"via link", true).unwrap();
    fs.create(&abs("/lk"), FileKind::Link).unwrap();
    fs.write(&abs("/lk"), 0, b"/target\0", false).unwrap();

    let ent = fs.get_meta(&abs("/lk"), true).unwrap();
    assert_eq!(ent.name_str(), "target");
    let ent = fs.get_meta(&abs("/lk"), false).unwrap();
    assert_eq!(ent.kind(), FileKind::Link);

    let mut buf = [0u8; 32];
    let n = fs.read(&abs("/lk"), 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"via link");
}

#[test]
fn dangling_link_creates_its_target() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/lk"), FileKind::Link).unwrap();
    fs.write(&abs("/lk"), 0, b"/missing\0", false).unwrap();
    // Reading through the dangling link misses.
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(&abs("/lk"), 0, &mut buf), Err(FsError::NotFound));
    // Creating over the link creates the target instead.
    fs.create(&abs("/lk"), FileKind::Regular).unwrap();
    assert!(fs.get_meta(&abs("/missing"), false).is_ok());
}

#[test]
fn rename_replaces_and_moves() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/a"), FileKind::Regular).unwrap();
    fs.write(&abs("/a"), 0, b"data", true).unwrap();

    fs.rename(&abs("/a"), &abs("/b")).unwrap();
    assert_eq!(fs.get_meta(&abs("/a"), false), Err(FsError::NotFound));
    let mut buf = [0u8; 8];
    let n = fs.read(&abs("/b"), 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"data");

    // Moving onto a directory nests under it.
    fs.create(&abs("/d"), FileKind::Directory).unwrap();
    fs.rename(&abs("/b"), &abs("/d")).unwrap();
    let n = fs.read(&abs("/d/b"), 0, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"data");

    // A directory cannot replace a file.
    fs.create(&abs("/e"), FileKind::Directory).unwrap();
    fs.create(&abs("/f"), FileKind::Regular).unwrap();
    assert_eq!(fs.rename(&abs("/e"), &abs("/f")), Err(FsError::IsDir));
}

#[test]
fn error_kinds_surface() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/a"), FileKind::Regular).unwrap();
    assert_eq!(
        fs.create(&abs("/a"), FileKind::Regular),
        Err(FsError::Exists)
    );
    assert_eq!(fs.remove(&abs("/nope")), Err(FsError::NotFound));
    assert_eq!(
        fs.create(&abs("/nope/deep"), FileKind::Regular),
        Err(FsError::NotFound)
    );
    assert_eq!(
        fs.create(&abs("/a/under"), FileKind::Regular),
        Err(FsError::NotDir)
    );

    fs.create(&abs("/d"), FileKind::Directory).unwrap();
    fs.create(&abs("/d/x"), FileKind::Regular).unwrap();
    assert_eq!(fs.truncate(&abs("/d"), false), Err(FsError::NotEmpty));
}

#[test]
fn permission_bits_gate_operations() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/f"), FileKind::Regular).unwrap();
    fs.write(&abs("/f"), 0, b"x", true).unwrap();

    let mut ent = fs.get_meta(&abs("/f"), true).unwrap();
    ent.perm = (Perm::WRITE).bits();
    fs.set_meta(&abs("/f"), &ent, true).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(
        fs.read(&abs("/f"), 0, &mut buf),
        Err(FsError::PermDenied)
    );

    let mut ent = fs.get_meta(&abs("/f"), true).unwrap();
    ent.perm = (Perm::READ).bits();
    fs.set_meta(&abs("/f"), &ent, true).unwrap();
    assert_eq!(
        fs.write(&abs("/f"), 0, b"y", true),
        Err(FsError::PermDenied)
    );

    fs.create(&abs("/d"), FileKind::Directory).unwrap();
    fs.create(&abs("/d/inner"), FileKind::Regular).unwrap();
    let mut ent = fs.get_meta(&abs("/d"), true).unwrap();
    ent.perm = (Perm::READ | Perm::WRITE).bits();
    fs.set_meta(&abs("/d"), &ent, true).unwrap();
    assert_eq!(
        fs.get_meta(&abs("/d/inner"), true),
        Err(FsError::PermDenied)
    );
}

#[test]
fn mkfs_refuses_mounted_backing_file() {
    let dir = tempfile::tempdir().unwrap();
    let (path, fs) = mkfs(&dir, 1, 0);
    assert_eq!(
        Disk::mkfs(&path, 1, 0, Some(fs.disk())),
        Err(FsError::Busy)
    );
}

#[test]
fn empty_file_has_no_chain() {
    let dir = tempfile::tempdir().unwrap();
    let (_, mut fs) = mkfs(&dir, 1, 0);
    fs.create(&abs("/empty"), FileKind::Regular).unwrap();
    let ent = fs.get_meta(&abs("/empty"), true).unwrap();
    assert_eq!(ent.first_block.get(), LAST_BLOCK);
    assert_eq!(ent.size.get(), 0);
    let mut buf = [0u8; 4];
    assert_eq!(fs.read(&abs("/empty"), 0, &mut buf).unwrap(), 0);
}
