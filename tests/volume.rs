mod common;

use std::env;

use blockfs::{
    fs::{config::DEFAULT_DIR_MODE, data_block_bitmap::BlockState},
    utils::generate_uuid,
    BlockDevice, FileDisk, FileSystem, FileSystemError, FormatOptions, OpenFlags, RamDisk,
};
use common::{fresh, pattern, read_file, write_file, FlakyDisk};

#[test]
fn blank_disk_is_not_formatted() {
    let disk = RamDisk::new(256);
    assert!(matches!(
        FileSystem::mount(disk),
        Err(FileSystemError::NotFormatted)
    ));
}

#[test]
fn format_reserves_header_bitmap_and_root() {
    let (_disk, fs) = fresh(2048);
    let sb = fs.super_block();
    assert_eq!(sb.total_blocks, 2048);
    assert_eq!(sb.block_size, 512);
    assert_eq!(sb.root_dir_start, 41);
    assert_eq!(fs.free_blocks(), 2048 - 41 - 64);

    assert_eq!(fs.block_state(0).unwrap(), BlockState::Reserved);
    assert_eq!(fs.block_state(41).unwrap(), BlockState::Used);
    assert_eq!(fs.block_state(104).unwrap(), BlockState::Used);
    assert_eq!(fs.block_state(105).unwrap(), BlockState::Free);
}

#[test]
fn oversized_volume_is_rejected() {
    let disk = RamDisk::new(20481);
    assert!(matches!(
        FileSystem::format(disk, &FormatOptions::default()),
        Err(FileSystemError::ReservedRegionTooSmall { .. })
    ));
}

#[test]
fn remount_sees_the_same_tree() {
    let (disk, mut fs) = fresh(2048);
    fs.mkdir("/docs", DEFAULT_DIR_MODE).unwrap();
    fs.mkdir("/docs/deep", DEFAULT_DIR_MODE).unwrap();
    write_file(&mut fs, "/docs/deep/a.bin", &pattern(4000));
    let free = fs.free_blocks();
    let volume_id = fs.super_block().volume_id.clone();
    drop(fs.unmount());

    let mut fs = FileSystem::open_or_format(disk, &FormatOptions::default()).unwrap();
    log!("remounted volume {} with {} free blocks", volume_id, fs.free_blocks());
    assert_eq!(fs.super_block().volume_id, volume_id);
    assert_eq!(fs.free_blocks(), free);
    assert!(fs.is_dir("/docs/deep"));
    assert_eq!(read_file(&mut fs, "/docs/deep/a.bin"), pattern(4000));
    assert_eq!(fs.getcwd(), "/");
}

#[test]
fn file_disk_image_survives_reopen() {
    let path = env::temp_dir().join(format!("blockfs-{}.img", generate_uuid()));
    {
        let disk = FileDisk::open(&path, 512).unwrap();
        assert_eq!(disk.block_count(), 512);
        let options = FormatOptions {
            volume_name: "scratch".to_string(),
        };
        let mut fs = FileSystem::open_or_format(disk, &options).unwrap();
        write_file(&mut fs, "/hello.txt", b"hello from disk");
        drop(fs.unmount());
    }
    {
        let disk = FileDisk::open(&path, 512).unwrap();
        let mut fs = FileSystem::mount(disk).unwrap();
        assert_eq!(fs.super_block().volume_name, "scratch");
        assert_eq!(read_file(&mut fs, "/hello.txt"), b"hello from disk");
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn failed_parent_persist_leaves_residents_untouched() {
    let disk = FlakyDisk::new(RamDisk::new(1024));
    let mut fs = FileSystem::format(disk, &FormatOptions::default()).unwrap();
    fs.mkdir("/docs", DEFAULT_DIR_MODE).unwrap();
    let root_before = fs.root().clone();

    // 位图写盘和新目录写盘成功，父目录写盘失败
    fs.disk().fail_after(2);
    assert!(matches!(
        fs.mkdir("/x", DEFAULT_DIR_MODE),
        Err(FileSystemError::Io(_))
    ));
    fs.disk().heal();

    assert_eq!(fs.root(), &root_before);
    assert!(!fs.is_dir("/x"));

    let disk = fs.unmount();
    let fs = FileSystem::mount(disk).unwrap();
    assert!(fs.is_dir("/docs"));
    assert!(!fs.is_dir("/x"));
}

#[test]
fn failed_move_keeps_the_source() {
    let disk = FlakyDisk::new(RamDisk::new(1024));
    let mut fs = FileSystem::format(disk, &FormatOptions::default()).unwrap();
    fs.mkdir("/docs", DEFAULT_DIR_MODE).unwrap();
    write_file(&mut fs, "/a.txt", b"keep me");

    fs.disk().fail_after(0);
    assert!(fs.mv("/a.txt", "/docs").is_err());
    fs.disk().heal();

    assert!(fs.is_file("/a.txt"));
    assert!(!fs.is_file("/docs/a.txt"));
    assert_eq!(read_file(&mut fs, "/a.txt"), b"keep me");
}

#[test]
fn failed_allocation_during_open_changes_nothing() {
    let disk = FlakyDisk::new(RamDisk::new(1024));
    let mut fs = FileSystem::format(disk, &FormatOptions::default()).unwrap();
    let free = fs.free_blocks();

    fs.disk().fail_after(0);
    assert!(fs
        .open("/new", OpenFlags::WRONLY | OpenFlags::CREATE)
        .is_err());
    fs.disk().heal();

    assert_eq!(fs.free_blocks(), free);
    assert!(!fs.is_file("/new"));
    assert_eq!(fs.open_files(), 0);
}
