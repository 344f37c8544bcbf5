mod common;

use std::io::SeekFrom;

use blockfs::{
    fs::config::{DEFAULT_DIR_MODE, MAX_FILE_SIZE},
    FileSystem, FileSystemError, OpenFlags,
};
use common::{fresh, pattern, read_file, write_file};

#[test]
fn end_to_end_docs_scenario() {
    let (_disk, mut fs) = fresh(2048);
    fs.mkdir("/docs", DEFAULT_DIR_MODE).unwrap();

    let data = pattern(1500);
    let fd = fs.open("/docs/a.txt", OpenFlags::WRONLY | OpenFlags::CREATE).unwrap();
    assert_eq!(fs.write(fd, &data).unwrap(), 1500);
    fs.close(fd).unwrap();

    let fd = fs.open("/docs/a.txt", OpenFlags::RDONLY).unwrap();
    let mut back = vec![0u8; 1500];
    assert_eq!(fs.read(fd, &mut back).unwrap(), 1500);
    assert_eq!(fs.read(fd, &mut back).unwrap(), 0);
    fs.close(fd).unwrap();

    assert_eq!(back, data);
    let st = fs.stat("/docs/a.txt").unwrap();
    assert_eq!(st.size, 1500);
    assert_eq!(st.blocks, 3);
    assert_eq!(st.block_size, 512);
}

#[test]
fn round_trip_across_block_boundaries() {
    let (_disk, mut fs) = fresh(2048);
    for len in [1usize, 100, 511, 512, 513, 1024, 1500, 4096, 5000] {
        let path = format!("/f{}", len);
        let data = pattern(len);
        write_file(&mut fs, &path, &data);
        assert_eq!(read_file(&mut fs, &path), data, "len = {}", len);
        assert_eq!(fs.stat(&path).unwrap().size, len as u64);
    }
}

#[test]
fn many_small_writes_equal_one_big_write() {
    let (_disk, mut fs) = fresh(2048);
    let data = pattern(3000);

    let fd = fs.open("/small", OpenFlags::WRONLY | OpenFlags::CREATE).unwrap();
    for chunk in data.chunks(77) {
        assert_eq!(fs.write(fd, chunk).unwrap(), chunk.len());
    }
    fs.close(fd).unwrap();

    assert_eq!(read_file(&mut fs, "/small"), data);
}

#[test]
fn reads_straddling_blocks_in_odd_chunks() {
    let (_disk, mut fs) = fresh(2048);
    let data = pattern(2000);
    write_file(&mut fs, "/odd", &data);

    let fd = fs.open("/odd", OpenFlags::RDONLY).unwrap();
    let mut out = Vec::new();
    let mut chunk = [0u8; 333];
    loop {
        let n = fs.read(fd, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    fs.close(fd).unwrap();
    assert_eq!(out, data);
}

#[test]
fn truncate_keeps_only_the_first_block() {
    let (_disk, mut fs) = fresh(2048);
    write_file(&mut fs, "/t", &pattern(3000));
    let before = fs.free_blocks();

    let fd = fs
        .open("/t", OpenFlags::WRONLY | OpenFlags::TRUNC)
        .unwrap();
    fs.close(fd).unwrap();

    let st = fs.stat("/t").unwrap();
    assert_eq!(st.size, 0);
    assert_eq!(st.blocks, 1);
    assert_eq!(fs.free_blocks(), before + 5);
    assert!(read_file(&mut fs, "/t").is_empty());
}

#[test]
fn append_writes_at_end_of_file() {
    let (_disk, mut fs) = fresh(2048);
    write_file(&mut fs, "/log", b"hello");

    let fd = fs.open("/log", OpenFlags::WRONLY | OpenFlags::APPEND).unwrap();
    assert_eq!(fs.tell(fd).unwrap(), 5);
    fs.write(fd, b" world").unwrap();
    fs.close(fd).unwrap();

    assert_eq!(read_file(&mut fs, "/log"), b"hello world");
}

#[test]
fn seek_overwrites_in_place() {
    let (_disk, mut fs) = fresh(2048);
    let mut data = pattern(1500);
    write_file(&mut fs, "/s", &data);

    let fd = fs.open("/s", OpenFlags::RDWR).unwrap();
    assert_eq!(fs.seek(fd, SeekFrom::Start(510)).unwrap(), 510);
    let mut ten = [0u8; 10];
    assert_eq!(fs.read(fd, &mut ten).unwrap(), 10);
    assert_eq!(&ten[..], &data[510..520]);

    assert_eq!(fs.seek(fd, SeekFrom::Start(700)).unwrap(), 700);
    fs.write(fd, b"XXXXX").unwrap();
    assert_eq!(fs.seek(fd, SeekFrom::Current(-5)).unwrap(), 700);
    let mut five = [0u8; 5];
    fs.read(fd, &mut five).unwrap();
    assert_eq!(&five, b"XXXXX");

    assert_eq!(fs.seek(fd, SeekFrom::End(0)).unwrap(), 1500);
    assert!(matches!(
        fs.seek(fd, SeekFrom::End(1)),
        Err(FileSystemError::InvalidArgument(_))
    ));
    assert!(matches!(
        fs.seek(fd, SeekFrom::Current(-2000)),
        Err(FileSystemError::InvalidArgument(_))
    ));
    fs.close(fd).unwrap();

    data[700..705].copy_from_slice(b"XXXXX");
    assert_eq!(read_file(&mut fs, "/s"), data);
    assert_eq!(fs.stat("/s").unwrap().size, 1500);
}

#[test]
fn file_size_is_bounded_by_the_block_list() {
    let (_disk, mut fs) = fresh(2048);
    let max = MAX_FILE_SIZE as usize;

    let fd = fs.open("/big", OpenFlags::WRONLY | OpenFlags::CREATE).unwrap();
    assert_eq!(fs.write(fd, &pattern(max + 10)).unwrap(), max);
    assert!(matches!(
        fs.write(fd, b"more"),
        Err(FileSystemError::FileTooLarge)
    ));
    fs.close(fd).unwrap();

    assert_eq!(fs.stat("/big").unwrap().size, MAX_FILE_SIZE);
    assert_eq!(read_file(&mut fs, "/big"), pattern(max));
}

#[test]
fn write_stops_short_when_the_disk_fills() {
    // 41 个保留块 + 64 个根目录块之后只剩 8 个块
    let (_disk, mut fs) = fresh(113);
    assert_eq!(fs.free_blocks(), 8);

    let fd = fs.open("/fill", OpenFlags::WRONLY | OpenFlags::CREATE).unwrap();
    assert_eq!(fs.free_blocks(), 7);
    // 需要 10 个块，分配失败后只写满已有的一个块
    assert_eq!(fs.write(fd, &pattern(5000)).unwrap(), 512);
    fs.close(fd).unwrap();
    assert_eq!(fs.stat("/fill").unwrap().size, 512);
}

#[test]
fn deleted_file_frees_its_blocks() {
    let (_disk, mut fs) = fresh(2048);
    let before = fs.free_blocks();
    write_file(&mut fs, "/gone", &pattern(2000));
    assert_eq!(fs.free_blocks(), before - 4);

    let fd = fs.open("/gone", OpenFlags::RDONLY).unwrap();
    assert!(matches!(fs.delete("/gone"), Err(FileSystemError::Busy(_))));
    fs.close(fd).unwrap();

    fs.delete("/gone").unwrap();
    assert_eq!(fs.free_blocks(), before);
    assert!(!fs.is_file("/gone"));
    assert!(matches!(
        fs.open("/gone", OpenFlags::RDONLY),
        Err(FileSystemError::NotFound(_))
    ));
}

#[test]
fn unmount_flushes_open_handles() {
    let (disk, mut fs) = fresh(2048);
    let fd = fs.open("/pending", OpenFlags::WRONLY | OpenFlags::CREATE).unwrap();
    fs.write(fd, b"not yet on disk").unwrap();
    drop(fs.unmount());

    let mut fs = FileSystem::mount(disk).unwrap();
    assert_eq!(read_file(&mut fs, "/pending"), b"not yet on disk");
}

#[test]
fn truncate_is_refused_while_another_handle_is_open() {
    let (_disk, mut fs) = fresh(2048);
    let data = pattern(2000);
    write_file(&mut fs, "/victim", &data);

    let reader = fs.open("/victim", OpenFlags::RDONLY).unwrap();
    assert!(matches!(
        fs.open("/victim", OpenFlags::WRONLY | OpenFlags::TRUNC),
        Err(FileSystemError::Busy(_))
    ));
    assert_eq!(fs.open_files(), 1);

    // 别的文件拿不到 victim 的块
    write_file(&mut fs, "/other", &[0xEE; 1500]);
    let mut back = vec![0u8; 2000];
    assert_eq!(fs.read(reader, &mut back).unwrap(), 2000);
    assert_eq!(back, data);
    fs.close(reader).unwrap();

    let fd = fs.open("/victim", OpenFlags::WRONLY | OpenFlags::TRUNC).unwrap();
    fs.close(fd).unwrap();
    assert_eq!(fs.stat("/victim").unwrap().size, 0);
    assert_eq!(read_file(&mut fs, "/other"), vec![0xEE; 1500]);
}

#[test]
fn only_one_writer_per_file() {
    let (_disk, mut fs) = fresh(2048);
    let start = fs.free_blocks();

    let first = fs.open("/f", OpenFlags::RDWR | OpenFlags::CREATE).unwrap();
    assert!(matches!(
        fs.open("/f", OpenFlags::RDWR),
        Err(FileSystemError::Busy(_))
    ));
    assert!(matches!(
        fs.open("/f", OpenFlags::WRONLY | OpenFlags::APPEND),
        Err(FileSystemError::Busy(_))
    ));
    let reader = fs.open("/f", OpenFlags::RDONLY).unwrap();

    assert_eq!(fs.write(first, &pattern(2048)).unwrap(), 2048);
    fs.close(first).unwrap();
    fs.close(reader).unwrap();

    // 第一个写句柄关闭后可以再打开写
    let second = fs.open("/f", OpenFlags::RDWR).unwrap();
    assert_eq!(fs.write(second, &[1u8; 2048]).unwrap(), 2048);
    fs.close(second).unwrap();

    let st = fs.stat("/f").unwrap();
    assert_eq!(st.size, 2048);
    assert_eq!(st.blocks, 4);
    assert_eq!(fs.free_blocks(), start - 4);

    fs.delete("/f").unwrap();
    assert_eq!(fs.free_blocks(), start);
}
