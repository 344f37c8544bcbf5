//! 集成测试共用的工具
#![allow(dead_code)]

use std::{
    io::{Error, ErrorKind, Result},
    sync::atomic::{AtomicI64, Ordering},
};

use blockfs::{BlockDevice, FileSystem, FormatOptions, OpenFlags, RamDisk};

pub const ORANGE: &str = "\x1b[38;5;214m";
pub const RESET: &str = "\x1b[0m";

/// 测试过程中打印信息，例如 log!("{}", x) -> [test] x
#[macro_export]
macro_rules! log {
    ($msg:expr, $($arg:tt)*) => {
        println!("{}[test] {}{}", crate::common::ORANGE, format!($msg, $($arg)*), crate::common::RESET)
    };
}

/// 在一块全新的内存磁盘上格式化
pub fn fresh(blocks: u64) -> (RamDisk, FileSystem<RamDisk>) {
    let disk = RamDisk::new(blocks);
    let fs = FileSystem::format(disk.clone(), &FormatOptions::default()).unwrap();
    (disk, fs)
}

/// 可重复的测试数据
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn write_file<D: BlockDevice>(fs: &mut FileSystem<D>, path: &str, data: &[u8]) {
    let fd = fs
        .open(path, OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::TRUNC)
        .unwrap();
    assert_eq!(fs.write(fd, data).unwrap(), data.len());
    fs.close(fd).unwrap();
}

pub fn read_file<D: BlockDevice>(fs: &mut FileSystem<D>, path: &str) -> Vec<u8> {
    let fd = fs.open(path, OpenFlags::RDONLY).unwrap();
    let mut out = Vec::new();
    let mut chunk = [0u8; 700];
    loop {
        let n = fs.read(fd, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    fs.close(fd).unwrap();
    out
}

/// 包一层内存磁盘，允许再写 `budget` 次之后所有写入都失败。负数表示不限制
pub struct FlakyDisk {
    pub inner: RamDisk,
    budget: AtomicI64,
}

impl FlakyDisk {
    pub fn new(inner: RamDisk) -> Self {
        Self {
            inner,
            budget: AtomicI64::new(-1),
        }
    }

    pub fn fail_after(&self, writes: i64) {
        self.budget.store(writes, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.budget.store(-1, Ordering::SeqCst);
    }
}

impl BlockDevice for FlakyDisk {
    fn block_count(&self) -> u64 {
        self.inner.block_count()
    }

    fn read_blocks(&self, buf: &mut [u8], count: u64, start: u64) -> Result<u64> {
        self.inner.read_blocks(buf, count, start)
    }

    fn write_blocks(&self, buf: &[u8], count: u64, start: u64) -> Result<u64> {
        let left = self.budget.load(Ordering::SeqCst);
        if left == 0 {
            return Err(Error::new(ErrorKind::Other, "injected write failure"));
        }
        if left > 0 {
            self.budget.store(left - 1, Ordering::SeqCst);
        }
        self.inner.write_blocks(buf, count, start)
    }
}
