use std::{
    io::Result,
    sync::{Arc, Mutex},
};

use crate::disk::{
    block_device::{clamp_transfer, BlockDevice},
    types::BLOCK_SIZE,
};

/// 纯内存磁盘，主要用于测试和临时卷。
/// 克隆出来的句柄共享同一块内存，便于“卸载后重新挂载”。
#[derive(Debug, Clone)]
pub struct RamDisk {
    inner: Arc<Mutex<Vec<u8>>>,
    block_count: u64,
}

impl RamDisk {
    pub fn new(block_count: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![0u8; block_count as usize * BLOCK_SIZE])),
            block_count,
        }
    }

    /// 直接取出某个块的内容，越界返回 None
    pub fn snapshot_block(&self, block: u64) -> Option<Vec<u8>> {
        if block >= self.block_count {
            return None;
        }
        let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = block as usize * BLOCK_SIZE;
        data.get(start..start + BLOCK_SIZE).map(<[u8]>::to_vec)
    }
}

impl BlockDevice for RamDisk {
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, buf: &mut [u8], count: u64, start: u64) -> Result<u64> {
        let n = clamp_transfer(self.block_count, count, start, buf.len());
        if n == 0 {
            return Ok(0);
        }
        let begin = start as usize * BLOCK_SIZE;
        let len = n as usize * BLOCK_SIZE;
        let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        buf[..len].copy_from_slice(&data[begin..begin + len]);
        Ok(n)
    }

    fn write_blocks(&self, buf: &[u8], count: u64, start: u64) -> Result<u64> {
        let n = clamp_transfer(self.block_count, count, start, buf.len());
        if n == 0 {
            return Ok(0);
        }
        let begin = start as usize * BLOCK_SIZE;
        let len = n as usize * BLOCK_SIZE;
        let mut data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        data[begin..begin + len].copy_from_slice(&buf[..len]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_count_past_device_end() {
        let disk = RamDisk::new(4);
        let buf = vec![7u8; 3 * BLOCK_SIZE];
        assert_eq!(disk.write_blocks(&buf, 3, 2).unwrap(), 2);
        assert!(disk.write_exact_blocks(&buf, 2).is_err());

        let mut back = vec![0u8; 2 * BLOCK_SIZE];
        assert_eq!(disk.read_blocks(&mut back, 2, 2).unwrap(), 2);
        assert!(back.iter().all(|&b| b == 7));
    }

    #[test]
    fn clones_share_storage() {
        let disk = RamDisk::new(2);
        let other = disk.clone();
        disk.write_exact_blocks(&[9u8; BLOCK_SIZE], 1).unwrap();
        assert_eq!(other.snapshot_block(1), Some(vec![9u8; BLOCK_SIZE]));
        assert_eq!(other.snapshot_block(other.block_count()), None);
    }
}
