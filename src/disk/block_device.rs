use std::io::{Error, ErrorKind, Result};

use crate::disk::types::BLOCK_SIZE;

/// 按块计数的设备读写接口。
///
/// `read_blocks` / `write_blocks` 从 `start` 开始传输 `count` 个整块，返回实际传输的块数。
/// 这一层不把“少传”当作错误，由上层决定如何处理（文件系统一律视为失败）。
pub trait BlockDevice: Send + Sync {
    /// 设备可寻址的块总数
    fn block_count(&self) -> u64;

    fn read_blocks(&self, buf: &mut [u8], count: u64, start: u64) -> Result<u64>;
    fn write_blocks(&self, buf: &[u8], count: u64, start: u64) -> Result<u64>;

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// 精确读取 `buf.len() / BLOCK_SIZE` 个块，少一个都算失败
    fn read_exact_blocks(&self, buf: &mut [u8], start: u64) -> Result<()> {
        let count = (buf.len() / BLOCK_SIZE) as u64;
        let read = self.read_blocks(buf, count, start)?;
        if read != count {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("short read at block {start}: {read} of {count} blocks"),
            ));
        }
        Ok(())
    }

    /// 精确写入 `buf.len() / BLOCK_SIZE` 个块，少一个都算失败
    fn write_exact_blocks(&self, buf: &[u8], start: u64) -> Result<()> {
        let count = (buf.len() / BLOCK_SIZE) as u64;
        let written = self.write_blocks(buf, count, start)?;
        if written != count {
            return Err(Error::new(
                ErrorKind::WriteZero,
                format!("short write at block {start}: {written} of {count} blocks"),
            ));
        }
        Ok(())
    }
}

/// 计算一次请求实际能传输的块数：不能越过设备末尾，也不能超出缓冲区容量
pub(crate) fn clamp_transfer(total: u64, count: u64, start: u64, buf_len: usize) -> u64 {
    let fits_buf = (buf_len / BLOCK_SIZE) as u64;
    count.min(fits_buf).min(total.saturating_sub(start))
}
