use std::collections::HashSet;

use log::{debug, warn};

use crate::{
    disk::{blocks_for, Block, BlockDevice, BLOCK_SIZE},
    fs::{
        config::{BITMAP_RESERVED_BLOCKS, BITMAP_START_BLOCK_ID, FIRST_USABLE_BLOCK},
        error::{FileSystemError, Result},
    },
};

const FREE: u8 = 0;
const USED: u8 = 1;

/// 某个块当前的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Used,
    Reserved, // 卷头与位图所在的保留区
}

/// 空闲块位图：每个块一个字节，0 = 空闲，1 = 已用。
/// 任何一次分配或释放之后都会把整张位图写回磁盘。
#[derive(Debug)]
pub struct DataBlockBitmap {
    pub bits: Vec<u8>,    // 每个字节对应一个块
    pub start_block: u32, // 位图在磁盘中的起始块号
    free_blocks: u64,     // 当前空闲块数
}

impl DataBlockBitmap {
    /// 新建位图：全部清零，保留区标记为已用，然后写盘
    pub fn initialize(disk: &impl BlockDevice, total_blocks: u64) -> Result<Self> {
        let needed = blocks_for(total_blocks as usize) as u32;
        if needed > BITMAP_RESERVED_BLOCKS {
            return Err(FileSystemError::ReservedRegionTooSmall {
                needed,
                available: BITMAP_RESERVED_BLOCKS,
            });
        }

        let mut bits = vec![FREE; total_blocks as usize];
        let reserved = (FIRST_USABLE_BLOCK as usize).min(bits.len());
        bits[..reserved].fill(USED);

        let bitmap = Self {
            free_blocks: count_free(&bits),
            bits,
            start_block: BITMAP_START_BLOCK_ID,
        };
        bitmap.sync(disk)?;
        debug!(
            "free space map initialized: {} blocks, {} free",
            total_blocks, bitmap.free_blocks
        );
        Ok(bitmap)
    }

    /// 重新挂载时从磁盘整体读回位图
    pub fn load(disk: &impl BlockDevice, start_block: u32, total_blocks: u64) -> Result<Self> {
        let size_in_block = blocks_for(total_blocks as usize);
        let mut bits = vec![0u8; size_in_block * BLOCK_SIZE];
        disk.read_exact_blocks(&mut bits, u64::from(start_block))?;

        // 截掉多余字节，只保留有效部分
        bits.truncate(total_blocks as usize);

        if bits.iter().any(|&b| b > USED) {
            return Err(FileSystemError::Corrupted(
                "free space map holds values other than 0 and 1".to_string(),
            ));
        }
        let reserved = (FIRST_USABLE_BLOCK as usize).min(bits.len());
        if bits[..reserved].iter().any(|&b| b != USED) {
            return Err(FileSystemError::Corrupted(
                "reserved blocks are marked free".to_string(),
            ));
        }

        Ok(Self {
            free_blocks: count_free(&bits),
            bits,
            start_block,
        })
    }

    pub fn total_blocks(&self) -> u64 {
        self.bits.len() as u64
    }

    pub fn free_blocks(&self) -> u64 {
        self.free_blocks
    }

    /// 从第一个可用块开始线性扫描，收集 `count` 个空闲块。
    /// 空闲块不够时撤销内存中已做的标记并返回 DiskFull；成功时整张位图写盘。
    pub fn allocate(&mut self, disk: &impl BlockDevice, count: usize) -> Result<Vec<u32>> {
        if count == 0 {
            return Err(FileSystemError::InvalidArgument(
                "cannot allocate zero blocks".to_string(),
            ));
        }

        let mut allocated = Vec::with_capacity(count);
        for block in FIRST_USABLE_BLOCK as usize..self.bits.len() {
            if allocated.len() == count {
                break;
            }
            if self.bits[block] == FREE {
                self.bits[block] = USED;
                allocated.push(block as u32);
            }
        }

        if allocated.len() < count {
            warn!(
                "allocation of {} blocks failed, only {} free",
                count,
                allocated.len()
            );
            self.rollback(&allocated);
            return Err(FileSystemError::DiskFull);
        }

        if let Err(e) = self.sync(disk) {
            self.rollback(&allocated);
            return Err(e);
        }
        self.free_blocks -= count as u64;
        debug!("allocated blocks {:?}", allocated);
        Ok(allocated)
    }

    /// 释放一组块。越界块直接跳过；保留块、已经空闲的块（包括同一次调用里重复出现的）
    /// 会让整次调用失败，且位图保持不变。被释放的块先在磁盘上清零。
    pub fn free(&mut self, disk: &impl BlockDevice, blocks: &[u32]) -> Result<()> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(blocks.len());
        for &block in blocks {
            if u64::from(block) >= self.total_blocks() {
                continue;
            }
            if block < FIRST_USABLE_BLOCK {
                return Err(FileSystemError::ReservedBlock(block));
            }
            if self.bits[block as usize] == FREE || !seen.insert(block) {
                return Err(FileSystemError::DoubleFree(block));
            }
            targets.push(block);
        }

        // 不信任旧数据，先清零再标记空闲
        let zero: Block = [0; BLOCK_SIZE];
        for &block in &targets {
            disk.write_exact_blocks(&zero, u64::from(block))?;
        }
        for &block in &targets {
            self.bits[block as usize] = FREE;
        }
        self.free_blocks += targets.len() as u64;

        self.sync(disk)?;
        debug!("freed blocks {:?}", targets);
        Ok(())
    }

    /// 查询某个块的状态，不修改位图
    pub fn availability(&self, block: u32) -> Result<BlockState> {
        if u64::from(block) >= self.total_blocks() {
            return Err(FileSystemError::InvalidArgument(format!(
                "block {} is outside the volume",
                block
            )));
        }
        if block < FIRST_USABLE_BLOCK {
            return Ok(BlockState::Reserved);
        }
        Ok(match self.bits[block as usize] {
            FREE => BlockState::Free,
            _ => BlockState::Used,
        })
    }

    /// 把整张位图写回磁盘，不足一块的部分用 0 填充
    pub fn sync(&self, disk: &impl BlockDevice) -> Result<()> {
        let mut bits_to_write = self.bits.clone();
        bits_to_write.resize(blocks_for(bits_to_write.len()) * BLOCK_SIZE, 0);
        disk.write_exact_blocks(&bits_to_write, u64::from(self.start_block))?;
        Ok(())
    }

    fn rollback(&mut self, provisional: &[u32]) {
        for &block in provisional {
            self.bits[block as usize] = FREE;
        }
    }
}

fn count_free(bits: &[u8]) -> u64 {
    bits.iter().filter(|&&b| b == FREE).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::RamDisk;

    fn fresh(total: u64) -> (RamDisk, DataBlockBitmap) {
        let disk = RamDisk::new(total);
        let bitmap = DataBlockBitmap::initialize(&disk, total).unwrap();
        (disk, bitmap)
    }

    #[test]
    fn initialize_then_load_is_identical() {
        for total in [64u64, 512, 513, 2048, 20480] {
            let (disk, bitmap) = fresh(total);
            let loaded = DataBlockBitmap::load(&disk, BITMAP_START_BLOCK_ID, total).unwrap();
            assert_eq!(loaded.bits, bitmap.bits, "total = {}", total);
            assert_eq!(loaded.free_blocks(), total - u64::from(FIRST_USABLE_BLOCK));
        }
    }

    #[test]
    fn bitmap_larger_than_reserved_region_is_rejected() {
        let disk = RamDisk::new(64);
        let err = DataBlockBitmap::initialize(&disk, 20481).unwrap_err();
        assert!(matches!(
            err,
            FileSystemError::ReservedRegionTooSmall { needed: 41, available: 40 }
        ));
    }

    #[test]
    fn allocate_returns_distinct_usable_blocks_in_order() {
        let (disk, mut bitmap) = fresh(128);
        let blocks = bitmap.allocate(&disk, 5).unwrap();
        assert_eq!(blocks, vec![41, 42, 43, 44, 45]);
        for &b in &blocks {
            assert_eq!(bitmap.availability(b).unwrap(), BlockState::Used);
        }

        // 位图已经落盘
        let loaded = DataBlockBitmap::load(&disk, BITMAP_START_BLOCK_ID, 128).unwrap();
        assert_eq!(loaded.bits, bitmap.bits);
    }

    #[test]
    fn failed_allocation_rolls_back() {
        let (disk, mut bitmap) = fresh(50);
        let before = bitmap.free_blocks();
        let bits_before = bitmap.bits.clone();
        assert!(matches!(
            bitmap.allocate(&disk, 10),
            Err(FileSystemError::DiskFull)
        ));
        assert_eq!(bitmap.free_blocks(), before);
        assert_eq!(bitmap.bits, bits_before);
    }

    #[test]
    fn free_rejects_reserved_and_double_free_without_side_effects() {
        let (disk, mut bitmap) = fresh(128);
        let blocks = bitmap.allocate(&disk, 3).unwrap();
        let bits_before = bitmap.bits.clone();

        assert!(matches!(
            bitmap.free(&disk, &[blocks[0], 3]),
            Err(FileSystemError::ReservedBlock(3))
        ));
        assert!(matches!(
            bitmap.free(&disk, &[blocks[0], 100]),
            Err(FileSystemError::DoubleFree(100))
        ));
        assert!(matches!(
            bitmap.free(&disk, &[blocks[1], blocks[1]]),
            Err(FileSystemError::DoubleFree(_))
        ));
        assert_eq!(bitmap.bits, bits_before);
    }

    #[test]
    fn free_zeroes_blocks_and_skips_out_of_range() {
        let (disk, mut bitmap) = fresh(128);
        let blocks = bitmap.allocate(&disk, 2).unwrap();
        disk.write_exact_blocks(&[0xAB; BLOCK_SIZE], u64::from(blocks[0]))
            .unwrap();

        bitmap.free(&disk, &[blocks[0], blocks[1], 9999]).unwrap();
        assert_eq!(disk.snapshot_block(u64::from(blocks[0])), Some(vec![0u8; BLOCK_SIZE]));
        assert_eq!(bitmap.availability(blocks[0]).unwrap(), BlockState::Free);
        assert_eq!(bitmap.free_blocks(), 128 - 41);
    }

    #[test]
    fn availability_classifies_blocks() {
        let (_disk, bitmap) = fresh(64);
        assert_eq!(bitmap.availability(0).unwrap(), BlockState::Reserved);
        assert_eq!(bitmap.availability(40).unwrap(), BlockState::Reserved);
        assert_eq!(bitmap.availability(41).unwrap(), BlockState::Free);
        assert!(bitmap.availability(64).is_err());
    }
}
