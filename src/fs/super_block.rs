use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    disk::{blocks_for, Block, BlockDevice, BLOCK_SIZE},
    fs::{
        config::{
            FormatOptions, BITMAP_RESERVED_BLOCKS, BITMAP_START_BLOCK_ID, SUPER_BLOCK_BLOCK_ID,
            VOLUME_SIGNATURE,
        },
        error::{FileSystemError, Result},
    },
    utils::{current_timestamp, generate_uuid},
};

// 卷名最多 63 字节
pub const MAX_VOLUME_NAME_LEN: usize = 63;

/// 卷头，固定存放在 0 号块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperBlock {
    pub magic: u64, //魔数，用于识别文件系统
    pub volume_name: String,
    pub volume_id: String, // 格式化时生成的 uuid
    /** 几何信息 */
    pub block_size: u64,   // 每块大小（字节）
    pub total_blocks: u64, // 卷的总块数
    /** 位图与根目录位置 */
    pub bitmap_start: u32,   // 空闲块位图起始块号
    pub bitmap_blocks: u32,  // 位图实际占用的块数
    pub root_dir_start: u32, // 根目录第一个块
    pub created: i64,
}

impl SuperBlock {
    /// 新卷的卷头，根目录位置要等根目录建好后再填
    pub fn new(options: &FormatOptions, total_blocks: u64) -> Self {
        let mut volume_name = options.volume_name.clone();
        if volume_name.len() > MAX_VOLUME_NAME_LEN {
            let mut cut = MAX_VOLUME_NAME_LEN;
            while !volume_name.is_char_boundary(cut) {
                cut -= 1;
            }
            volume_name.truncate(cut);
        }

        Self {
            magic: VOLUME_SIGNATURE,
            volume_name,
            volume_id: generate_uuid(),
            block_size: BLOCK_SIZE as u64,
            total_blocks,
            bitmap_start: BITMAP_START_BLOCK_ID,
            bitmap_blocks: blocks_for(total_blocks as usize) as u32,
            root_dir_start: 0,
            created: current_timestamp(),
        }
    }

    /// 读取 0 号块。签名不对或者内容解析不了都说明磁盘还没格式化，返回 None
    pub fn read(disk: &impl BlockDevice) -> Result<Option<Self>> {
        let mut block: Block = [0; BLOCK_SIZE];
        disk.read_exact_blocks(&mut block, SUPER_BLOCK_BLOCK_ID)?;

        let header: SuperBlock = match bincode::deserialize(&block) {
            Ok(h) => h,
            Err(e) => {
                debug!("block 0 does not hold a volume header: {}", e);
                return Ok(None);
            }
        };
        if header.magic != VOLUME_SIGNATURE {
            return Ok(None);
        }
        Ok(Some(header))
    }

    /// 先清零整块再写入，保证卷头之外的字节都是 0
    pub fn write(&self, disk: &impl BlockDevice) -> Result<()> {
        let mut block: Block = [0; BLOCK_SIZE];
        let bytes = bincode::serialize(self)?;
        if bytes.len() > BLOCK_SIZE {
            return Err(FileSystemError::Corrupted(format!(
                "volume header needs {} bytes",
                bytes.len()
            )));
        }
        block[..bytes.len()].copy_from_slice(&bytes);
        disk.write_exact_blocks(&block, SUPER_BLOCK_BLOCK_ID)?;
        Ok(())
    }

    /// 挂载前的几何校验
    pub fn validate(&self, disk: &impl BlockDevice) -> Result<()> {
        if self.block_size != BLOCK_SIZE as u64 {
            return Err(FileSystemError::Corrupted(format!(
                "block size {} does not match device block size {}",
                self.block_size, BLOCK_SIZE
            )));
        }
        if self.total_blocks > disk.block_count() {
            return Err(FileSystemError::Corrupted(format!(
                "volume has {} blocks but device only {}",
                self.total_blocks,
                disk.block_count()
            )));
        }
        if self.bitmap_start != BITMAP_START_BLOCK_ID || self.bitmap_blocks > BITMAP_RESERVED_BLOCKS {
            return Err(FileSystemError::Corrupted(
                "free space map outside the reserved region".to_string(),
            ));
        }
        if u64::from(self.root_dir_start) >= self.total_blocks {
            return Err(FileSystemError::Corrupted(format!(
                "root directory start {} out of range",
                self.root_dir_start
            )));
        }
        Ok(())
    }
}
