use crate::disk::{blocks_for, BLOCK_SIZE};

/// 卷签名 "BugThugs"，用来判断磁盘是否已经格式化
pub const VOLUME_SIGNATURE: u64 = 0x4275_6754_6875_6773;
pub const DEFAULT_VOLUME_NAME: &str = "BlockFS Volume";

pub const SUPER_BLOCK_BLOCK_ID: u64 = 0;
pub const BITMAP_START_BLOCK_ID: u32 = 1;

// 位图独占的保留块数，每块 512 字节、每字节记录一个块，最多管理 20480 个块
pub const BITMAP_RESERVED_BLOCKS: u32 = 40;

// [0, FIRST_USABLE_BLOCK) 永远标记为已用，既不能分配也不能释放
pub const FIRST_USABLE_BLOCK: u32 = BITMAP_START_BLOCK_ID + BITMAP_RESERVED_BLOCKS;

// 每个目录固定 32 个目录项，每个目录项占 1024 字节的槽位
pub const DIRECTORY_ENTRIES: usize = 32;
pub const ENTRY_RECORD_SIZE: usize = 1024;
pub const DIRECTORY_BYTES: usize = DIRECTORY_ENTRIES * ENTRY_RECORD_SIZE;
pub const DIRECTORY_BLOCKS: usize = blocks_for(DIRECTORY_BYTES);

// 名字最多 255 字节，存储时补一个结尾 0
pub const MAX_NAME_LEN: usize = 255;
pub const NAME_CAPACITY: usize = MAX_NAME_LEN + 1;

// 单个目录项最多记录 182 个块（约 90KB 数据）
pub const MAX_ENTRY_BLOCKS: usize = 182;
pub const MAX_FILE_SIZE: u64 = (MAX_ENTRY_BLOCKS * BLOCK_SIZE) as u64;

pub const MAX_OPEN_FILES: usize = 20;
pub const MAX_PATH_LEN: usize = 256;

pub const DEFAULT_DIR_MODE: u32 = 0o755;
pub const DEFAULT_FILE_MODE: u32 = 0o777;

/// 格式化参数
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub volume_name: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            volume_name: DEFAULT_VOLUME_NAME.to_string(),
        }
    }
}
