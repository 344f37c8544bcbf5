/// 每个逻辑块（Block）的大小：512B
/// 文件系统以“块”为最小读写单位。
pub const BLOCK_SIZE: usize = 512;

/// 默认卷的块总数：2048 块 × 512B = 1MB
pub const DEFAULT_BLOCK_COUNT: u64 = 2048;

/// 定义一个逻辑块类型（每块 512B 的字节数组）
/// 所有磁盘读写都以 Block 为单位进行。
pub type Block = [u8; BLOCK_SIZE];

/// 字节数换算成需要的块数（向上取整）
pub const fn blocks_for(bytes: usize) -> usize {
    (bytes + BLOCK_SIZE - 1) / BLOCK_SIZE
}
