use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::fs::{
    config::{MAX_ENTRY_BLOCKS, MAX_NAME_LEN, NAME_CAPACITY},
    error::{FileSystemError, Result},
};

// 目录项类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// 目录项：文件和目录共用同一种定长记录。
///
/// 名字为空表示空槽位。`blocks[..blocks_count]` 是按顺序分配给该项的块号；
/// 对目录来说就是目录数组本身所在的块。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    #[serde(with = "BigArray")]
    name: [u8; NAME_CAPACITY],
    pub size: u64,
    pub mode: u32,
    #[serde(with = "BigArray")]
    blocks: [u32; MAX_ENTRY_BLOCKS],
    blocks_count: u32,
    pub created: i64,
    pub modified: i64,
    pub is_directory: bool,
}

impl DirEntry {
    pub fn empty() -> Self {
        Self {
            name: [0; NAME_CAPACITY],
            size: 0,
            mode: 0,
            blocks: [0; MAX_ENTRY_BLOCKS],
            blocks_count: 0,
            created: 0,
            modified: 0,
            is_directory: false,
        }
    }

    pub fn new(name: &str, kind: EntryKind, mode: u32, blocks: &[u32], now: i64) -> Result<Self> {
        let mut entry = Self::empty();
        entry.set_name(name)?;
        entry.set_blocks(blocks)?;
        entry.mode = mode;
        entry.created = now;
        entry.modified = now;
        entry.is_directory = kind == EntryKind::Directory;
        Ok(entry)
    }

    pub fn is_empty(&self) -> bool {
        self.name[0] == 0
    }

    pub fn kind(&self) -> EntryKind {
        if self.is_directory {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &self.name[..len]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.name = [0; NAME_CAPACITY];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    pub fn blocks(&self) -> &[u32] {
        &self.blocks[..self.blocks_count as usize]
    }

    pub fn blocks_count(&self) -> usize {
        self.blocks_count as usize
    }

    pub fn first_block(&self) -> Option<u32> {
        self.blocks().first().copied()
    }

    pub fn set_blocks(&mut self, blocks: &[u32]) -> Result<()> {
        if blocks.len() > MAX_ENTRY_BLOCKS {
            return Err(FileSystemError::FileTooLarge);
        }
        self.blocks = [0; MAX_ENTRY_BLOCKS];
        self.blocks[..blocks.len()].copy_from_slice(blocks);
        self.blocks_count = blocks.len() as u32;
        Ok(())
    }

    /// 追加块到块列表末尾
    pub fn push_blocks(&mut self, blocks: &[u32]) -> Result<()> {
        let used = self.blocks_count();
        if used + blocks.len() > MAX_ENTRY_BLOCKS {
            return Err(FileSystemError::FileTooLarge);
        }
        self.blocks[used..used + blocks.len()].copy_from_slice(blocks);
        self.blocks_count += blocks.len() as u32;
        Ok(())
    }

    /// 去掉 `keep` 之后的块，返回被去掉的块号
    pub fn truncate_blocks(&mut self, keep: usize) -> Vec<u32> {
        let used = self.blocks_count();
        if keep >= used {
            return Vec::new();
        }
        let dropped = self.blocks[keep..used].to_vec();
        self.blocks[keep..used].fill(0);
        self.blocks_count = keep as u32;
        dropped
    }

    /// 清空该槽位
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    /// 编码进一个定长槽位，槽位剩余部分补 0
    pub fn encode_into(&self, slot: &mut [u8]) -> Result<()> {
        slot.fill(0);
        let mut writer = &mut slot[..];
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    pub fn decode(slot: &[u8]) -> Result<Self> {
        let entry: DirEntry = bincode::deserialize(slot)?;
        if entry.blocks_count as usize > MAX_ENTRY_BLOCKS {
            return Err(FileSystemError::Corrupted(format!(
                "entry '{}' claims {} blocks",
                entry.name(),
                entry.blocks_count
            )));
        }
        Ok(entry)
    }
}

/// 名字不能为空、不能含 '/'、不能超过 255 字节
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FileSystemError::InvalidPath(name.to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FileSystemError::NameTooLong(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::config::ENTRY_RECORD_SIZE;

    #[test]
    fn record_fits_in_slot() {
        let len = bincode::serialized_size(&DirEntry::empty()).unwrap() as usize;
        assert!(len <= ENTRY_RECORD_SIZE);
    }

    #[test]
    fn zeroed_slot_is_an_empty_entry() {
        let slot = [0u8; ENTRY_RECORD_SIZE];
        let entry = DirEntry::decode(&slot).unwrap();
        assert!(entry.is_empty());
        assert_eq!(entry, DirEntry::empty());
    }

    #[test]
    fn entry_survives_slot_encoding() {
        let entry = DirEntry::new("notes.txt", EntryKind::File, 0o644, &[41, 77, 90], 1_700_000_000)
            .unwrap();
        let mut slot = [0xFFu8; ENTRY_RECORD_SIZE];
        entry.encode_into(&mut slot).unwrap();
        let back = DirEntry::decode(&slot).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.name(), "notes.txt");
        assert_eq!(back.blocks(), &[41, 77, 90]);
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(matches!(
            validate_name(&"n".repeat(256)),
            Err(FileSystemError::NameTooLong(_))
        ));
        assert!(validate_name(&"n".repeat(255)).is_ok());
    }

    #[test]
    fn block_list_is_bounded() {
        let mut entry = DirEntry::empty();
        entry.set_blocks(&vec![50; MAX_ENTRY_BLOCKS]).unwrap();
        assert!(matches!(
            entry.push_blocks(&[51]),
            Err(FileSystemError::FileTooLarge)
        ));
        assert_eq!(entry.truncate_blocks(1).len(), MAX_ENTRY_BLOCKS - 1);
        assert_eq!(entry.blocks_count(), 1);
    }
}
