use log::{debug, error, warn};

use crate::{
    disk::{BlockDevice, BLOCK_SIZE},
    fs::{
        config::{DIRECTORY_BLOCKS, DIRECTORY_BYTES, DIRECTORY_ENTRIES, ENTRY_RECORD_SIZE},
        data_block_bitmap::DataBlockBitmap,
        entry::{DirEntry, EntryKind},
        error::{FileSystemError, Result},
    },
    utils::contiguous_runs,
};

pub const DOT: &str = ".";
pub const DOTDOT: &str = "..";

/// 目录结构：固定 32 个目录项的数组。
///
/// 0 号槽位是 "."，它的块列表就是目录自身的存储位置；
/// 1 号槽位是 ".."，记录父目录的存储位置（根目录指向自己）。
/// ".." 只是一个回指，不代表所有权：目录归属于父目录中指向它的那一项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
}

impl Directory {
    /// 新建一个目录：分配块、写好 "." 和 ".."，整体写盘后返回。
    /// `parent` 为 None 时创建的是根目录。写盘失败会把刚分配的块还回去。
    pub fn create(
        disk: &impl BlockDevice,
        bitmap: &mut DataBlockBitmap,
        parent: Option<&Directory>,
        mode: u32,
        now: i64,
    ) -> Result<Self> {
        let blocks = bitmap.allocate(disk, DIRECTORY_BLOCKS)?;

        let mut dir = Self::blank();
        let parent_blocks = parent.map_or(blocks.as_slice(), |p| p.location());
        let mut dot = DirEntry::new(DOT, EntryKind::Directory, mode, &blocks, now)?;
        let mut dotdot = DirEntry::new(DOTDOT, EntryKind::Directory, mode, parent_blocks, now)?;
        dot.size = DIRECTORY_BYTES as u64;
        dotdot.size = DIRECTORY_BYTES as u64;
        dir.entries[0] = dot;
        dir.entries[1] = dotdot;

        if let Err(e) = dir.persist(disk) {
            error!("writing new directory at {:?} failed: {}", blocks.first(), e);
            if let Err(free_err) = bitmap.free(disk, &blocks) {
                warn!("could not release blocks of failed directory: {}", free_err);
            }
            return Err(e);
        }

        debug!("created directory at blocks {}..", blocks[0]);
        Ok(dir)
    }

    fn blank() -> Self {
        Self {
            entries: vec![DirEntry::empty(); DIRECTORY_ENTRIES],
        }
    }

    /// 读取某个目录项所描述的目录（loadDirectory）
    pub fn load(disk: &impl BlockDevice, entry: &DirEntry) -> Result<Self> {
        if !entry.is_directory {
            return Err(FileSystemError::NotADirectory(entry.name()));
        }
        let dir = Self::load_at(disk, entry.blocks())?;
        if dir.location() != entry.blocks() {
            return Err(FileSystemError::Corrupted(format!(
                "directory '{}' does not describe its own blocks",
                entry.name()
            )));
        }
        Ok(dir)
    }

    /// 按块列表读取目录数组，任何一次少读都让整个加载失败
    pub fn load_at(disk: &impl BlockDevice, blocks: &[u32]) -> Result<Self> {
        if blocks.len() != DIRECTORY_BLOCKS {
            return Err(FileSystemError::Corrupted(format!(
                "directory spans {} blocks, expected {}",
                blocks.len(),
                DIRECTORY_BLOCKS
            )));
        }

        let mut bytes = vec![0u8; DIRECTORY_BYTES];
        let mut offset = 0;
        for (start, len) in contiguous_runs(blocks) {
            let end = offset + len * BLOCK_SIZE;
            disk.read_exact_blocks(&mut bytes[offset..end], u64::from(start))?;
            offset = end;
        }
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let entries = bytes
            .chunks_exact(ENTRY_RECORD_SIZE)
            .take(DIRECTORY_ENTRIES)
            .map(DirEntry::decode)
            .collect::<Result<Vec<_>>>()?;
        if entries.len() != DIRECTORY_ENTRIES || entries[0].is_empty() {
            return Err(FileSystemError::Corrupted(
                "directory array is truncated or has no '.' entry".to_string(),
            ));
        }
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; DIRECTORY_BYTES];
        for (entry, slot) in self.entries.iter().zip(bytes.chunks_exact_mut(ENTRY_RECORD_SIZE)) {
            entry.encode_into(slot)?;
        }
        Ok(bytes)
    }

    /// 把整个目录数组写回它自己的块。
    ///
    /// 写之前先读出旧内容；中途某段写失败时，用旧内容覆盖已经写过的段，
    /// 尽量让磁盘上的目录保持在写之前的样子，然后返回错误。
    pub fn persist(&self, disk: &impl BlockDevice) -> Result<()> {
        let bytes = self.to_bytes()?;
        let runs = contiguous_runs(self.location());

        let mut previous = vec![0u8; DIRECTORY_BYTES];
        let mut offset = 0;
        for &(start, len) in &runs {
            let end = offset + len * BLOCK_SIZE;
            disk.read_exact_blocks(&mut previous[offset..end], u64::from(start))?;
            offset = end;
        }

        let mut offset = 0;
        for (i, &(start, len)) in runs.iter().enumerate() {
            let end = offset + len * BLOCK_SIZE;
            if let Err(e) = disk.write_exact_blocks(&bytes[offset..end], u64::from(start)) {
                error!("directory persist failed at block {}: {}", start, e);
                undo_runs(disk, &runs[..i], &previous);
                return Err(e.into());
            }
            offset = end;
        }
        Ok(())
    }

    /// 目录自身的存储位置（"." 的块列表）
    pub fn location(&self) -> &[u32] {
        self.entries[0].blocks()
    }

    /// 父目录的存储位置（".." 的块列表）
    pub fn parent_location(&self) -> &[u32] {
        self.entries[1].blocks()
    }

    pub fn set_parent_location(&mut self, blocks: &[u32]) -> Result<()> {
        self.entries[1].set_blocks(blocks)
    }

    pub fn is_root(&self) -> bool {
        self.location() == self.parent_location()
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> &DirEntry {
        &self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut DirEntry {
        &mut self.entries[index]
    }

    /// 精确匹配（区分大小写），跳过空槽位，返回第一个匹配的下标
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| !e.is_empty() && e.name_bytes() == name.as_bytes())
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(DirEntry::is_empty)
    }

    /// 除了 "." 和 ".." 之外是否还有别的目录项
    pub fn has_children(&self) -> bool {
        self.entries[2..].iter().any(|e| !e.is_empty())
    }
}

fn undo_runs(disk: &impl BlockDevice, written: &[(u32, usize)], previous: &[u8]) {
    let mut offset = 0;
    for &(start, len) in written {
        let end = offset + len * BLOCK_SIZE;
        if let Err(e) = disk.write_exact_blocks(&previous[offset..end], u64::from(start)) {
            warn!("could not restore directory block {}: {}", start, e);
        }
        offset = end;
    }
}
