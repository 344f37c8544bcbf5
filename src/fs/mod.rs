use std::borrow::Cow;

use log::{info, warn};

use crate::{
    disk::{BlockDevice, BLOCK_SIZE},
    fs::{
        config::{FormatOptions, DEFAULT_DIR_MODE, DIRECTORY_BLOCKS, MAX_OPEN_FILES},
        data_block_bitmap::{BlockState, DataBlockBitmap},
        directory::Directory,
        entry::DirEntry,
        error::{FileSystemError, Result},
        file_io::OpenFile,
        super_block::SuperBlock,
    },
    utils::current_timestamp,
};

pub mod config;
pub mod data_block_bitmap;
pub mod directory;
pub mod entry;
pub mod error;
pub mod file_io;
pub mod namespace;
pub mod path;
pub mod super_block;

// 沿 ".." 向上走的最大层数，超过说明目录链成环了
const MAX_DIRECTORY_DEPTH: usize = 1024;

/// 当前工作目录：要么就是常驻的根目录，要么是单独加载的一份目录数组
#[derive(Debug, Clone)]
pub enum CurrentDir {
    Root,
    Loaded(Directory),
}

/// 已挂载的文件系统。所有操作都通过它进行，
/// 常驻内存的只有卷头、位图、根目录、当前目录和打开文件表。
#[derive(Debug)]
pub struct FileSystem<D: BlockDevice> {
    disk: D,                          // 底层磁盘抽象层
    super_block: SuperBlock,          // 卷头
    bitmap: DataBlockBitmap,          // 空闲块位图
    root: Directory,                  // 常驻的根目录
    cwd: CurrentDir,                  // 当前工作目录
    cwd_path: String,                 // 当前工作目录的绝对路径
    handles: Vec<Option<OpenFile>>,   // 打开文件表，None 表示空闲
}

impl<D: BlockDevice> FileSystem<D> {
    /// 磁盘上有有效卷就挂载，否则格式化
    pub fn open_or_format(disk: D, options: &FormatOptions) -> Result<Self> {
        match SuperBlock::read(&disk)? {
            Some(_) => Self::mount(disk),
            None => {
                info!("no volume signature found, formatting");
                Self::format(disk, options)
            }
        }
    }

    /// 挂载已有的卷：读卷头、读位图、读根目录，任何一步失败都不会留下半挂载的状态
    pub fn mount(disk: D) -> Result<Self> {
        let super_block = SuperBlock::read(&disk)?.ok_or(FileSystemError::NotFormatted)?;
        super_block.validate(&disk)?;

        let bitmap = DataBlockBitmap::load(&disk, super_block.bitmap_start, super_block.total_blocks)?;

        // 根目录是在空卷上分配的，总是从 root_dir_start 开始连续存放
        let start = super_block.root_dir_start;
        let blocks: Vec<u32> = (start..start + DIRECTORY_BLOCKS as u32).collect();
        let root = Directory::load_at(&disk, &blocks)?;
        if !root.is_root() || root.location() != blocks.as_slice() {
            return Err(FileSystemError::Corrupted(format!(
                "no root directory at block {}",
                start
            )));
        }

        info!(
            "mounted '{}' ({} blocks, {} free)",
            super_block.volume_name,
            super_block.total_blocks,
            bitmap.free_blocks()
        );
        Ok(Self::assemble(disk, super_block, bitmap, root))
    }

    /// 无条件格式化：新卷头、新位图、新根目录，最后写卷头
    pub fn format(disk: D, options: &FormatOptions) -> Result<Self> {
        if disk.block_size() != BLOCK_SIZE {
            return Err(FileSystemError::InvalidArgument(format!(
                "device block size {} is not {}",
                disk.block_size(),
                BLOCK_SIZE
            )));
        }

        let total_blocks = disk.block_count();
        let mut super_block = SuperBlock::new(options, total_blocks);
        let mut bitmap = DataBlockBitmap::initialize(&disk, total_blocks)?;
        let root = Directory::create(&disk, &mut bitmap, None, DEFAULT_DIR_MODE, current_timestamp())?;

        super_block.root_dir_start = root.location()[0];
        super_block.write(&disk)?;

        info!(
            "formatted '{}': {} blocks, root at {}",
            super_block.volume_name, total_blocks, super_block.root_dir_start
        );
        Ok(Self::assemble(disk, super_block, bitmap, root))
    }

    fn assemble(disk: D, super_block: SuperBlock, bitmap: DataBlockBitmap, root: Directory) -> Self {
        let mut handles = Vec::with_capacity(MAX_OPEN_FILES);
        handles.resize_with(MAX_OPEN_FILES, || None);
        Self {
            disk,
            super_block,
            bitmap,
            root,
            cwd: CurrentDir::Root,
            cwd_path: "/".to_string(),
            handles,
        }
    }

    /// 卸载：关闭仍然打开的文件（写回缓冲区），然后交还底层设备
    pub fn unmount(mut self) -> D {
        for fd in 0..self.handles.len() {
            if self.handles[fd].is_some() {
                if let Err(e) = self.close_slot(fd) {
                    warn!("closing fd {} during unmount failed: {}", fd, e);
                }
            }
        }
        info!("unmounted '{}'", self.super_block.volume_name);
        self.disk
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn free_blocks(&self) -> u64 {
        self.bitmap.free_blocks()
    }

    pub fn block_state(&self, block: u32) -> Result<BlockState> {
        self.bitmap.availability(block)
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    pub fn root(&self) -> &Directory {
        &self.root
    }

    /// 当前工作目录的目录数组
    pub fn cwd_dir(&self) -> &Directory {
        match &self.cwd {
            CurrentDir::Root => &self.root,
            CurrentDir::Loaded(dir) => dir,
        }
    }

    /// 取得目录项描述的子目录：如果它就是常驻的根目录或当前目录，直接借用，否则从磁盘加载一份
    pub(crate) fn open_child(&self, entry: &DirEntry) -> Result<Cow<'_, Directory>> {
        if !entry.is_directory {
            return Err(FileSystemError::NotADirectory(entry.name()));
        }
        if let Some(dir) = self.resident(entry.blocks()) {
            return Ok(Cow::Borrowed(dir));
        }
        Ok(Cow::Owned(Directory::load(&self.disk, entry)?))
    }

    /// 按存储位置取一份可修改的目录副本
    pub(crate) fn dir_at(&self, location: &[u32]) -> Result<Directory> {
        match self.resident(location) {
            Some(dir) => Ok(dir.clone()),
            None => Directory::load_at(&self.disk, location),
        }
    }

    fn resident(&self, location: &[u32]) -> Option<&Directory> {
        if self.root.location() == location {
            Some(&self.root)
        } else if self.cwd_dir().location() == location {
            Some(self.cwd_dir())
        } else {
            None
        }
    }

    /// 目录写盘；成功后同步常驻的根目录和当前目录副本，失败时常驻副本保持不变
    pub(crate) fn commit_dir(&mut self, dir: &Directory) -> Result<()> {
        dir.persist(&self.disk)?;
        if self.root.location() == dir.location() {
            self.root = dir.clone();
        }
        if let CurrentDir::Loaded(cwd) = &mut self.cwd {
            if cwd.location() == dir.location() {
                *cwd = dir.clone();
            }
        }
        Ok(())
    }

    /// 从 `start` 沿 ".." 向上走到根目录，看途中是否经过位置为 `target` 的目录
    pub(crate) fn is_ancestor_or_self(&self, target: &[u32], start: &Directory) -> Result<bool> {
        let mut current = Cow::Borrowed(start);
        for _ in 0..MAX_DIRECTORY_DEPTH {
            if current.location() == target {
                return Ok(true);
            }
            if current.is_root() {
                return Ok(false);
            }
            let parent = self.dir_at(current.parent_location())?;
            current = Cow::Owned(parent);
        }
        Err(FileSystemError::Corrupted(
            "directory parent chain does not reach the root".to_string(),
        ))
    }
}
