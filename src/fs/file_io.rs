use std::io::SeekFrom;

use bitflags::bitflags;
use log::{debug, warn};

use crate::{
    disk::{blocks_for, Block, BlockDevice, BLOCK_SIZE},
    fs::{
        config::{DEFAULT_FILE_MODE, MAX_FILE_SIZE},
        entry::{validate_name, DirEntry, EntryKind},
        error::{FileSystemError, Result},
        path::{Lookup, ParsedPath},
        FileSystem,
    },
    utils::current_timestamp,
};

bitflags! {
    /// 打开方式，取值与 POSIX 的 O_* 保持一致
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1 << 0;
        const RDWR = 1 << 1;
        const CREATE = 1 << 9;
        const TRUNC = 1 << 10;
        const APPEND = 1 << 11;
    }
}

impl OpenFlags {
    /// 返回 (可读, 可写)
    pub fn read_write(&self) -> (bool, bool) {
        if self.contains(Self::WRONLY) {
            (false, true)
        } else if self.contains(Self::RDWR) {
            (true, true)
        } else {
            (true, false)
        }
    }
}

/// 打开文件表中的下标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileDescriptor(pub usize);

/// 一个打开的文件：单块缓冲区加上当前位置
#[derive(Debug)]
pub struct OpenFile {
    buf: Box<Block>,
    index: usize,         // 缓冲区内的读写位置
    buflen: usize,        // 缓冲区内的有效字节数
    loaded: bool,         // 缓冲区内容是否对应 current_block
    dirty: bool,          // 缓冲区有没写盘的数据
    entry: DirEntry,      // 目录项的工作副本，大小和块列表以它为准
    parent: Vec<u32>,     // 所在目录的存储位置
    slot: usize,          // 在所在目录中的下标
    current_block: usize, // 缓冲区对应文件的第几个块
    flags: OpenFlags,
}

impl OpenFile {
    fn new(entry: DirEntry, parent: Vec<u32>, slot: usize, flags: OpenFlags) -> Self {
        Self {
            buf: Box::new([0; BLOCK_SIZE]),
            index: 0,
            buflen: 0,
            loaded: false,
            dirty: false,
            entry,
            parent,
            slot,
            current_block: 0,
            flags,
        }
    }

    pub fn position(&self) -> usize {
        self.current_block * BLOCK_SIZE + self.index
    }

    pub fn size(&self) -> u64 {
        self.entry.size
    }

    fn readable(&self) -> bool {
        self.flags.read_write().0
    }

    fn writable(&self) -> bool {
        self.flags.read_write().1
    }

    fn block_id(&self) -> Result<u64> {
        self.entry
            .blocks()
            .get(self.current_block)
            .map(|&b| u64::from(b))
            .ok_or_else(|| {
                FileSystemError::Corrupted(format!(
                    "'{}' has no block {}",
                    self.entry.name(),
                    self.current_block
                ))
            })
    }

    /// 缓冲区还没对应当前块时装入：块内有文件数据就读盘，否则清零
    fn ensure_loaded(&mut self, disk: &impl BlockDevice) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let offset = self.current_block * BLOCK_SIZE;
        let size = self.entry.size as usize;
        if offset < size && self.current_block < self.entry.blocks_count() {
            let block = self.block_id()?;
            disk.read_exact_blocks(&mut self.buf[..], block)?;
            self.buflen = BLOCK_SIZE.min(size - offset);
        } else {
            self.buf.fill(0);
            self.buflen = 0;
        }
        self.loaded = true;
        self.dirty = false;
        Ok(())
    }

    fn flush(&mut self, disk: &impl BlockDevice) -> Result<()> {
        if self.dirty {
            disk.write_exact_blocks(&self.buf[..], self.block_id()?)?;
            self.dirty = false;
        }
        Ok(())
    }

    // 移到下一个块的开头，缓冲区作废
    fn advance(&mut self) {
        self.current_block += 1;
        self.index = 0;
        self.buflen = 0;
        self.loaded = false;
    }

    fn reposition(&mut self, pos: usize) {
        self.current_block = pos / BLOCK_SIZE;
        self.index = pos % BLOCK_SIZE;
        self.buflen = 0;
        self.loaded = false;
    }

    /// 三段式写：先补满当前缓冲区，再整块直写，最后的零头留在缓冲区。
    /// 块已经提前分配好；写盘失败就停下，返回已经接收的字节数。
    fn write_through(&mut self, disk: &impl BlockDevice, data: &[u8]) -> usize {
        let mut written = 0;

        if self.index > 0 {
            if let Err(e) = self.ensure_loaded(disk) {
                warn!("loading block {} failed: {}", self.current_block, e);
                return written;
            }
            let n = (BLOCK_SIZE - self.index).min(data.len());
            self.buf[self.index..self.index + n].copy_from_slice(&data[..n]);
            self.index += n;
            self.buflen = self.buflen.max(self.index);
            self.dirty = true;
            written += n;

            if self.index == BLOCK_SIZE {
                if let Err(e) = self.flush(disk) {
                    warn!("flushing block {} failed: {}", self.current_block, e);
                    return written;
                }
                self.advance();
            }
        }

        while data.len() - written >= BLOCK_SIZE {
            let block = match self.block_id() {
                Ok(block) => block,
                Err(e) => {
                    warn!("{}", e);
                    return written;
                }
            };
            if let Err(e) = disk.write_exact_blocks(&data[written..written + BLOCK_SIZE], block) {
                warn!("writing block {} failed: {}", block, e);
                return written;
            }
            written += BLOCK_SIZE;
            self.advance();
        }

        let rest = data.len() - written;
        if rest > 0 {
            if let Err(e) = self.ensure_loaded(disk) {
                warn!("loading block {} failed: {}", self.current_block, e);
                return written;
            }
            self.buf[..rest].copy_from_slice(&data[written..]);
            self.index = rest;
            self.buflen = self.buflen.max(rest);
            self.dirty = true;
            written += rest;
        }
        written
    }

    /// 三段式读：先取缓冲区里剩下的，再整块直读，最后装入一块取前缀
    fn read_into(&mut self, disk: &impl BlockDevice, out: &mut [u8]) -> Result<usize> {
        let available = (self.entry.size as usize).saturating_sub(self.position());
        let mut remaining = out.len().min(available);
        let mut done = 0;

        if remaining > 0 && (self.loaded || self.index > 0) {
            self.ensure_loaded(disk)?;
            let n = self.buflen.saturating_sub(self.index).min(remaining);
            out[..n].copy_from_slice(&self.buf[self.index..self.index + n]);
            self.index += n;
            done += n;
            remaining -= n;
            if self.index == BLOCK_SIZE {
                self.flush(disk)?;
                self.advance();
            } else if remaining > 0 {
                // 缓冲区有效数据不到块尾却还没读完，不应该发生
                warn!("buffer of '{}' ends early at {}", self.entry.name(), self.position());
                return Ok(done);
            }
        }

        while remaining >= BLOCK_SIZE {
            let block = self.block_id()?;
            disk.read_exact_blocks(&mut out[done..done + BLOCK_SIZE], block)?;
            done += BLOCK_SIZE;
            remaining -= BLOCK_SIZE;
            self.advance();
        }

        if remaining > 0 {
            self.ensure_loaded(disk)?;
            out[done..done + remaining].copy_from_slice(&self.buf[..remaining]);
            self.index = remaining;
            done += remaining;
        }
        Ok(done)
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// 打开文件，返回打开文件表中的下标
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<FileDescriptor> {
        let fd = self
            .handles
            .iter()
            .position(Option::is_none)
            .ok_or(FileSystemError::NoFreeHandle)?;

        let mut file = {
            let ParsedPath { parent, lookup, name } = self.parse_path(path)?;
            match lookup {
                Lookup::Itself => return Err(FileSystemError::IsADirectory(path.to_string())),
                Lookup::Missing => {
                    if !flags.contains(OpenFlags::CREATE) {
                        return Err(FileSystemError::NotFound(path.to_string()));
                    }
                    validate_name(&name)?;
                    let mut parent = parent.into_owned();
                    let slot = parent
                        .first_free_slot()
                        .ok_or_else(|| FileSystemError::DirectoryFull(path.to_string()))?;

                    // 新文件先占一个块，大小为 0
                    let blocks = self.bitmap.allocate(&self.disk, 1)?;
                    let entry = DirEntry::new(&name, EntryKind::File, DEFAULT_FILE_MODE, &blocks, current_timestamp())?;
                    *parent.entry_mut(slot) = entry.clone();
                    if let Err(e) = self.commit_dir(&parent) {
                        if let Err(free_err) = self.bitmap.free(&self.disk, &blocks) {
                            warn!("could not release block of '{}': {}", path, free_err);
                        }
                        return Err(e);
                    }
                    debug!("created {}", path);
                    OpenFile::new(entry, parent.location().to_vec(), slot, flags)
                }
                Lookup::Found(slot) => {
                    let entry = parent.entry(slot).clone();
                    if entry.is_directory {
                        return Err(FileSystemError::IsADirectory(path.to_string()));
                    }
                    OpenFile::new(entry, parent.location().to_vec(), slot, flags)
                }
            }
        };

        // 同一时刻一个文件只允许一个可写句柄，截断时不能有别的句柄
        if file.writable() && self.is_open_for_writing(&file.entry) {
            return Err(FileSystemError::Busy(path.to_string()));
        }
        if flags.contains(OpenFlags::TRUNC) && file.entry.size > 0 {
            if self.is_open(&file.entry) {
                return Err(FileSystemError::Busy(path.to_string()));
            }
            file.entry.size = 0;
            file.entry.modified = current_timestamp();
            let dropped = file.entry.truncate_blocks(1);
            self.store_entry(&file)?;
            if !dropped.is_empty() {
                self.bitmap.free(&self.disk, &dropped)?;
            }
        }

        if file.readable() && file.entry.size > 0 {
            file.ensure_loaded(&self.disk)?;
        }
        if flags.contains(OpenFlags::APPEND) {
            file.reposition(file.entry.size as usize);
        }

        self.handles[fd] = Some(file);
        debug!("open {} as fd {}", path, fd);
        Ok(FileDescriptor(fd))
    }

    /// 写入数据，返回实际写入的字节数
    pub fn write(&mut self, fd: FileDescriptor, data: &[u8]) -> Result<usize> {
        let mut file = self.take_handle(fd)?;
        let result = self.write_file(&mut file, data);
        self.handles[fd.0] = Some(file);
        result
    }

    fn write_file(&mut self, file: &mut OpenFile, data: &[u8]) -> Result<usize> {
        if !file.writable() {
            return Err(FileSystemError::NotPermitted("file is not open for writing"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let pos = file.position();
        let mut count = data.len().min((MAX_FILE_SIZE as usize).saturating_sub(pos));
        if count == 0 {
            return Err(FileSystemError::FileTooLarge);
        }

        // 数据传输前先把需要的块分配好
        let have = file.entry.blocks_count();
        let needed = blocks_for(pos + count);
        let mut grew = false;
        if needed > have {
            match self.bitmap.allocate(&self.disk, needed - have) {
                Ok(blocks) => {
                    file.entry.push_blocks(&blocks)?;
                    grew = true;
                }
                Err(FileSystemError::DiskFull) => {
                    // 空间不够就只写到已有块的末尾
                    count = (have * BLOCK_SIZE).saturating_sub(pos).min(count);
                    if count == 0 {
                        return Err(FileSystemError::DiskFull);
                    }
                    warn!("disk full, write shortened to {} bytes", count);
                }
                Err(e) => return Err(e),
            }
        }

        let written = file.write_through(&self.disk, &data[..count]);

        let end = file.position() as u64;
        if end > file.entry.size || grew {
            file.entry.size = file.entry.size.max(end);
            file.entry.modified = current_timestamp();
            self.store_entry(file)?;
        }
        Ok(written)
    }

    /// 读数据，文件末尾返回 0
    pub fn read(&mut self, fd: FileDescriptor, out: &mut [u8]) -> Result<usize> {
        let mut file = self.take_handle(fd)?;
        let result = if file.readable() {
            file.read_into(&self.disk, out)
        } else {
            Err(FileSystemError::NotPermitted("file is not open for reading"))
        };
        self.handles[fd.0] = Some(file);
        result
    }

    /// 随机定位，不能越过文件末尾，返回新的位置
    pub fn seek(&mut self, fd: FileDescriptor, pos: SeekFrom) -> Result<u64> {
        let mut file = self.take_handle(fd)?;
        let result = seek_file(&self.disk, &mut file, pos);
        self.handles[fd.0] = Some(file);
        result
    }

    pub fn tell(&self, fd: FileDescriptor) -> Result<u64> {
        self.handle(fd).map(|f| f.position() as u64)
    }

    /// 关闭文件，缓冲区里没写盘的数据先写回
    pub fn close(&mut self, fd: FileDescriptor) -> Result<()> {
        self.close_slot(fd.0)
    }

    pub(crate) fn close_slot(&mut self, fd: usize) -> Result<()> {
        let Some(mut file) = self.handles.get_mut(fd).and_then(Option::take) else {
            return Err(FileSystemError::BadHandle(fd));
        };
        if file.dirty && file.writable() {
            file.flush(&self.disk)?;
        }
        debug!("closed fd {}", fd);
        Ok(())
    }

    /// 写回所有打开文件的缓冲区，不关闭
    pub fn sync(&mut self) -> Result<()> {
        for slot in self.handles.iter_mut().flatten() {
            slot.flush(&self.disk)?;
        }
        Ok(())
    }

    pub fn open_files(&self) -> usize {
        self.handles.iter().flatten().count()
    }

    fn handle(&self, fd: FileDescriptor) -> Result<&OpenFile> {
        self.handles
            .get(fd.0)
            .and_then(Option::as_ref)
            .ok_or(FileSystemError::BadHandle(fd.0))
    }

    fn take_handle(&mut self, fd: FileDescriptor) -> Result<OpenFile> {
        self.handles
            .get_mut(fd.0)
            .and_then(Option::take)
            .ok_or(FileSystemError::BadHandle(fd.0))
    }

    /// 同一个文件（按第一个块判断）有没有被打开
    pub(crate) fn is_open(&self, entry: &DirEntry) -> bool {
        self.handles
            .iter()
            .flatten()
            .any(|f| f.entry.first_block() == entry.first_block())
    }

    fn is_open_for_writing(&self, entry: &DirEntry) -> bool {
        self.handles
            .iter()
            .flatten()
            .any(|f| f.writable() && f.entry.first_block() == entry.first_block())
    }

    /// 把打开文件的目录项写回所在目录
    fn store_entry(&mut self, file: &OpenFile) -> Result<()> {
        let mut parent = self.dir_at(&file.parent)?;
        let current = parent.entry(file.slot);
        if current.is_empty() || current.first_block() != file.entry.first_block() {
            return Err(FileSystemError::NotFound(file.entry.name()));
        }
        *parent.entry_mut(file.slot) = file.entry.clone();
        self.commit_dir(&parent)
    }
}

fn seek_file(disk: &impl BlockDevice, file: &mut OpenFile, pos: SeekFrom) -> Result<u64> {
    let size = file.entry.size as i64;
    let target = match pos {
        SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
        SeekFrom::Current(delta) => (file.position() as i64).saturating_add(delta),
        SeekFrom::End(delta) => size.saturating_add(delta),
    };
    if target < 0 || target > size {
        return Err(FileSystemError::InvalidArgument(format!(
            "seek to {} outside 0..={}",
            target, size
        )));
    }
    file.flush(disk)?;
    file.reposition(target as usize);
    Ok(target as u64)
}
