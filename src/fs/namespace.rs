use std::borrow::Cow;

use log::{debug, info, warn};

use crate::{
    disk::{BlockDevice, BLOCK_SIZE},
    fs::{
        config::{DIRECTORY_BYTES, MAX_PATH_LEN},
        directory::{Directory, DOT, DOTDOT},
        entry::{validate_name, DirEntry, EntryKind},
        error::{FileSystemError, Result},
        path::{join_path, last_component, Lookup},
        CurrentDir, FileSystem,
    },
    utils::current_timestamp,
};

/// stat 返回的文件信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub block_size: u64,
    pub blocks: u64, // 已分配的块数
    pub kind: EntryKind,
    pub mode: u32,
    pub created: i64,
    pub modified: i64,
    pub accessed: i64, // 不单独记录访问时间，与修改时间相同
}

/// 目录流返回的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirItem {
    pub name: String,
    pub record_len: u64,
    pub kind: EntryKind,
}

/// 目录流：按下标顺序遍历目录数组，跳过空槽位
#[derive(Debug)]
pub struct DirStream<'a> {
    dir: Cow<'a, Directory>,
    position: usize,
}

impl<'a> DirStream<'a> {
    fn new(dir: Cow<'a, Directory>) -> Self {
        Self { dir, position: 0 }
    }

    pub fn next_entry(&mut self) -> Option<DirItem> {
        let entries = self.dir.entries();
        while self.position < entries.len() {
            let entry = &entries[self.position];
            self.position += 1;
            if !entry.is_empty() {
                return Some(DirItem {
                    name: entry.name(),
                    record_len: entry.size,
                    kind: entry.kind(),
                });
            }
        }
        None
    }

    /// 流遍历的是不是常驻目录
    pub fn is_resident(&self) -> bool {
        matches!(self.dir, Cow::Borrowed(_))
    }

    /// 关闭目录流。常驻目录不会被释放，单独加载的副本随流一起丢弃
    pub fn close(self) {
        if !self.is_resident() {
            debug!("released private copy of directory at {:?}", self.dir.location().first());
        }
    }
}

impl Iterator for DirStream<'_> {
    type Item = DirItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// 新建目录，父目录必须存在且还有空槽位
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        let parsed = self.parse_path(path)?;
        if parsed.lookup != Lookup::Missing {
            return Err(FileSystemError::AlreadyExists(path.to_string()));
        }
        validate_name(&parsed.name)?;
        let name = parsed.name;
        let mut parent = parsed.parent.into_owned();
        let slot = parent
            .first_free_slot()
            .ok_or_else(|| FileSystemError::DirectoryFull(path.to_string()))?;

        let now = current_timestamp();
        let child = Directory::create(&self.disk, &mut self.bitmap, Some(&parent), mode, now)?;
        let mut entry = DirEntry::new(&name, EntryKind::Directory, mode, child.location(), now)?;
        entry.size = DIRECTORY_BYTES as u64;
        *parent.entry_mut(slot) = entry;

        if let Err(e) = self.commit_dir(&parent) {
            if let Err(free_err) = self.bitmap.free(&self.disk, child.location()) {
                warn!("could not release blocks of '{}': {}", path, free_err);
            }
            return Err(e);
        }
        info!("mkdir {}", path);
        Ok(())
    }

    /// 删除空目录。根目录和当前工作目录不能删
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let parsed = self.parse_path(path)?;
        let index = match parsed.lookup {
            Lookup::Found(index) => index,
            Lookup::Missing => return Err(FileSystemError::NotFound(path.to_string())),
            Lookup::Itself => return Err(FileSystemError::Busy(path.to_string())),
        };
        if parsed.name == DOT || parsed.name == DOTDOT {
            return Err(FileSystemError::InvalidPath(path.to_string()));
        }

        let entry = parsed.parent.entry(index).clone();
        if !entry.is_directory {
            return Err(FileSystemError::NotADirectory(path.to_string()));
        }
        if entry.blocks() == self.cwd_dir().location() || entry.blocks() == self.root().location() {
            return Err(FileSystemError::Busy(path.to_string()));
        }
        let child = Directory::load(&self.disk, &entry)?;
        if child.has_children() {
            return Err(FileSystemError::DirectoryNotEmpty(path.to_string()));
        }

        // 先让父目录不再指向它，再释放块；写父目录失败时不会留下指向空闲块的目录项
        let mut parent = parsed.parent.into_owned();
        parent.entry_mut(index).clear();
        self.commit_dir(&parent)?;
        self.bitmap.free(&self.disk, entry.blocks())?;
        info!("rmdir {}", path);
        Ok(())
    }

    /// 删除普通文件
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let parsed = self.parse_path(path)?;
        let index = match parsed.lookup {
            Lookup::Found(index) => index,
            Lookup::Missing => return Err(FileSystemError::NotFound(path.to_string())),
            Lookup::Itself => return Err(FileSystemError::IsADirectory(path.to_string())),
        };
        let entry = parsed.parent.entry(index).clone();
        if entry.is_directory {
            return Err(FileSystemError::IsADirectory(path.to_string()));
        }
        if self.is_open(&entry) {
            return Err(FileSystemError::Busy(path.to_string()));
        }

        let mut parent = parsed.parent.into_owned();
        parent.entry_mut(index).clear();
        self.commit_dir(&parent)?;
        self.bitmap.free(&self.disk, entry.blocks())?;
        info!("delete {}", path);
        Ok(())
    }

    /// 移动文件或目录。
    ///
    /// `dst` 的最后一个分量和源名字相同时按原样使用，否则把源名字接到 `dst` 后面，
    /// 也就是把 `dst` 当作目标目录。先写目标父目录，再写源父目录。
    pub fn mv(&mut self, src: &str, dst: &str) -> Result<()> {
        if dst.is_empty() {
            return Err(FileSystemError::InvalidPath(dst.to_string()));
        }

        let src_parsed = self.parse_path(src)?;
        let src_index = match src_parsed.lookup {
            Lookup::Found(index) => index,
            Lookup::Missing => return Err(FileSystemError::NotFound(src.to_string())),
            Lookup::Itself => return Err(FileSystemError::Busy(src.to_string())),
        };
        if src_parsed.name == DOT || src_parsed.name == DOTDOT {
            return Err(FileSystemError::InvalidPath(src.to_string()));
        }
        let entry = src_parsed.parent.entry(src_index).clone();
        let mut src_parent = src_parsed.parent.into_owned();
        let name = entry.name();

        let dst_path = if last_component(dst) == name {
            dst.to_string()
        } else {
            join_path(dst, &name)
        };
        if dst_path.len() > MAX_PATH_LEN {
            return Err(FileSystemError::InvalidPath(dst_path));
        }
        let dst_parsed = self.parse_path(&dst_path)?;
        if dst_parsed.lookup != Lookup::Missing {
            return Err(FileSystemError::AlreadyExists(dst_path));
        }
        let mut dst_parent = dst_parsed.parent.into_owned();

        if entry.is_directory {
            // 不能把当前目录或它的祖先移走，也不能把目录移进它自己的子树
            if self.is_ancestor_or_self(entry.blocks(), self.cwd_dir())? {
                return Err(FileSystemError::Busy(src.to_string()));
            }
            if self.is_ancestor_or_self(entry.blocks(), &dst_parent)? {
                return Err(FileSystemError::InvalidPath(format!(
                    "cannot move '{}' into itself",
                    src
                )));
            }
        } else if self.is_open(&entry) {
            return Err(FileSystemError::Busy(src.to_string()));
        }

        let slot = dst_parent
            .first_free_slot()
            .ok_or_else(|| FileSystemError::DirectoryFull(dst_path.clone()))?;
        let mut moved = entry.clone();
        moved.modified = current_timestamp();
        *dst_parent.entry_mut(slot) = moved;
        src_parent.entry_mut(src_index).clear();

        self.commit_dir(&dst_parent)?;
        if let Err(e) = self.commit_dir(&src_parent) {
            warn!("'{}' now also exists at '{}': source not updated", src, dst_path);
            return Err(e);
        }

        if entry.is_directory {
            let mut child = Directory::load(&self.disk, &entry)?;
            child.set_parent_location(dst_parent.location())?;
            self.commit_dir(&child)?;
        }
        info!("mv {} -> {}", src, dst_path);
        Ok(())
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.parse_path(path)
            .ok()
            .and_then(|p| p.entry().map(|e| !e.is_directory))
            .unwrap_or(false)
    }

    pub fn is_dir(&self, path: &str) -> bool {
        match self.parse_path(path) {
            Ok(p) if p.lookup == Lookup::Itself => true,
            Ok(p) => p.entry().map_or(false, |e| e.is_directory),
            Err(_) => false,
        }
    }

    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let parsed = self.parse_path(path)?;
        let entry = match parsed.lookup {
            Lookup::Found(index) => parsed.parent.entry(index),
            // "/" 用根目录自己的 "." 项
            Lookup::Itself => parsed.parent.entry(0),
            Lookup::Missing => return Err(FileSystemError::NotFound(path.to_string())),
        };
        Ok(FileStat {
            size: entry.size,
            block_size: BLOCK_SIZE as u64,
            blocks: entry.blocks_count() as u64,
            kind: entry.kind(),
            mode: entry.mode,
            created: entry.created,
            modified: entry.modified,
            accessed: entry.modified,
        })
    }

    /// 打开目录流：根目录和当前目录直接遍历常驻副本，其他目录加载一份私有副本
    pub fn opendir(&self, path: &str) -> Result<DirStream<'_>> {
        let parsed = self.parse_path(path)?;
        let dir = match parsed.lookup {
            Lookup::Itself => parsed.parent,
            Lookup::Found(index) => {
                let entry = parsed.parent.entry(index);
                if !entry.is_directory {
                    return Err(FileSystemError::NotADirectory(path.to_string()));
                }
                self.open_child(entry)?
            }
            Lookup::Missing => return Err(FileSystemError::NotFound(path.to_string())),
        };
        Ok(DirStream::new(dir))
    }

    pub fn closedir(&self, stream: DirStream<'_>) {
        stream.close();
    }

    /// 一次性列出目录内容
    pub fn list_dir(&self, path: &str) -> Result<Vec<DirItem>> {
        Ok(self.opendir(path)?.collect())
    }

    pub fn getcwd(&self) -> &str {
        &self.cwd_path
    }

    /// 切换当前工作目录。多个分量逐个切换，中途失败时恢复原来的工作目录
    pub fn setcwd(&mut self, path: &str) -> Result<()> {
        if path.is_empty() || path.len() > MAX_PATH_LEN {
            return Err(FileSystemError::InvalidPath(path.to_string()));
        }
        let saved = (self.cwd.clone(), self.cwd_path.clone());
        let result = self.change_dir(path);
        if result.is_err() {
            (self.cwd, self.cwd_path) = saved;
        }
        result
    }

    fn change_dir(&mut self, path: &str) -> Result<()> {
        if let Some(rest) = path.strip_prefix('/') {
            self.cwd = CurrentDir::Root;
            self.cwd_path = "/".to_string();
            let rest = rest.trim_matches('/');
            if rest.is_empty() {
                return Ok(());
            }
            return self.change_dir(rest);
        }

        if path.contains('/') {
            for part in path.split('/').filter(|p| !p.is_empty()) {
                self.change_dir(part)?;
            }
            return Ok(());
        }

        match path {
            DOT => Ok(()),
            DOTDOT => {
                match self.cwd_path.rfind('/') {
                    Some(0) | None => {
                        self.cwd = CurrentDir::Root;
                        self.cwd_path = "/".to_string();
                        return Ok(());
                    }
                    Some(pos) => self.cwd_path.truncate(pos),
                }
                let target = self.cwd_path.clone();
                self.enter(&target)
            }
            name => {
                self.enter(name)?;
                self.cwd_path = join_path(&self.cwd_path, name);
                Ok(())
            }
        }
    }

    /// 把 `path` 指向的目录加载为当前目录，不修改缓存的路径字符串
    fn enter(&mut self, path: &str) -> Result<()> {
        let dir = {
            let parsed = self.parse_path(path)?;
            match parsed.lookup {
                Lookup::Itself => None,
                Lookup::Found(index) => {
                    let entry = parsed.parent.entry(index);
                    if !entry.is_directory {
                        return Err(FileSystemError::NotADirectory(path.to_string()));
                    }
                    Some(Directory::load(&self.disk, entry)?)
                }
                Lookup::Missing => return Err(FileSystemError::NotFound(path.to_string())),
            }
        };
        self.cwd = match dir {
            Some(dir) if dir.location() != self.root().location() => CurrentDir::Loaded(dir),
            _ => CurrentDir::Root,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        disk::RamDisk,
        fs::config::{FormatOptions, DEFAULT_DIR_MODE},
    };

    fn fresh() -> FileSystem<RamDisk> {
        FileSystem::format(RamDisk::new(1024), &FormatOptions::default()).unwrap()
    }

    #[test]
    fn mkdir_uses_64_blocks_and_rmdir_returns_them() {
        let mut fs = fresh();
        let before = fs.free_blocks();
        fs.mkdir("/docs", DEFAULT_DIR_MODE).unwrap();
        assert_eq!(fs.free_blocks(), before - 64);
        assert!(fs.is_dir("/docs"));

        fs.rmdir("/docs").unwrap();
        assert_eq!(fs.free_blocks(), before);
        assert!(!fs.is_dir("/docs"));
    }

    #[test]
    fn mkdir_rejects_duplicates() {
        let mut fs = fresh();
        fs.mkdir("/docs", DEFAULT_DIR_MODE).unwrap();
        assert!(matches!(
            fs.mkdir("/docs", DEFAULT_DIR_MODE),
            Err(FileSystemError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.mkdir("/", DEFAULT_DIR_MODE),
            Err(FileSystemError::AlreadyExists(_))
        ));
    }

    #[test]
    fn listing_skips_empty_slots() {
        let mut fs = fresh();
        fs.mkdir("/a", DEFAULT_DIR_MODE).unwrap();
        fs.mkdir("/b", DEFAULT_DIR_MODE).unwrap();
        fs.rmdir("/a").unwrap();

        let names: Vec<String> = fs.list_dir("/").unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec![".", "..", "b"]);

        let stream = fs.opendir("/b").unwrap();
        assert!(!stream.is_resident());
        fs.closedir(stream);
        assert!(fs.opendir("/").unwrap().is_resident());
    }

    #[test]
    fn setcwd_walks_and_restores_on_failure() {
        let mut fs = fresh();
        fs.mkdir("/a", DEFAULT_DIR_MODE).unwrap();
        fs.mkdir("/a/b", DEFAULT_DIR_MODE).unwrap();

        fs.setcwd("a/b").unwrap();
        assert_eq!(fs.getcwd(), "/a/b");
        fs.setcwd("..").unwrap();
        assert_eq!(fs.getcwd(), "/a");
        fs.setcwd(".").unwrap();
        assert_eq!(fs.getcwd(), "/a");

        assert!(fs.setcwd("b/missing").is_err());
        assert_eq!(fs.getcwd(), "/a");

        fs.setcwd("..").unwrap();
        assert_eq!(fs.getcwd(), "/");
        assert!(fs.cwd_dir().is_root());
    }

    #[test]
    fn rmdir_refuses_cwd_and_non_empty() {
        let mut fs = fresh();
        fs.mkdir("/a", DEFAULT_DIR_MODE).unwrap();
        fs.mkdir("/a/b", DEFAULT_DIR_MODE).unwrap();
        assert!(matches!(
            fs.rmdir("/a"),
            Err(FileSystemError::DirectoryNotEmpty(_))
        ));

        fs.setcwd("/a/b").unwrap();
        assert!(matches!(fs.rmdir("/a/b"), Err(FileSystemError::Busy(_))));
        assert!(matches!(fs.rmdir("/"), Err(FileSystemError::Busy(_))));
    }

    #[test]
    fn stat_of_root() {
        let fs = fresh();
        let st = fs.stat("/").unwrap();
        assert_eq!(st.kind, EntryKind::Directory);
        assert_eq!(st.size, DIRECTORY_BYTES as u64);
        assert_eq!(st.blocks, 64);
        assert_eq!(st.accessed, st.modified);
    }
}
