use std::borrow::Cow;

use crate::{
    disk::BlockDevice,
    fs::{
        config::MAX_PATH_LEN,
        directory::Directory,
        entry::DirEntry,
        error::{FileSystemError, Result},
        FileSystem,
    },
};

/// 最后一个路径分量在父目录中的查找结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(usize), // 父目录中的下标
    Missing,      // 父目录存在，但没有这个名字
    Itself,       // 路径只有 "/"，指的是起点目录本身
}

/// 路径解析结果。
///
/// `parent` 是最后一个分量所在的目录：借用的是常驻的根目录或当前目录，
/// 拥有的是为这次解析单独加载的副本，离开作用域时自动释放。
#[derive(Debug)]
pub struct ParsedPath<'a> {
    pub parent: Cow<'a, Directory>,
    pub lookup: Lookup,
    pub name: String,
}

impl ParsedPath<'_> {
    pub fn found(&self) -> Option<usize> {
        match self.lookup {
            Lookup::Found(index) => Some(index),
            _ => None,
        }
    }

    pub fn entry(&self) -> Option<&DirEntry> {
        self.found().map(|index| self.parent.entry(index))
    }

    /// 父目录是否就是常驻的根目录或当前目录
    pub fn is_resident(&self) -> bool {
        matches!(self.parent, Cow::Borrowed(_))
    }
}

/// 按 '/' 切分路径，去掉空分量；返回是否为绝对路径和各个分量
pub fn split_path(path: &str) -> (bool, Vec<&str>) {
    let absolute = path.starts_with('/');
    let parts = path.split('/').filter(|p| !p.is_empty()).collect();
    (absolute, parts)
}

/// 把名字接到目录路径后面
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 路径最后一个分量，"/" 和 "a/" 这种以分隔符结尾的路径返回空串
pub fn last_component(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl<D: BlockDevice> FileSystem<D> {
    /// 解析路径：绝对路径从根目录开始，相对路径从当前目录开始。
    /// 中间分量必须都是已存在的目录；最后一个分量只在父目录里查找，不要求存在。
    pub fn parse_path(&self, path: &str) -> Result<ParsedPath<'_>> {
        if path.len() > MAX_PATH_LEN {
            return Err(FileSystemError::InvalidPath(format!(
                "path longer than {} bytes",
                MAX_PATH_LEN
            )));
        }

        let (absolute, parts) = split_path(path);
        let mut parent = Cow::Borrowed(if absolute { self.root() } else { self.cwd_dir() });

        let Some((&last, walk)) = parts.split_last() else {
            if absolute {
                return Ok(ParsedPath {
                    parent,
                    lookup: Lookup::Itself,
                    name: String::new(),
                });
            }
            return Err(FileSystemError::InvalidPath(path.to_string()));
        };

        for &part in walk {
            let index = parent
                .find(part)
                .ok_or_else(|| FileSystemError::NotFound(path.to_string()))?;
            let entry = parent.entry(index);
            if !entry.is_directory {
                return Err(FileSystemError::NotADirectory(path.to_string()));
            }
            let next = self.open_child(entry)?;
            parent = next;
        }

        let lookup = parent.find(last).map_or(Lookup::Missing, Lookup::Found);
        Ok(ParsedPath {
            parent,
            lookup,
            name: last.to_string(),
        })
    }
}
