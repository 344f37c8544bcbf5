use std::fmt;

/// 文件系统错误类型
#[derive(Debug)]
pub enum FileSystemError {
    Io(std::io::Error),             // 底层 I/O 错误（包括少读/少写）
    DiskFull,                       // 没有足够的空闲块
    NoFreeHandle,                   // 打开文件表已满
    DirectoryFull(String),          // 目录没有空槽位
    FileTooLarge,                   // 超出目录项能记录的块数
    NotFound(String),               // 文件或目录不存在，带路径
    AlreadyExists(String),          // 文件或目录已存在，带路径
    NotADirectory(String),          // 期望目录，实际不是
    IsADirectory(String),           // 期望文件，实际是目录
    DirectoryNotEmpty(String),      // 目录非空
    Busy(String),                   // 当前工作目录或仍被打开的文件
    InvalidPath(String),            // 路径非法
    NameTooLong(String),            // 名字超过上限
    ReservedBlock(u32),             // 试图释放保留区的块
    DoubleFree(u32),                // 试图释放空闲块
    BadHandle(usize),               // 文件描述符无效或未打开
    NotPermitted(&'static str),     // 打开方式不允许该操作
    InvalidArgument(String),        // 参数非法
    NotFormatted,                   // 磁盘上没有有效的卷
    ReservedRegionTooSmall { needed: u32, available: u32 },
    Corrupted(String),              // 文件系统损坏
}

impl From<std::io::Error> for FileSystemError {
    fn from(e: std::io::Error) -> Self {
        FileSystemError::Io(e)
    }
}

impl From<bincode::Error> for FileSystemError {
    fn from(e: bincode::Error) -> Self {
        FileSystemError::Corrupted(format!("bad on-disk record: {}", e))
    }
}

// 实现 Display trait，用于打印错误信息
impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Disk I/O error: {}", e),
            Self::DiskFull => write!(f, "Disk space is full"),
            Self::NoFreeHandle => write!(f, "Too many open files"),
            Self::DirectoryFull(path) => write!(f, "Directory has no free entry: {}", path),
            Self::FileTooLarge => write!(f, "File would exceed the maximum file size"),
            Self::NotFound(path) => write!(f, "File or directory not found: {}", path),
            Self::AlreadyExists(path) => write!(f, "File or directory already exists: {}", path),
            Self::NotADirectory(path) => write!(f, "Expected a directory, found a file: {}", path),
            Self::IsADirectory(path) => write!(f, "Expected a file, found a directory: {}", path),
            Self::DirectoryNotEmpty(path) => write!(f, "Directory is not empty: {}", path),
            Self::Busy(path) => write!(f, "Resource is busy: {}", path),
            Self::InvalidPath(path) => write!(f, "Invalid path: {}", path),
            Self::NameTooLong(name) => write!(f, "Name is too long: {}", name),
            Self::ReservedBlock(block) => write!(f, "Block {} is reserved by the file system", block),
            Self::DoubleFree(block) => write!(f, "Block {} is already free", block),
            Self::BadHandle(fd) => write!(f, "Bad file descriptor: {}", fd),
            Self::NotPermitted(what) => write!(f, "Operation not permitted: {}", what),
            Self::InvalidArgument(desc) => write!(f, "Invalid argument: {}", desc),
            Self::NotFormatted => write!(f, "Volume is not formatted"),
            Self::ReservedRegionTooSmall { needed, available } => write!(
                f,
                "Free space map needs {} blocks but only {} are reserved",
                needed, available
            ),
            Self::Corrupted(desc) => write!(f, "File system corrupted: {}", desc),
        }
    }
}

// 支持链式错误，方便追踪底层原因
impl std::error::Error for FileSystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// 文件系统统一结果类型
pub type Result<T> = std::result::Result<T, FileSystemError>;
