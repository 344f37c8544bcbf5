pub mod disk;
pub mod fs;
pub mod utils;

pub use disk::{BlockDevice, FileDisk, RamDisk, BLOCK_SIZE};
pub use fs::{
    config::FormatOptions,
    error::{FileSystemError, Result},
    file_io::{FileDescriptor, OpenFlags},
    namespace::{DirItem, DirStream, FileStat},
    FileSystem,
};
