use std::{
    fs::{File, OpenOptions},
    io::{Read, Result, Seek, SeekFrom, Write},
    path::Path,
    sync::{mpsc::Sender, Mutex},
};

use log::debug;

use crate::disk::{
    block_device::{clamp_transfer, BlockDevice},
    init::BootProgress,
    types::BLOCK_SIZE,
};

/// 以普通文件作为虚拟磁盘（disk.img）
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    block_count: u64,
}

impl FileDisk {
    /// 打开（或创建）镜像文件，保证其至少容纳 `block_count` 个块
    pub fn open(path: impl AsRef<Path>, block_count: u64) -> Result<Self> {
        Self::open_inner(path.as_ref(), block_count, None)
    }

    /// 同 `open`，但会把分配磁盘空间的进度汇报给启动界面
    pub fn with_progress(
        path: impl AsRef<Path>,
        block_count: u64,
        tx: &Sender<BootProgress>,
    ) -> Result<Self> {
        Self::open_inner(path.as_ref(), block_count, Some(tx))
    }

    fn open_inner(path: &Path, block_count: u64, tx: Option<&Sender<BootProgress>>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let wanted = block_count * BLOCK_SIZE as u64;
        let current = file.metadata()?.len();
        if current < wanted {
            if let Some(tx) = tx {
                let _ = tx.send(BootProgress::Step("🪶 Allocating disk space..."));
            }
            file.set_len(wanted)?;
        }
        if let Some(tx) = tx {
            let _ = tx.send(BootProgress::Progress(30));
        }

        // 已存在的镜像比请求更大时，以镜像实际大小为准
        let block_count = block_count.max(current / BLOCK_SIZE as u64);
        debug!("opened disk image {} ({} blocks)", path.display(), block_count);

        Ok(Self {
            file: Mutex::new(file),
            block_count,
        })
    }
}

impl BlockDevice for FileDisk {
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, buf: &mut [u8], count: u64, start: u64) -> Result<u64> {
        let n = clamp_transfer(self.block_count, count, start, buf.len());
        if n == 0 {
            return Ok(0);
        }
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(start * BLOCK_SIZE as u64))?;
        file.read_exact(&mut buf[..n as usize * BLOCK_SIZE])?;
        Ok(n)
    }

    fn write_blocks(&self, buf: &[u8], count: u64, start: u64) -> Result<u64> {
        let n = clamp_transfer(self.block_count, count, start, buf.len());
        if n == 0 {
            return Ok(0);
        }
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(start * BLOCK_SIZE as u64))?;
        file.write_all(&buf[..n as usize * BLOCK_SIZE])?;
        Ok(n)
    }
}
