use std::{path::Path, sync::mpsc::Sender};

use log::info;

use crate::{
    disk::file_disk::FileDisk,
    fs::{config::FormatOptions, error::Result, FileSystem},
};

/// 启动过程中发给界面的进度消息
pub enum BootProgress {
    Step(&'static str),
    Progress(u64),
    Finished(Result<FileSystem<FileDisk>>),
}

/// 打开磁盘镜像并挂载；镜像上没有有效卷时自动格式化。
/// 结果通过 `BootProgress::Finished` 发回，发送失败（界面已退出）时直接放弃。
pub fn perform_disk_initialization(
    path: &Path,
    block_count: u64,
    options: &FormatOptions,
    tx: Sender<BootProgress>,
) {
    let _ = tx.send(BootProgress::Step("🧠 Initializing virtual disk..."));

    let disk = match FileDisk::with_progress(path, block_count, &tx) {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.send(BootProgress::Finished(Err(e.into())));
            return;
        }
    };

    let _ = tx.send(BootProgress::Step("⚙️ Mounting file system..."));
    let _ = tx.send(BootProgress::Progress(50));

    // 签名匹配就挂载，否则格式化
    let result = FileSystem::open_or_format(disk, options);
    if let Ok(fs) = &result {
        info!(
            "volume '{}' ready, {} free blocks",
            fs.super_block().volume_name,
            fs.free_blocks()
        );
    }

    let _ = tx.send(BootProgress::Progress(100));
    let _ = tx.send(BootProgress::Finished(result));
}
