pub mod command;
pub mod logger;
pub mod parse;

use crate::shell::{
    command::{execute_command, Flow},
    parse::parse_command,
};
use blockfs::{
    disk::{
        init::{perform_disk_initialization, BootProgress},
        DEFAULT_BLOCK_COUNT,
    },
    BlockDevice, FileDisk, FileSystem, FormatOptions,
};
use colored::*;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use reedline::{DefaultCompleter, DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal};
use std::{
    env,
    io::stdout,
    path::PathBuf,
    sync::mpsc,
    thread,
};

const DEFAULT_IMAGE: &str = "disk.img";
const BLOCKS_ENV: &str = "BLOCKFS_BLOCKS";

pub fn start_shell() {
    let image = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE));
    let block_count = env::var(BLOCKS_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_BLOCK_COUNT);

    let mut fs = match boot(image, block_count) {
        Some(fs) => fs,
        None => return,
    };

    let username = whoami::username();
    let hostname = whoami::hostname();

    println!(
        "{}",
        "Type 'help' for available commands. Use ↑↓ for history, Tab for auto-completion.\n"
            .bright_black()
    );

    // 初始化 reedline，历史记录放在用户主目录
    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blockfs_history");

    let mut line_editor = Reedline::create();
    match FileBackedHistory::with_file(100, history_path) {
        Ok(history) => line_editor = line_editor.with_history(Box::new(history)),
        Err(e) => log::warn!("shell history disabled: {}", e),
    }

    // 命令补全
    let commands = vec![
        "help", "ls", "pwd", "mkdir", "rmdir", "create", "touch", "rm", "cd", "read", "cat",
        "write", "append", "stat", "mv", "format", "info", "exit",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    let completer = DefaultCompleter::new_with_wordlen(commands, 2);
    line_editor = line_editor.with_completer(Box::new(completer));

    loop {
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!(
                "{}@{}:{}",
                username.green().bold(),
                hostname.cyan().bold(),
                fs.getcwd().blue()
            )),
            DefaultPromptSegment::Basic("BlockFS".bright_blue().bold().to_string()),
        );

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let Some(cmd) = parse_command(trimmed) else {
                    println!(
                        "{}",
                        "⚠️  Unknown command or missing argument. Type 'help' for command list."
                            .yellow()
                    );
                    continue;
                };

                match execute_command(&cmd, &mut fs) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit) => break,
                    Ok(Flow::Reformat) => {
                        let disk = fs.unmount();
                        fs = match reformat(disk) {
                            Ok(fresh) => fresh,
                            Err(e) => {
                                println!("{} {}", "❌ Format failed:".red().bold(), e);
                                return;
                            }
                        };
                    }
                    Err(e) => println!("{} {}", "❌ Error:".red().bold(), e),
                }
            }
            Ok(Signal::CtrlC) => {
                println!();
                continue;
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "Exiting BlockFS...".yellow());
                break;
            }
            Err(e) => {
                println!("Error reading line: {}", e);
                break;
            }
        }
    }

    // 卸载时写回所有打开文件的缓冲区
    let _ = fs.unmount();
    println!("{}", "GoodBye!".bright_yellow());
}

/// 启动画面：后台线程打开镜像并挂载（或格式化），前台根据进度消息刷新进度条
fn boot(image: PathBuf, block_count: u64) -> Option<FileSystem<FileDisk>> {
    let mut stdout = stdout();
    let _ = execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0));
    println!("{}", "[BlockFS Booting...]".bright_yellow().bold());

    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        perform_disk_initialization(&image, block_count, &FormatOptions::default(), tx);
    });

    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}% {msg}") {
        pb.set_style(style.progress_chars("=> "));
    }

    let mut mounted = None;
    for message in rx {
        match message {
            BootProgress::Step(step) => pb.println(step),
            BootProgress::Progress(pos) => pb.set_position(pos),
            BootProgress::Finished(result) => {
                mounted = Some(result);
                break;
            }
        }
    }
    let _ = worker.join();

    match mounted {
        Some(Ok(fs)) => {
            pb.finish_with_message("✅ Ready!");
            let _ = execute!(
                stdout,
                SetForegroundColor(Color::Cyan),
                Print(format!(
                    "Welcome to BlockFS v{} ({} free blocks)\n",
                    env!("CARGO_PKG_VERSION"),
                    fs.free_blocks()
                )),
                ResetColor
            );
            Some(fs)
        }
        Some(Err(e)) => {
            pb.abandon_with_message("❌ Boot failed");
            println!("{} {}", "❌ Error:".red().bold(), e);
            None
        }
        None => {
            pb.abandon_with_message("❌ Boot worker exited early");
            None
        }
    }
}

fn reformat<D: BlockDevice>(disk: D) -> blockfs::Result<FileSystem<D>> {
    println!("💾 Formatting virtual disk...");
    let pb = ProgressBar::new_spinner();
    pb.set_message("writing free space map and root directory");
    let fs = FileSystem::format(disk, &FormatOptions::default());
    match &fs {
        Ok(_) => pb.finish_with_message("✅ Disk formatted successfully!"),
        Err(_) => pb.abandon_with_message("❌ Format failed"),
    }
    fs
}
