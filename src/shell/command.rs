use blockfs::{
    fs::{config::DEFAULT_DIR_MODE, entry::EntryKind},
    utils::format_timestamp,
    BlockDevice, FileSystem, OpenFlags,
};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::error::Error;

// cat 每次读取的字节数
const READ_CHUNK: usize = 4096;

#[derive(Debug)]
pub enum Command {
    Help,
    Ls(Option<String>),
    Pwd,
    Mkdir(String),
    Rmdir(String),
    Create(String),
    Rm(String),
    Cd(String),
    Read(String),
    Write {
        file: String,
        content: String,
        append: bool,
    },
    Stat(String),
    Mv(String, String),
    Format,
    Info,
    Exit,
}

/// 命令执行后 shell 接下来要做的事
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Reformat,
    Exit,
}

pub fn execute_command<D: BlockDevice>(
    cmd: &Command,
    fs: &mut FileSystem<D>,
) -> Result<Flow, Box<dyn Error>> {
    match cmd {
        Command::Help => print_help(),
        Command::Ls(path) => {
            let path = path.as_deref().unwrap_or(".");
            for item in fs.list_dir(path)? {
                match item.kind {
                    EntryKind::Directory => println!("📁  {}", item.name.blue().bold()),
                    EntryKind::File => println!(
                        "📄  {} {}",
                        item.name,
                        format!("({} bytes)", item.record_len).bright_black()
                    ),
                }
            }
        }
        Command::Pwd => println!("📍 {}", fs.getcwd().cyan()),
        Command::Mkdir(path) => {
            fs.mkdir(path, DEFAULT_DIR_MODE)?;
            println!("✅ Created directory: {}", path.green());
        }
        Command::Rmdir(path) => {
            fs.rmdir(path)?;
            println!("🗑️ Removed directory: {}", path.red());
        }
        Command::Create(path) => {
            let fd = fs.open(path, OpenFlags::WRONLY | OpenFlags::CREATE)?;
            fs.close(fd)?;
            println!("📝 Created file: {}", path.green());
        }
        Command::Rm(path) => {
            fs.delete(path)?;
            println!("❌ Deleted file: {}", path.red());
        }
        Command::Cd(path) => {
            fs.setcwd(path)?;
            println!("📂 Moved to {}", fs.getcwd().blue());
        }
        Command::Read(path) => {
            let fd = fs.open(path, OpenFlags::RDONLY)?;
            let mut content = Vec::new();
            let mut chunk = [0u8; READ_CHUNK];
            let result = loop {
                match fs.read(fd, &mut chunk) {
                    Ok(0) => break Ok(()),
                    Ok(n) => content.extend_from_slice(&chunk[..n]),
                    Err(e) => break Err(e),
                }
            };
            fs.close(fd)?;
            result?;
            println!("{}", String::from_utf8_lossy(&content));
        }
        Command::Write {
            file,
            content,
            append,
        } => {
            let mode = if *append { OpenFlags::APPEND } else { OpenFlags::TRUNC };
            let fd = fs.open(file, OpenFlags::WRONLY | OpenFlags::CREATE | mode)?;
            let written = fs.write(fd, content.as_bytes());
            fs.close(fd)?;
            let written = written?;
            println!("✏️  Wrote {} bytes to {}", written, file.cyan());
            if written < content.len() {
                println!("{}", "⚠️  Short write, disk or file is full".yellow());
            }
        }
        Command::Stat(path) => {
            let st = fs.stat(path)?;
            let kind = match st.kind {
                EntryKind::Directory => "Directory",
                EntryKind::File => "File",
            };
            println!(
                "{}\n{}: {}\n{}: {}\n{}: {} bytes\n{}: {} x {} bytes\n{}: {:o}\n{}: {}\n{}: {}\n",
                "📊 File Info".bright_yellow().bold(),
                "Name".blue(),
                path,
                "Type".blue(),
                kind,
                "Size".blue(),
                st.size,
                "Blocks".blue(),
                st.blocks,
                st.block_size,
                "Mode".blue(),
                st.mode,
                "Created".blue(),
                format_timestamp(st.created),
                "Modified".blue(),
                format_timestamp(st.modified),
            );
        }
        Command::Mv(src, dst) => {
            fs.mv(src, dst)?;
            println!("🚚 Moved {} -> {}", src.cyan(), dst.cyan());
        }
        Command::Format => {
            let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Format the volume? All data will be lost")
                .default(false)
                .interact()?;
            if confirmed {
                return Ok(Flow::Reformat);
            }
            println!("{}", "Format cancelled".bright_black());
        }
        Command::Info => {
            let sb = fs.super_block();
            println!("{}", "💾 Volume Info".bright_yellow().bold());
            println!("{}: {}", "Name".blue(), sb.volume_name);
            println!("{}: {}", "Id".blue(), sb.volume_id);
            println!("{}: {} x {} bytes", "Blocks".blue(), sb.total_blocks, sb.block_size);
            println!("{}: {}", "Free".blue(), fs.free_blocks());
            println!("{}: {}", "Created".blue(), format_timestamp(sb.created));
        }
        Command::Exit => {
            println!("{}", "👋 Exiting BlockFS shell...".yellow().bold());
            return Ok(Flow::Exit);
        }
    }

    Ok(Flow::Continue)
}

fn print_help() {
    println!("{}", "📘 BlockFS Commands".bright_cyan().bold());
    println!(
        "{}",
        "
  ls [dir]              List directory (default: current)
  pwd                   Print current path
  mkdir <dir>           Create directory
  rmdir <dir>           Remove empty directory
  create <file>         Create empty file (alias: touch)
  rm <file>             Remove file
  cd [dir]              Change directory (default: /)
  read <file>           Print file content (alias: cat)
  write <file> <str>    Replace file content with string
  append <file> <str>   Append string to file
  stat <path>           Show file info
  mv <src> <dst>        Move file or directory
  format                Format virtual disk
  info                  Show volume info
  help                  Show this help message
  exit                  Quit the shell
"
        .bright_black()
    );
}
