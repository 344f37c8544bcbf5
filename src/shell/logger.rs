use colored::*;
use log::{Level, LevelFilter, Log, Metadata, Record};

// 日志级别从这个环境变量读取，默认只显示 warn 及以上
const LOG_ENV: &str = "BLOCKFS_LOG";

struct ShellLogger;

static LOGGER: ShellLogger = ShellLogger;

impl Log for ShellLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "[ERROR]".red().bold(),
            Level::Warn => "[WARN]".yellow().bold(),
            Level::Info => "[INFO]".blue(),
            Level::Debug => "[DEBUG]".green(),
            Level::Trace => "[TRACE]".bright_black(),
        };
        eprintln!("{} {}", tag, record.args().to_string().bright_black());
    }

    fn flush(&self) {}
}

/// 安装日志后端，重复调用时静默忽略
pub fn init() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
