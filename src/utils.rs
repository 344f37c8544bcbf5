use chrono::{Local, TimeZone, Utc};
use uuid::Uuid;

/// 当前时间（Unix 秒）
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// 时间戳格式化为本地时间，格式化失败时原样输出数字
pub fn format_timestamp(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

/// 生成一个随机唯一 ID
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// 把块号列表切成若干段连续区间 (起始块, 块数)，保持原有顺序。
/// 用于把逐块读写合并成一次多块传输。
pub fn contiguous_runs(blocks: &[u32]) -> Vec<(u32, usize)> {
    let mut runs: Vec<(u32, usize)> = Vec::new();
    for &block in blocks {
        match runs.last_mut() {
            Some((start, len)) if u64::from(*start) + *len as u64 == u64::from(block) => *len += 1,
            _ => runs.push((block, 1)),
        }
    }
    runs
}
