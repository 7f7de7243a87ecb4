//! 日志工具模块
//!
//! 提供日志初始化、会话汇总和格式化辅助函数

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::SessionReport;

/// 初始化 tracing 日志
///
/// `RUST_LOG` 优先；否则 verbose 时为 debug，平时为 info。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n答题会话日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 把会话结果追加到日志文件
pub fn append_session_summary(log_file_path: &str, report: &SessionReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    let line = format!(
        "[{}] 会话 {} | {} | 状态 {} | 题目 {} | 耗时 {} | {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        report.session_id,
        report.email,
        report.final_state,
        report.attempts.len(),
        format_duration(Duration::from_millis(report.elapsed_ms)),
        report.failure.as_deref().unwrap_or("-"),
    );
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(total_budget_seconds: u64, verification_enabled: bool, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 答题流水线启动");
    info!("⏱️ 单会话时间预算: {}s", total_budget_seconds);
    info!(
        "🔎 答案校验: {}",
        if verification_enabled { "开启" } else { "关闭" }
    );
    info!("📊 最大并发会话数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 打印会话最终统计
pub fn print_session_report(report: &SessionReport) {
    info!("\n{}", "=".repeat(60));
    info!("📊 会话 {} 结束: {}", report.session_id, report.final_state);
    info!("{}", "=".repeat(60));
    info!("题目数量: {}", report.attempts.len());
    info!("链式深度: {}", report.chain_depth);
    info!(
        "总耗时: {}",
        format_duration(Duration::from_millis(report.elapsed_ms))
    );
    if let Some(failure) = &report.failure {
        info!("❌ 失败原因: {}", failure);
    }
    info!("{}", "=".repeat(60));
}

/// 格式化时长，保留一位小数
pub fn format_duration(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
