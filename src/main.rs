use anyhow::{Context, Result};
use std::sync::Arc;

use quiz_pipeline::browser;
use quiz_pipeline::models::CallerIdentity;
use quiz_pipeline::services::{CodeRunner, Collaborators, LlmService, PageFetcher, SubmitClient};
use quiz_pipeline::utils::logging;
use quiz_pipeline::{Config, PipelineOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：PIPELINE_CONFIG 指向 TOML 文件时优先使用
    let config = match std::env::var("PIPELINE_CONFIG") {
        Ok(path) => Config::from_toml_file(&path)?,
        Err(_) => Config::from_env()?,
    };
    config.validate()?;

    // 初始化日志
    logging::init(config.verbose_logging);
    if !config.output_log_file.is_empty() {
        logging::init_log_file(&config.output_log_file)?;
    }
    logging::log_startup(
        config.total_budget_seconds,
        config.verification_enabled,
        config.max_concurrent_sessions,
    );

    let url = std::env::var("QUIZ_URL").context("缺少环境变量 QUIZ_URL")?;
    let caller = CallerIdentity::new(
        std::env::var("QUIZ_EMAIL").context("缺少环境变量 QUIZ_EMAIL")?,
        std::env::var("QUIZ_SECRET").context("缺少环境变量 QUIZ_SECRET")?,
    );

    // 组装协作方
    let browser = browser::open_browser(config.browser_debug_port).await?;
    let llm = Arc::new(LlmService::new(&config));
    let collaborators = Collaborators {
        fetcher: Arc::new(PageFetcher::new(browser)),
        analyzer: llm.clone(),
        verifier: llm,
        executor: Arc::new(CodeRunner::new(&config.work_dir)),
        submitter: Arc::new(SubmitClient::new()),
    };

    let orchestrator = PipelineOrchestrator::new(config, collaborators)?;
    let report = orchestrator.run_session(url, caller).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
