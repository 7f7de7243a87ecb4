//! 页面抓取服务 - 业务能力层
//!
//! 用浏览器渲染题目页面，提取题干、提交地址和附件链接

use async_trait::async_trait;
use chromiumoxide::Browser;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::infrastructure::JsExecutor;
use crate::models::FetchedContent;
use crate::services::Fetcher;

/// 页面快照脚本：正文、链接、代码块
const SNAPSHOT_JS: &str = r#"
(() => ({
    text: document.body ? document.body.innerText : "",
    links: Array.from(document.querySelectorAll('a[href]')).map(a => ({
        href: a.href,
        text: a.innerText || ""
    })),
    code_blocks: Array.from(document.querySelectorAll('code, pre')).map(e => e.innerText || "")
}))()
"#;

/// 可下载附件的扩展名
const FILE_EXTENSIONS: &[&str] = &[
    ".pdf", ".csv", ".xlsx", ".xls", ".json", ".txt", ".jpg", ".jpeg", ".png", ".gif", ".bmp",
    ".webp", ".mp3", ".wav", ".ogg", ".m4a", ".mp4", ".avi", ".mov", ".mkv", ".zip", ".tar",
    ".gz", ".py", ".ipynb",
];

/// 渲染后页面的原始数据
#[derive(Debug, Default, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub links: Vec<PageLink>,
    #[serde(default)]
    pub code_blocks: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageLink {
    pub href: String,
    #[serde(default)]
    pub text: String,
}

/// 页面抓取服务
///
/// 职责：
/// - 持有浏览器，为每次抓取打开一个新页面
/// - 只产出 FetchedContent，不关心后续流程
pub struct PageFetcher {
    browser: Mutex<Browser>,
}

impl PageFetcher {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser: Mutex::new(browser),
        }
    }

    async fn render(&self, url: &str) -> anyhow::Result<PageSnapshot> {
        // 只在创建页面时持锁
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page(url).await?
        };
        let executor = JsExecutor::new(page);
        let snapshot = executor.eval_as::<PageSnapshot>(SNAPSHOT_JS).await;
        if let Err(e) = executor.close().await {
            debug!("关闭页面失败: {}", e);
        }
        snapshot
    }
}

#[async_trait]
impl Fetcher for PageFetcher {
    async fn fetch(
        &self,
        url: &str,
        _timeout: Duration,
        backend: &str,
    ) -> Result<FetchedContent, CallError> {
        info!("🌐 正在渲染题目页面: {} (引擎: {})", url, backend);

        let snapshot = self
            .render(url)
            .await
            .map_err(|e| CallError::Fetch(format!("{}: {}", url, e)))?;

        let content = parse_page(url, snapshot);
        if content.question.is_empty() {
            return Err(CallError::malformed(
                crate::models::Stage::Fetch,
                format!("页面没有正文: {}", url),
            ));
        }

        info!(
            "✓ 页面解析完成: 题干 {} 字符, 附件 {} 个",
            content.question.chars().count(),
            content.files.len()
        );
        Ok(content)
    }
}

/// 把页面快照解析为题目内容
pub fn parse_page(url: &str, snapshot: PageSnapshot) -> FetchedContent {
    let submit_url = extract_submit_url(&snapshot.text, &snapshot.code_blocks);
    if submit_url.is_none() {
        warn!("⚠️ 页面中没有找到提交地址: {}", url);
    }

    let mut files = BTreeMap::new();
    for link in &snapshot.links {
        if is_file_url(&link.href) {
            files.insert(file_name(&link.href, &link.text), link.href.clone());
        }
    }

    FetchedContent {
        url: url.to_string(),
        question: snapshot.text.trim().to_string(),
        submit_url,
        files,
    }
}

/// 提取答案提交地址
fn extract_submit_url(text: &str, code_blocks: &[String]) -> Option<String> {
    let patterns = [
        r"(?i)post your answer to\s+(https?://\S+)",
        r"(?i)submit url:\s*(https?://\S+)",
        r"(?i)submit.*?to\s+(https?://\S+)",
    ];

    for pattern in patterns {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(text) {
                let url = caps[1].trim_end_matches(['.', ',', ')', '"', '\'']);
                return Some(url.to_string());
            }
        }
    }

    if let Ok(re) = Regex::new(r#"https?://[^\s"']+/submit"#) {
        for block in code_blocks {
            if let Some(m) = re.find(block) {
                return Some(m.as_str().to_string());
            }
        }
    }

    None
}

fn is_file_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn file_name(url: &str, link_text: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => link_text.trim().replace(' ', "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(href: &str) -> PageLink {
        PageLink {
            href: href.to_string(),
            text: String::new(),
        }
    }

    #[test]
    fn test_extract_submit_url_from_text() {
        let text = "Sum the values. Post your answer to https://quiz.example.com/submit.";
        assert_eq!(
            extract_submit_url(text, &[]).as_deref(),
            Some("https://quiz.example.com/submit")
        );
    }

    #[test]
    fn test_extract_submit_url_from_code_block() {
        let blocks = vec![r#"{"url": "https://quiz.example.com/api/submit"}"#.to_string()];
        assert_eq!(
            extract_submit_url("no hint here", &blocks).as_deref(),
            Some("https://quiz.example.com/api/submit")
        );
        assert_eq!(extract_submit_url("no hint here", &[]), None);
    }

    #[test]
    fn test_parse_page_collects_files() {
        let snapshot = PageSnapshot {
            text: "  What is the total?\nSubmit URL: https://q.example.com/submit\n".to_string(),
            links: vec![
                link("https://q.example.com/data/sales.csv?dl=1"),
                link("https://q.example.com/about"),
                link("https://q.example.com/scan.PDF"),
            ],
            code_blocks: vec![],
        };

        let content = parse_page("https://q.example.com/quiz-1", snapshot);
        assert!(content.question.starts_with("What is the total?"));
        assert_eq!(content.submit_url.as_deref(), Some("https://q.example.com/submit"));
        assert_eq!(content.files.len(), 2);
        assert_eq!(
            content.files.get("sales.csv").map(String::as_str),
            Some("https://q.example.com/data/sales.csv?dl=1")
        );
        assert!(content.files.contains_key("scan.PDF"));
    }
}
