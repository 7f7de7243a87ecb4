//! 提交服务 - 业务能力层
//!
//! 把答案 POST 到题目页面声明的提交地址

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::CallError;
use crate::models::{Stage, Submission, SubmitOutcome};
use crate::services::Submitter;

/// 提交请求体
#[derive(Debug, Serialize)]
struct AnswerPayload<'a> {
    email: &'a str,
    secret: &'a str,
    url: &'a str,
    answer: &'a JsonValue,
}

/// 提交回执
#[derive(Debug, Deserialize)]
struct AnswerReply {
    correct: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<AnswerReply> for SubmitOutcome {
    fn from(reply: AnswerReply) -> Self {
        SubmitOutcome {
            accepted: reply.correct,
            reason: reply.reason,
            next_url: reply.url.filter(|url| !url.trim().is_empty()),
        }
    }
}

/// 提交服务
pub struct SubmitClient {
    http: reqwest::Client,
}

impl SubmitClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for SubmitClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Submitter for SubmitClient {
    async fn submit(
        &self,
        submission: &Submission,
        timeout: Duration,
        _backend: &str,
    ) -> Result<SubmitOutcome, CallError> {
        let submit_url = submission
            .submit_url
            .as_deref()
            .ok_or_else(|| CallError::Submit(format!("题目 {} 没有提交地址", submission.quiz_url)))?;

        info!("📤 正在提交答案到: {}", submit_url);

        let payload = AnswerPayload {
            email: &submission.caller.email,
            secret: &submission.caller.secret,
            url: &submission.quiz_url,
            answer: &submission.answer,
        };

        let response = self
            .http
            .post(submit_url)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CallError::Submit(format!("请求失败 ({}): {}", submit_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("提交返回 HTTP {}: {}", status, body);
            return Err(CallError::Submit(format!("HTTP {}: {}", status, body)));
        }

        let reply: AnswerReply = response
            .json()
            .await
            .map_err(|e| CallError::malformed(Stage::Submit, e.to_string()))?;

        if reply.correct {
            info!("✓ 答案正确");
        } else {
            warn!(
                "✗ 答案错误: {}",
                reply.reason.as_deref().unwrap_or("未说明原因")
            );
        }
        Ok(reply.into())
    }
}
