//! LLM 服务 - 业务能力层
//!
//! 同时提供 analyze 与 verify 两种能力，后端标识即模型名
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（OpenRouter、AIPipe 等）

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CallError;
use crate::models::{AnalysisOutput, FetchedContent, Stage, Verdict};
use crate::services::{Analyzer, Verifier};
use crate::utils::logging::truncate_text;

const ANALYZER_SYSTEM_PROMPT: &str = "You solve data-analysis quiz questions. \
Reply with a single JSON object: {\"answer\": <value>, \"reasoning\": <string>, \"code\": <python or null>}. \
Only include code when the answer must be computed from the attached files; \
the code must print the final answer as its last line.";

const VERIFIER_SYSTEM_PROMPT: &str = "You review a proposed answer to a quiz question. \
Do not write code. Reply with a single JSON object: {\"approved\": <bool>, \"feedback\": <string or null>}. \
When not approved, feedback must say what to fix.";

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API 求解题目、校验答案
/// - 每次调用由调用方指定模型
/// - 不关心重试和降级（由 StageExecutor 负责）
pub struct LlmService {
    client: Client<OpenAIConfig>,
    temperature: f32,
}

impl LlmService {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            temperature: 0.3,
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `model`: 模型名
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息
    pub async fn send_to_llm(
        &self,
        model: &str,
        user_message: &str,
        system_message: &str,
    ) -> Result<String> {
        debug!("调用 LLM API，模型: {}", model);
        debug!("用户消息长度: {} 字符", user_message.len());

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_message)
                    .build()?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_message)
                    .build()?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(self.temperature)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败 (模型: {}): {}", model, e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空 (模型: {})", model))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl Analyzer for LlmService {
    async fn analyze(
        &self,
        content: &FetchedContent,
        prior_feedback: Option<&str>,
        _timeout: Duration,
        backend: &str,
    ) -> Result<AnalysisOutput, CallError> {
        let prompt = build_analyze_prompt(content, prior_feedback);
        let response = self
            .send_to_llm(backend, &prompt, ANALYZER_SYSTEM_PROMPT)
            .await
            .map_err(|e| CallError::Analyze(e.to_string()))?;

        debug!("analyze 响应: {}", truncate_text(&response, 200));
        parse_analysis(&response)
    }
}

#[async_trait]
impl Verifier for LlmService {
    async fn verify(
        &self,
        content: &FetchedContent,
        candidate: &AnalysisOutput,
        _timeout: Duration,
        backend: &str,
    ) -> Result<Verdict, CallError> {
        let prompt = build_verify_prompt(content, candidate);
        let response = self
            .send_to_llm(backend, &prompt, VERIFIER_SYSTEM_PROMPT)
            .await
            .map_err(|e| CallError::Verify(e.to_string()))?;

        debug!("verify 响应: {}", truncate_text(&response, 200));
        parse_verdict(&response)
    }
}

fn describe_files(content: &FetchedContent) -> String {
    if content.files.is_empty() {
        return "No files provided".to_string();
    }
    content
        .files
        .iter()
        .map(|(name, url)| format!("- {} ({})", name, url))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_analyze_prompt(content: &FetchedContent, prior_feedback: Option<&str>) -> String {
    let mut prompt = format!(
        "Question page: {}\n\nQuestion:\n{}\n\nFiles:\n{}\n",
        content.url,
        content.question,
        describe_files(content)
    );
    if let Some(feedback) = prior_feedback {
        prompt.push_str(&format!(
            "\nA reviewer rejected your previous answer with this feedback:\n{}\nFix the problem and answer again.\n",
            feedback
        ));
    }
    prompt
}

fn build_verify_prompt(content: &FetchedContent, candidate: &AnalysisOutput) -> String {
    format!(
        "Question:\n{}\n\nFiles:\n{}\n\nProposed answer: {}\nReasoning: {}\nCode: {}\n",
        content.question,
        describe_files(content),
        candidate.answer,
        candidate.reasoning.as_deref().unwrap_or("(none)"),
        candidate.code.as_deref().unwrap_or("(none)"),
    )
}

/// 从回复中取出 JSON 文本（支持 ```json 代码块）
fn extract_json_block(text: &str) -> &str {
    if let Ok(re) = Regex::new(r"(?s)```(?:json)?\s*(.*?)```") {
        if let Some(caps) = re.captures(text) {
            if let Some(m) = caps.get(1) {
                return m.as_str().trim();
            }
        }
    }
    text.trim()
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    answer: Option<JsonValue>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// 解析 analyze 回复
///
/// 不是 JSON 时整段文本作为答案；空答案视为畸形结果。
fn parse_analysis(response: &str) -> Result<AnalysisOutput, CallError> {
    let output = match serde_json::from_str::<AnalysisReply>(extract_json_block(response)) {
        Ok(reply) => AnalysisOutput {
            answer: reply.answer.unwrap_or(JsonValue::Null),
            code: reply.code.filter(|code| !code.trim().is_empty()),
            reasoning: reply.reasoning,
        },
        Err(e) => {
            warn!("无法解析 analyze JSON: {}，使用原始文本作为答案", e);
            AnalysisOutput::answer(JsonValue::String(response.trim().to_string()))
        }
    };

    if output.is_empty() {
        return Err(CallError::malformed(Stage::Analyze, "答案为空"));
    }
    Ok(output)
}

#[derive(Debug, Deserialize)]
struct VerdictReply {
    #[serde(default = "default_approved")]
    approved: bool,
    #[serde(default)]
    feedback: Option<String>,
}

fn default_approved() -> bool {
    true
}

/// 解析 verify 回复
///
/// 不是 JSON 时按关键词判断；拒绝但没有反馈时返回畸形结果错误。
fn parse_verdict(response: &str) -> Result<Verdict, CallError> {
    match serde_json::from_str::<VerdictReply>(extract_json_block(response)) {
        Ok(reply) if reply.approved => Ok(Verdict::Accept),
        Ok(reply) => Verdict::reject(reply.feedback.unwrap_or_default()),
        Err(e) => {
            warn!("无法解析 verify JSON: {}，按关键词判断", e);
            let lower = response.to_lowercase();
            let approving = ["approve", "correct", "looks good", "valid"]
                .iter()
                .any(|word| lower.contains(word));
            if approving {
                Ok(Verdict::Accept)
            } else {
                Verdict::reject(response.trim())
            }
        }
    }
}
