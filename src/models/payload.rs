//! 协作方之间传递的数据
//!
//! 抓取结果、分析结果、执行结果、提交请求与提交回执

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// 调用方身份（提交答案时需要）
#[derive(Clone, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub email: String,
    #[serde(skip_serializing)]
    pub secret: String,
}

impl CallerIdentity {
    pub fn new(email: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
        }
    }
}

// secret 不进日志
impl fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerIdentity")
            .field("email", &self.email)
            .field("secret", &"***")
            .finish()
    }
}

/// 抓取到的题目页面
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedContent {
    /// 题目页面 URL
    pub url: String,
    /// 题干文本
    pub question: String,
    /// 页面中声明的答案提交地址
    pub submit_url: Option<String>,
    /// 附件：文件名 → 下载地址
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl FetchedContent {
    /// 抓取因超时未完成时使用的占位内容
    pub fn placeholder(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// analyze 阶段的产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub answer: JsonValue,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl AnalysisOutput {
    pub fn answer(answer: JsonValue) -> Self {
        Self {
            answer,
            code: None,
            reasoning: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// 空答案（null 或空字符串）视为畸形结果
    pub fn is_empty(&self) -> bool {
        match &self.answer {
            JsonValue::Null => true,
            JsonValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

/// 代码执行结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// 从输出中提取答案
    ///
    /// 取最后一个非空行，依次尝试 JSON、数字，最后原样作为字符串。
    pub fn extract_answer(&self) -> Option<JsonValue> {
        let line = self
            .stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())?;

        if let Ok(value) = serde_json::from_str::<JsonValue>(line) {
            return Some(value);
        }
        if let Ok(int) = line.parse::<i64>() {
            return Some(JsonValue::from(int));
        }
        if let Ok(float) = line.parse::<f64>() {
            return Some(JsonValue::from(float));
        }
        Some(JsonValue::String(line.to_string()))
    }
}

/// 一次提交请求
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub session_id: String,
    /// 当前题目页面 URL
    pub quiz_url: String,
    /// 提交地址（来自抓取结果，可能缺失）
    pub submit_url: Option<String>,
    pub answer: JsonValue,
    pub caller: CallerIdentity,
}

/// 提交回执
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// 下一题 URL（链式题目）
    #[serde(default)]
    pub next_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_answer_prefers_last_line() {
        assert_eq!(output("loading...\n42\n\n").extract_answer(), Some(json!(42)));
        assert_eq!(output("3.5").extract_answer(), Some(json!(3.5)));
        assert_eq!(
            output("{\"total\": 7}").extract_answer(),
            Some(json!({"total": 7}))
        );
        assert_eq!(output("done\nParis").extract_answer(), Some(json!("Paris")));
    }

    #[test]
    fn test_extract_answer_empty_output() {
        assert_eq!(output("").extract_answer(), None);
        assert_eq!(output("  \n \n").extract_answer(), None);
    }

    #[test]
    fn test_empty_analysis_output() {
        assert!(AnalysisOutput::answer(JsonValue::Null).is_empty());
        assert!(AnalysisOutput::answer(json!("  ")).is_empty());
        assert!(!AnalysisOutput::answer(json!(0)).is_empty());
        assert!(!AnalysisOutput::answer(json!(false)).is_empty());
    }

    #[test]
    fn test_caller_debug_hides_secret() {
        let caller = CallerIdentity::new("student@example.com", "hunter2");
        let printed = format!("{:?}", caller);
        assert!(printed.contains("student@example.com"));
        assert!(!printed.contains("hunter2"));
    }
}
