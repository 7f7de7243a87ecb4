use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, ConfigError};
use crate::models::Stage;

/// 程序配置文件
///
/// 所有字段都有默认值，TOML 文件中只需写要覆盖的项。
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 时间预算 ---
    /// 单个会话的总时间预算（秒）
    pub total_budget_seconds: u64,
    /// 为最终提交预留的时间（秒）
    pub submission_reserve_seconds: u64,
    /// 单次调用的最短超时（秒），不会超过剩余工作时间
    pub min_call_timeout_seconds: u64,
    /// 截止后最后一次提交的最短超时（秒）
    pub final_submit_grace_seconds: u64,
    /// 进入下一题所需的最少剩余时间（秒）
    pub chain_floor_seconds: u64,
    /// 链式题目是否共用同一个时间预算
    pub shared_chain_budget: bool,
    // --- 自我修正 ---
    pub max_refinement_rounds: usize,
    pub verification_enabled: bool,
    // --- 路由与重试 ---
    /// 每个后端的最大调用次数，失败达到该次数后降级到下一个后端
    pub max_retries_per_stage: usize,
    pub stage_timeout_caps: StageTimeoutCaps,
    pub model_preferences: ModelPreferences,
    // --- 会话 ---
    /// 同时运行的会话数量
    pub max_concurrent_sessions: usize,
    /// 登记表最多保留的已结束会话数，超出时淘汰最早的
    pub max_archived_sessions: usize,
    /// 没有任何可用答案时提交的占位答案
    pub placeholder_answer: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 会话汇总日志文件，为空时不写入
    pub output_log_file: String,
    // --- 外部协作方 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub browser_debug_port: u16,
    pub work_dir: String,
}

/// 每个阶段单次调用的超时上限（秒）
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeoutCaps {
    pub fetch: u64,
    pub analyze: u64,
    pub verify: u64,
    pub execute: u64,
    pub submit: u64,
}

impl Default for StageTimeoutCaps {
    fn default() -> Self {
        Self {
            fetch: 60,
            analyze: 60,
            verify: 30,
            execute: 60,
            submit: 30,
        }
    }
}

impl StageTimeoutCaps {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Fetch => self.fetch,
            Stage::Analyze => self.analyze,
            Stage::Verify => self.verify,
            Stage::Execute => self.execute,
            Stage::Submit => self.submit,
        };
        Duration::from_secs(secs)
    }
}

/// 每个阶段的后端偏好列表（首选在前）
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPreferences {
    pub fetch: Vec<String>,
    pub analyze: Vec<String>,
    pub verify: Vec<String>,
    pub execute: Vec<String>,
    pub submit: Vec<String>,
}

impl Default for ModelPreferences {
    fn default() -> Self {
        Self {
            fetch: vec!["chromium".to_string()],
            analyze: vec![
                "openai/gpt-4o".to_string(),
                "anthropic/claude-sonnet-4".to_string(),
                "google/gemini-2.0-flash-exp".to_string(),
            ],
            verify: vec![
                "anthropic/claude-sonnet-4".to_string(),
                "openai/gpt-4o".to_string(),
            ],
            execute: vec!["python3".to_string()],
            submit: vec!["http".to_string()],
        }
    }
}

impl ModelPreferences {
    pub fn for_stage(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Analyze => &self.analyze,
            Stage::Verify => &self.verify,
            Stage::Execute => &self.execute,
            Stage::Submit => &self.submit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            total_budget_seconds: 180,
            submission_reserve_seconds: 30,
            min_call_timeout_seconds: 5,
            final_submit_grace_seconds: 5,
            chain_floor_seconds: 45,
            shared_chain_budget: true,
            max_refinement_rounds: 2,
            verification_enabled: true,
            max_retries_per_stage: 2,
            stage_timeout_caps: StageTimeoutCaps::default(),
            model_preferences: ModelPreferences::default(),
            max_concurrent_sessions: 8,
            max_archived_sessions: 1000,
            placeholder_answer: "unknown".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://aipipe.org/openrouter/v1".to_string(),
            browser_debug_port: 9222,
            work_dir: "/tmp/quiz_pipeline".to_string(),
        }
    }
}

impl Config {
    /// 从环境变量加载，未设置的项使用默认值
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，然后应用环境变量覆盖
    pub fn from_toml_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: display.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| {
            ConfigError::TomlParseFailed {
                path: display,
                source,
            }
        })?;
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> AppResult<Self> {
        override_parsed(&mut self.total_budget_seconds, "TOTAL_BUDGET_SECONDS")?;
        override_parsed(&mut self.submission_reserve_seconds, "SUBMISSION_RESERVE_SECONDS")?;
        override_parsed(&mut self.max_refinement_rounds, "MAX_REFINEMENT_ROUNDS")?;
        override_parsed(&mut self.verification_enabled, "VERIFICATION_ENABLED")?;
        override_parsed(&mut self.max_retries_per_stage, "MAX_RETRIES_PER_STAGE")?;
        override_parsed(&mut self.chain_floor_seconds, "CHAIN_FLOOR_SECONDS")?;
        override_parsed(&mut self.max_concurrent_sessions, "MAX_CONCURRENT_SESSIONS")?;
        override_parsed(&mut self.max_archived_sessions, "MAX_ARCHIVED_SESSIONS")?;
        override_parsed(&mut self.verbose_logging, "VERBOSE_LOGGING")?;
        override_parsed(&mut self.browser_debug_port, "BROWSER_DEBUG_PORT")?;
        override_string(&mut self.output_log_file, "OUTPUT_LOG_FILE");
        override_string(&mut self.llm_api_key, "LLM_API_KEY");
        override_string(&mut self.llm_api_base_url, "LLM_API_BASE_URL");
        override_string(&mut self.work_dir, "WORK_DIR");
        Ok(self)
    }

    /// 校验配置
    pub fn validate(&self) -> AppResult<()> {
        if self.submission_reserve_seconds >= self.total_budget_seconds {
            return Err(ConfigError::invalid(
                "submission_reserve_seconds",
                format!(
                    "提交预留 {}s 必须小于总预算 {}s",
                    self.submission_reserve_seconds, self.total_budget_seconds
                ),
            )
            .into());
        }
        // 共用预算时，下一题开始时至少还要有工作时间
        if self.shared_chain_budget
            && self.chain_floor_seconds <= self.submission_reserve_seconds
        {
            return Err(ConfigError::invalid(
                "chain_floor_seconds",
                format!(
                    "进入下一题的最少剩余时间 {}s 必须大于提交预留 {}s",
                    self.chain_floor_seconds, self.submission_reserve_seconds
                ),
            )
            .into());
        }
        if self.max_refinement_rounds == 0 {
            return Err(ConfigError::invalid("max_refinement_rounds", "至少为 1").into());
        }
        if self.max_retries_per_stage == 0 {
            return Err(ConfigError::invalid("max_retries_per_stage", "至少为 1").into());
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ConfigError::invalid("max_concurrent_sessions", "至少为 1").into());
        }
        if self.max_archived_sessions == 0 {
            return Err(ConfigError::invalid("max_archived_sessions", "至少为 1").into());
        }
        for stage in Stage::ALL {
            if self.model_preferences.for_stage(stage).is_empty() {
                return Err(ConfigError::invalid(
                    format!("model_preferences.{}", stage),
                    "候选列表不能为空",
                )
                .into());
            }
        }
        Ok(())
    }

    /// 会话间共享的只读预算参数
    pub fn budget_settings(&self) -> BudgetSettings {
        BudgetSettings {
            total: Duration::from_secs(self.total_budget_seconds),
            submission_reserve: Duration::from_secs(self.submission_reserve_seconds),
            min_call_timeout: Duration::from_secs(self.min_call_timeout_seconds),
            final_submit_grace: Duration::from_secs(self.final_submit_grace_seconds),
        }
    }

    pub fn chain_floor(&self) -> Duration {
        Duration::from_secs(self.chain_floor_seconds)
    }
}

/// 构造 TimeBudget 所需的参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetSettings {
    pub total: Duration,
    pub submission_reserve: Duration,
    pub min_call_timeout: Duration,
    pub final_submit_grace: Duration,
}

fn override_parsed<T: std::str::FromStr>(field: &mut T, var_name: &str) -> AppResult<()> {
    if let Ok(value) = std::env::var(var_name) {
        *field = value.trim().parse().map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value: value.clone(),
            expected_type: std::any::type_name::<T>().to_string(),
        })?;
    }
    Ok(())
}

fn override_string(field: &mut String, var_name: &str) {
    if let Ok(value) = std::env::var(var_name) {
        *field = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.budget_settings().total, Duration::from_secs(180));
        assert_eq!(
            config.stage_timeout_caps.for_stage(Stage::Verify),
            Duration::from_secs(30)
        );
        assert_eq!(config.model_preferences.for_stage(Stage::Analyze)[0], "openai/gpt-4o");
    }

    #[test]
    fn test_reserve_must_be_below_total() {
        let config = Config {
            total_budget_seconds: 30,
            submission_reserve_seconds: 30,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_floor_must_exceed_reserve() {
        let config = Config {
            submission_reserve_seconds: 30,
            chain_floor_seconds: 30,
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("chain_floor_seconds"));

        // 每题独立预算时不检查
        let per_hop = Config {
            shared_chain_budget: false,
            ..config
        };
        assert!(per_hop.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = Config {
            max_concurrent_sessions: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_preference_list_rejected() {
        let mut config = Config::default();
        config.model_preferences.verify.clear();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("model_preferences.verify"));
    }

    #[test]
    fn test_from_toml_file_partial_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
max_refinement_rounds = 3
verification_enabled = false

[stage_timeout_caps]
analyze = 45

[model_preferences]
analyze = ["local/llama", "openai/gpt-4o-mini"]
"#
        )
        .unwrap();

        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.max_refinement_rounds, 3);
        assert!(!config.verification_enabled);
        assert_eq!(config.stage_timeout_caps.analyze, 45);
        assert_eq!(config.stage_timeout_caps.fetch, 60);
        assert_eq!(config.model_preferences.analyze, vec!["local/llama", "openai/gpt-4o-mini"]);
        assert_eq!(config.model_preferences.submit, vec!["http"]);
    }

    #[test]
    fn test_from_toml_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_refinement_rounds = \"many\"").unwrap();
        let err = Config::from_toml_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("TOML"));
    }
}
