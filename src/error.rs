use std::time::Duration;

use thiserror::Error;

use crate::models::Stage;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 阶段执行错误
    #[error("阶段错误: {0}")]
    Stage(#[from] StageError),
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(String),
    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 单次协作方调用的失败
///
/// 全部可恢复：由 StageExecutor 决定重试还是切换后端。
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("抓取失败: {0}")]
    Fetch(String),
    #[error("分析失败: {0}")]
    Analyze(String),
    #[error("校验失败: {0}")]
    Verify(String),
    #[error("代码执行失败: {0}")]
    Execution(String),
    #[error("提交失败: {0}")]
    Submit(String),
    /// 调用超过了分配给它的时间
    #[error("{stage} 调用超时 ({timeout:?})")]
    Timeout { stage: Stage, timeout: Duration },
    /// 返回为空或无法解析
    #[error("{stage} 返回结果无效: {reason}")]
    Malformed { stage: Stage, reason: String },
}

/// 某阶段的所有候选后端都已失败
#[derive(Debug, Clone, Error)]
#[error("阶段 {stage} 的所有候选后端均已耗尽")]
pub struct ExhaustionError {
    pub stage: Stage,
}

/// 阶段级错误（StageExecutor 的输出）
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// 工作时间已用尽
    ///
    /// 不是要上报给调用方的错误，而是让编排层直接转入提交。
    #[error("阶段 {stage} 开始前截止时间已到")]
    DeadlineExceeded {
        stage: Stage,
        last_error: Option<CallError>,
    },
    /// 阶段终止失败（重试次数用尽或候选耗尽）
    #[error("阶段 {stage} 失败 (共调用 {calls} 次): {}", describe_last(.last_error))]
    StageFailed {
        stage: Stage,
        calls: usize,
        last_error: Option<CallError>,
    },
}

fn describe_last(last_error: &Option<CallError>) -> String {
    match last_error {
        Some(e) => e.to_string(),
        None => "无可用后端".to_string(),
    }
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::DeadlineExceeded { stage, .. } | StageError::StageFailed { stage, .. } => {
                *stage
            }
        }
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, StageError::DeadlineExceeded { .. })
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值不合法
    #[error("配置项 {field} 不合法: {reason}")]
    Invalid { field: String, reason: String },
}

// ========== 便捷构造函数 ==========

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl CallError {
    /// 按阶段包装一条错误信息
    pub fn for_stage(stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        match stage {
            Stage::Fetch => CallError::Fetch(message),
            Stage::Analyze => CallError::Analyze(message),
            Stage::Verify => CallError::Verify(message),
            Stage::Execute => CallError::Execution(message),
            Stage::Submit => CallError::Submit(message),
        }
    }

    pub fn malformed(stage: Stage, reason: impl Into<String>) -> Self {
        CallError::Malformed {
            stage,
            reason: reason.into(),
        }
    }

    /// 超时或返回无效时，该后端立即降级，不再重试
    pub fn demotes_backend(&self) -> bool {
        matches!(self, CallError::Timeout { .. } | CallError::Malformed { .. })
    }
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(err.to_string())
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
