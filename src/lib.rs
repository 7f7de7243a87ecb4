//! # Quiz Pipeline
//!
//! 带截止时间的答题流水线：抓取题目页面 → 求解 → 校验修正 → 执行代码 → 提交答案，
//! 并沿着提交回执中的链接继续处理下一题。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 会话级的时间与路由状态，以及页面 JS 执行
//! - `TimeBudget` - 单调时钟上的截止时间，为每次调用分配超时
//! - `ModelRouter` - 按偏好顺序选择后端，失败后降级
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个协作方一个 trait
//! - `PageFetcher` - 用浏览器渲染题目页面
//! - `LlmService` - analyze / verify 能力
//! - `CodeRunner` - 执行生成的代码
//! - `SubmitClient` - 提交答案
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题"内部的处理步骤
//! - `StageExecutor` - 单阶段调用：超时、重试、降级
//! - `RefinementLoop` - analyze → verify → 带反馈重试
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 会话状态机与并发控制
//! - `orchestrator/session_registry` - 状态快照与归档查询
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, CallError, StageError};
pub use infrastructure::{ModelRouter, TimeBudget};
pub use models::{CallerIdentity, SessionId, SessionReport, SessionState, Stage, StatusSnapshot};
pub use orchestrator::{PipelineOrchestrator, SessionRegistry};
pub use services::Collaborators;
pub use workflow::{RefinementLoop, StageExecutor};
