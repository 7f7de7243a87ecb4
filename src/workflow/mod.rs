//! 流程层（Workflow Layer）
//!
//! 定义"一道题"内部的处理步骤：单个阶段如何调用、重试、降级，
//! 以及 analyze / verify 如何交替修正答案。
//!
//! 本层不持有会话状态，也不做状态迁移。

pub mod attempt_ctx;
pub mod refinement_loop;
pub mod stage_executor;

pub use attempt_ctx::AttemptCtx;
pub use refinement_loop::RefinementLoop;
pub use stage_executor::{StageExecutor, StageOutput};
