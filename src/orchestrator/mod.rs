//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话生命周期和状态机，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `pipeline` - 流水线编排器
//! - 接受会话，控制并发数量（Semaphore）
//! - 驱动状态机：抓取 → 修正 → 执行 → 提交 → 链式下一题
//! - 截止时间到达时转入最终提交
//! - 每次状态迁移记录日志并发布快照
//!
//! ### `session_registry` - 会话登记表
//! - 保存状态快照和归档报告
//! - 提供 get_status / get_report / list_sessions 查询
//!
//! ## 层次关系
//!
//! ```text
//! pipeline (处理 Session，跨越多道链式题目)
//!     ↓
//! workflow::RefinementLoop / StageExecutor (处理单道题的各个阶段)
//!     ↓
//! services (能力层：fetch / analyze / verify / execute / submit)
//!     ↓
//! infrastructure (基础设施：TimeBudget / ModelRouter / JsExecutor)
//! ```

pub mod pipeline;
pub mod session_registry;

pub use pipeline::PipelineOrchestrator;
pub use session_registry::SessionRegistry;
