//! 基础设施层
//!
//! - `TimeBudget` - 会话级时间预算
//! - `ModelRouter` - 阶段级后端路由
//! - `JsExecutor` - 渲染页面上的 JS 执行

pub mod js_executor;
pub mod model_router;
pub mod time_budget;

pub use js_executor::JsExecutor;
pub use model_router::{ModelRouter, SessionRouters};
pub use time_budget::{BudgetSnapshot, StageMark, TimeBudget};
