//! 流水线阶段定义

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// 流水线中的一个阶段
///
/// 顺序即执行顺序：fetch → analyze → verify → execute → submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Analyze,
    Verify,
    Execute,
    Submit,
}

impl Stage {
    /// 所有阶段（按执行顺序）
    pub const ALL: [Stage; 5] = [
        Stage::Fetch,
        Stage::Analyze,
        Stage::Verify,
        Stage::Execute,
        Stage::Submit,
    ];

    /// 消耗工作时间的阶段（submit 只使用提交预留时间）
    pub const WORK: [Stage; 4] = [Stage::Fetch, Stage::Analyze, Stage::Verify, Stage::Execute];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Analyze => "analyze",
            Stage::Verify => "verify",
            Stage::Execute => "execute",
            Stage::Submit => "submit",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
