//! 时间预算 - 基础设施层
//!
//! 每个会话持有自己的 TimeBudget，显式传给每一次阶段调用。
//! 截止时间在构造时确定，任何阶段都不能修改它。
//!
//! 时间线：
//!
//! ```text
//! |<------------- 工作时间 ------------->|<-- 提交预留 -->|
//! start                                                   deadline
//! ```

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BudgetSettings;
use crate::models::Stage;

/// 阶段边界记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageMark {
    pub stage: Stage,
    pub elapsed: Duration,
}

/// 预算快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub elapsed: Duration,
    pub remaining: Duration,
}

/// 时间预算
///
/// 不变量：`remaining_total() + elapsed() == total`（截止前）。
/// 提交预留在任何压力下都不会分配给其他阶段。
#[derive(Debug, Clone)]
pub struct TimeBudget {
    started: Instant,
    settings: BudgetSettings,
    /// 需要分摊工作时间的阶段（按执行顺序）
    plan: Vec<Stage>,
    marks: Vec<StageMark>,
}

impl TimeBudget {
    /// 从现在开始计时
    pub fn new(settings: BudgetSettings) -> Self {
        Self::starting_at(Instant::now(), settings)
    }

    /// 从指定时刻开始计时（会话在排队时预算已经开始消耗）
    pub fn starting_at(started: Instant, settings: BudgetSettings) -> Self {
        Self {
            started,
            settings,
            plan: Stage::WORK.to_vec(),
            marks: Vec::new(),
        }
    }

    /// 指定参与分摊的阶段，例如关闭校验时去掉 verify
    pub fn with_plan(mut self, plan: &[Stage]) -> Self {
        self.plan = plan
            .iter()
            .copied()
            .filter(|stage| *stage != Stage::Submit)
            .collect();
        self
    }

    pub fn total(&self) -> Duration {
        self.settings.total
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 距截止时间的剩余时间，最小为 0
    pub fn remaining_total(&self) -> Duration {
        self.settings.total.saturating_sub(self.elapsed())
    }

    /// 扣除提交预留后的剩余工作时间，最小为 0
    pub fn remaining_for_work(&self) -> Duration {
        self.remaining_total()
            .saturating_sub(self.settings.submission_reserve)
    }

    /// 工作时间是否已用尽
    ///
    /// 为 true 时所有重试和修正循环必须立即停止，转入最终提交。
    pub fn is_expired(&self) -> bool {
        self.remaining_for_work().is_zero()
    }

    /// 为一次阶段调用分配超时
    ///
    /// `min(cap, remaining_for_work / 剩余阶段数)`，再保证不低于最短超时
    /// （最短超时本身不超过剩余工作时间）。submit 走 `allocate_submit`。
    pub fn allocate(&self, stage: Stage, cap: Duration) -> Duration {
        if stage == Stage::Submit {
            return self.allocate_submit(cap);
        }

        let available = self.remaining_for_work();
        let share = available / self.stages_ahead(stage);
        let floor = self.settings.min_call_timeout.min(available);
        cap.min(share.max(floor))
    }

    /// 为提交调用分配超时
    ///
    /// 可以使用提交预留。即便已经超过截止时间，也会给出一个最短的宽限超时，
    /// 保证提交"尽力而为、从不跳过"。
    pub fn allocate_submit(&self, cap: Duration) -> Duration {
        cap.min(self.remaining_total())
            .max(self.settings.final_submit_grace)
    }

    /// 记录阶段边界
    pub fn record(&mut self, stage: Stage) {
        let elapsed = self.elapsed();
        self.marks.push(StageMark { stage, elapsed });
    }

    pub fn marks(&self) -> &[StageMark] {
        &self.marks
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let elapsed = self.elapsed();
        BudgetSnapshot {
            elapsed,
            remaining: self.settings.total.saturating_sub(elapsed),
        }
    }

    /// 包括当前阶段在内，计划中还剩几个阶段
    fn stages_ahead(&self, stage: Stage) -> u32 {
        match self.plan.iter().position(|s| *s == stage) {
            Some(index) => (self.plan.len() - index) as u32,
            None => 1,
        }
    }
}
