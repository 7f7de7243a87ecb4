//! 阶段执行器 - 流程层
//!
//! 把一次"阶段调用"包装成：按路由器选后端 → 按预算分配超时 → 调用 →
//! 失败时重试或降级。所有协作方调用都经过这里，外部调用不会被无界等待。

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Config, StageTimeoutCaps};
use crate::error::{CallError, StageError};
use crate::infrastructure::{ModelRouter, TimeBudget};
use crate::models::Stage;

/// 阶段调用成功的结果
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub value: T,
    /// 产生结果的后端
    pub backend: String,
    /// 本阶段一共发起的调用次数（含成功的那次）
    pub calls: usize,
}

/// 何时允许发起下一次调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPolicy {
    /// 工作阶段：工作时间用尽后立即停止
    Work,
    /// 最终提交：第一次调用无条件发起，之后只要还没到截止时间就可以重试
    Final,
}

/// 阶段执行器
///
/// 职责：
/// - 每次调用前检查截止时间
/// - 用 `tokio::time::timeout` 强制执行分配到的超时
/// - 同一后端最多调用 `max_attempts_per_candidate` 次，之后降级到下一个候选
/// - 超时或返回无效时立即降级
/// - 候选全部耗尽时返回 `StageFailed`
#[derive(Debug, Clone)]
pub struct StageExecutor {
    caps: StageTimeoutCaps,
    max_attempts_per_candidate: usize,
}

impl StageExecutor {
    pub fn new(caps: StageTimeoutCaps, max_attempts_per_candidate: usize) -> Self {
        Self {
            caps,
            max_attempts_per_candidate: max_attempts_per_candidate.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.stage_timeout_caps.clone(),
            config.max_retries_per_stage,
        )
    }

    /// 执行一个工作阶段（fetch / analyze / verify / execute）
    ///
    /// `call` 接收路由器选出的后端和本次调用的超时。
    pub async fn run<T, F, Fut>(
        &self,
        stage: Stage,
        router: &mut ModelRouter,
        budget: &mut TimeBudget,
        call: F,
    ) -> Result<StageOutput<T>, StageError>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute(stage, router, budget, CallPolicy::Work, call)
            .await
    }

    /// 执行最终提交
    ///
    /// 即使工作时间已经用尽，也至少发起一次调用。
    pub async fn run_final<T, F, Fut>(
        &self,
        stage: Stage,
        router: &mut ModelRouter,
        budget: &mut TimeBudget,
        call: F,
    ) -> Result<StageOutput<T>, StageError>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        self.execute(stage, router, budget, CallPolicy::Final, call)
            .await
    }

    async fn execute<T, F, Fut>(
        &self,
        stage: Stage,
        router: &mut ModelRouter,
        budget: &mut TimeBudget,
        policy: CallPolicy,
        mut call: F,
    ) -> Result<StageOutput<T>, StageError>
    where
        F: FnMut(String, Duration) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let cap = self.caps.for_stage(stage);
        let mut calls = 0usize;
        let mut failures_on_backend = 0usize;
        let mut last_error: Option<CallError> = None;

        loop {
            let may_call = match policy {
                CallPolicy::Work => !budget.is_expired(),
                CallPolicy::Final => calls == 0 || !budget.remaining_total().is_zero(),
            };
            if !may_call {
                info!("⏰ [{}] 截止时间已到，停止调用 (已调用 {} 次)", stage, calls);
                budget.record(stage);
                return Err(StageError::DeadlineExceeded { stage, last_error });
            }

            let backend = match router.current() {
                Ok(backend) => backend.to_string(),
                Err(exhausted) => {
                    warn!("{}", exhausted);
                    budget.record(stage);
                    return Err(StageError::StageFailed {
                        stage,
                        calls,
                        last_error,
                    });
                }
            };

            let timeout = budget.allocate(stage, cap);
            calls += 1;
            debug!(
                "[{}] 第 {} 次调用，后端 {}，超时 {:?}",
                stage, calls, backend, timeout
            );

            let result = match tokio::time::timeout(timeout, call(backend.clone(), timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(CallError::Timeout { stage, timeout }),
            };

            match result {
                Ok(value) => {
                    budget.record(stage);
                    return Ok(StageOutput {
                        value,
                        backend,
                        calls,
                    });
                }
                Err(e) => {
                    failures_on_backend += 1;
                    warn!(
                        "[{}] 后端 {} 第 {}/{} 次调用失败: {}",
                        stage, backend, failures_on_backend, self.max_attempts_per_candidate, e
                    );
                    let demote = e.demotes_backend()
                        || failures_on_backend >= self.max_attempts_per_candidate;
                    last_error = Some(e);

                    if demote {
                        router.mark_failed(&backend);
                        failures_on_backend = 0;
                    }
                }
            }
        }
    }
}
