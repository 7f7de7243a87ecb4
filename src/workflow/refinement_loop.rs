//! 自我修正循环 - 流程层
//!
//! analyze → verify → (拒绝时带着反馈重新 analyze)，
//! 轮数和时间双重上限，任何一个先到都会结束循环。

use tracing::{info, warn};

use crate::error::{CallError, StageError};
use crate::infrastructure::{SessionRouters, TimeBudget};
use crate::models::{AnalysisOutput, Attempt, Decision, FetchedContent, Stage, Verdict};
use crate::services::{Analyzer, Verifier};
use crate::utils::logging::truncate_text;
use crate::workflow::attempt_ctx::AttemptCtx;
use crate::workflow::stage_executor::StageExecutor;

/// 自我修正循环
///
/// 职责：
/// - 驱动 analyze / verify 的交替调用
/// - 把拒绝反馈传给下一轮 analyze
/// - 把每一轮的结果写入 Attempt
/// - 不决定会话状态迁移（由编排层负责）
pub struct RefinementLoop<'a> {
    executor: &'a StageExecutor,
    analyzer: &'a dyn Analyzer,
    verifier: &'a dyn Verifier,
    verification_enabled: bool,
}

impl<'a> RefinementLoop<'a> {
    pub fn new(
        executor: &'a StageExecutor,
        analyzer: &'a dyn Analyzer,
        verifier: &'a dyn Verifier,
        verification_enabled: bool,
    ) -> Self {
        Self {
            executor,
            analyzer,
            verifier,
            verification_enabled,
        }
    }

    /// 运行修正循环，返回最终决定
    ///
    /// - `Accept`：校验通过，或校验关闭，或校验后端全部不可用
    /// - `Reject`：轮数用尽仍被拒绝，或 analyze 后端全部不可用
    /// - `Timeout`：工作时间用尽
    ///
    /// 无论哪种结果，`attempt.answer` 都保留最近一次成功的 analyze 答案。
    pub async fn run(
        &self,
        ctx: &AttemptCtx,
        content: &FetchedContent,
        attempt: &mut Attempt,
        routers: &mut SessionRouters,
        budget: &mut TimeBudget,
        max_rounds: usize,
    ) -> Decision {
        let mut feedback: Option<String> = None;
        let mut decision = Decision::Reject;

        for round in 1..=max_rounds {
            if budget.is_expired() {
                info!("{} ⏰ 第 {} 轮开始前工作时间已用尽", ctx, round);
                decision = Decision::Timeout;
                break;
            }

            attempt.rounds = round;
            let candidate = match self
                .analyze(content, feedback.as_deref(), routers, budget)
                .await
            {
                Ok(candidate) => candidate,
                Err(e) if e.is_deadline() => {
                    decision = Decision::Timeout;
                    break;
                }
                Err(e) => {
                    warn!("{} ⚠️ analyze 不可用，保留已有答案: {}", ctx, e);
                    decision = Decision::Reject;
                    break;
                }
            };

            info!(
                "{} 💡 第 {} 轮答案: {}",
                ctx,
                round,
                truncate_text(&candidate.answer.to_string(), 80)
            );
            attempt.answer = Some(candidate.answer.clone());
            attempt.code = candidate.code.clone();

            if !self.verification_enabled {
                decision = Decision::Accept;
                break;
            }

            if budget.is_expired() {
                info!("{} ⏰ 校验前工作时间已用尽，使用当前答案", ctx);
                decision = Decision::Timeout;
                break;
            }

            match self.verify(content, &candidate, routers, budget).await {
                Ok(Verdict::Accept) => {
                    info!("{} ✅ 第 {} 轮答案通过校验", ctx, round);
                    attempt.verdicts.push(Verdict::Accept);
                    decision = Decision::Accept;
                    break;
                }
                Ok(verdict @ Verdict::Reject { .. }) => {
                    info!(
                        "{} 🔁 第 {} 轮答案被拒绝: {}",
                        ctx,
                        round,
                        truncate_text(verdict.feedback().unwrap_or_default(), 120)
                    );
                    feedback = verdict.feedback().map(str::to_string);
                    attempt.verdicts.push(verdict);
                    decision = Decision::Reject;
                }
                Err(e) if e.is_deadline() => {
                    decision = Decision::Timeout;
                    break;
                }
                Err(e) => {
                    warn!("{} ⚠️ 校验不可用，接受当前答案: {}", ctx, e);
                    decision = Decision::Accept;
                    break;
                }
            }
        }

        attempt.decision = Some(decision);
        decision
    }

    async fn analyze(
        &self,
        content: &FetchedContent,
        feedback: Option<&str>,
        routers: &mut SessionRouters,
        budget: &mut TimeBudget,
    ) -> Result<AnalysisOutput, StageError> {
        let analyzer = self.analyzer;
        self.executor
            .run(
                Stage::Analyze,
                &mut routers.analyze,
                budget,
                move |backend, timeout| async move {
                    let output = analyzer
                        .analyze(content, feedback, timeout, &backend)
                        .await?;
                    if output.is_empty() {
                        return Err(CallError::malformed(Stage::Analyze, "答案为空"));
                    }
                    Ok(output)
                },
            )
            .await
            .map(|output| output.value)
    }

    async fn verify(
        &self,
        content: &FetchedContent,
        candidate: &AnalysisOutput,
        routers: &mut SessionRouters,
        budget: &mut TimeBudget,
    ) -> Result<Verdict, StageError> {
        let verifier = self.verifier;
        self.executor
            .run(
                Stage::Verify,
                &mut routers.verify,
                budget,
                move |backend, timeout| async move {
                    verifier
                        .verify(content, candidate, timeout, &backend)
                        .await?
                        .ensure_well_formed()
                },
            )
            .await
            .map(|output| output.value)
    }
}
