//! 流水线编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **会话生命周期**：接受请求、排队、运行、归档
//! 2. **状态机**：RECEIVED → FETCHING → REFINING → EXECUTING → SUBMITTING → (CHAINING | DONE)，
//!    工作时间用尽时经 TIMED_OUT 转入最终提交
//! 3. **并发控制**：Semaphore 限制同时运行的会话数，排队时间计入预算
//! 4. **状态发布**：每次迁移都记录日志并写入 SessionRegistry
//!
//! ## 设计特点
//!
//! - 每个会话独占自己的 TimeBudget 和 SessionRouters，会话之间不共享可变状态
//! - 协作方（fetcher / analyzer / ...）只读共享
//! - 提交从不跳过：截止时间过后仍会用最好的答案（或占位答案）提交一次

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppResult, StageError};
use crate::infrastructure::{SessionRouters, TimeBudget};
use crate::models::{
    Attempt, CallerIdentity, Decision, FetchedContent, Session, SessionId, SessionReport,
    SessionState, Stage, StatusSnapshot, Submission, SubmitOutcome, TransitionRecord,
};
use crate::orchestrator::session_registry::SessionRegistry;
use crate::services::Collaborators;
use crate::utils::logging::{self, format_duration, truncate_text};
use crate::workflow::{AttemptCtx, RefinementLoop, StageExecutor};

/// 流水线编排器
///
/// 所有会话共享一个实例。`start_session` 需要 `Arc<Self>`，
/// 因为会话在后台任务中运行。
pub struct PipelineOrchestrator {
    config: Arc<Config>,
    collaborators: Collaborators,
    registry: Arc<SessionRegistry>,
    permits: Arc<Semaphore>,
}

impl PipelineOrchestrator {
    /// 创建编排器，配置无效时返回错误
    pub fn new(config: Config, collaborators: Collaborators) -> AppResult<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_sessions));
        let registry = Arc::new(SessionRegistry::with_retention(config.max_archived_sessions));
        Ok(Self {
            config: Arc::new(config),
            collaborators,
            registry,
            permits,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 接受一个会话并在后台运行，立即返回会话ID
    pub async fn start_session(
        self: &Arc<Self>,
        url: impl Into<String>,
        caller: CallerIdentity,
    ) -> SessionId {
        let url = url.into();
        let accepted_at = Instant::now();
        let id = self.accept(&url, &caller).await;

        let this = Arc::clone(self);
        let session_id = id.clone();
        tokio::spawn(async move {
            this.drive(session_id, url, caller, accepted_at).await;
        });
        id
    }

    /// 接受一个会话并等待它结束
    pub async fn run_session(
        &self,
        url: impl Into<String>,
        caller: CallerIdentity,
    ) -> SessionReport {
        let url = url.into();
        let accepted_at = Instant::now();
        let id = self.accept(&url, &caller).await;
        self.drive(id, url, caller, accepted_at).await
    }

    /// 当前状态快照；没有新的迁移时多次调用结果相同
    pub async fn get_status(&self, id: &SessionId) -> AppResult<StatusSnapshot> {
        self.registry.get_status(id).await
    }

    /// 会话归档报告，会话未结束时返回 None
    pub async fn get_report(&self, id: &SessionId) -> AppResult<Option<SessionReport>> {
        self.registry.get_report(id).await
    }

    pub async fn list_sessions(&self, email: Option<&str>) -> Vec<StatusSnapshot> {
        self.registry.list_sessions(email).await
    }

    async fn accept(&self, url: &str, caller: &CallerIdentity) -> SessionId {
        let id = SessionId::generate();
        self.registry
            .register(&id, &caller.email, self.config.budget_settings().total)
            .await;
        info!("📥 接受会话 {} | {} | {}", id, caller.email, url);
        id
    }

    async fn drive(
        &self,
        id: SessionId,
        url: String,
        caller: CallerIdentity,
        accepted_at: Instant,
    ) -> SessionReport {
        // 信号量从不关闭，acquire 失败时不限流继续运行
        let _permit = self.permits.acquire().await.ok();

        let session = Session::new(id, url, caller, self.config.budget_settings().total);
        SessionRunner::new(
            &self.config,
            &self.collaborators,
            &self.registry,
            session,
            accepted_at,
        )
        .run()
        .await
    }
}

/// 为一个会话（或一道链式题目）创建预算
fn new_budget(config: &Config, started: Instant) -> TimeBudget {
    let plan: Vec<Stage> = Stage::WORK
        .iter()
        .copied()
        .filter(|stage| config.verification_enabled || *stage != Stage::Verify)
        .collect();
    TimeBudget::starting_at(started, config.budget_settings()).with_plan(&plan)
}

/// 单个会话的运行时
///
/// 持有会话的全部可变状态，运行结束后归档为 SessionReport。
struct SessionRunner<'a> {
    config: &'a Config,
    collaborators: &'a Collaborators,
    registry: &'a SessionRegistry,
    executor: StageExecutor,
    session: Session,
    budget: TimeBudget,
    routers: SessionRouters,
    accepted_at: Instant,
    timed_out: bool,
}

impl<'a> SessionRunner<'a> {
    fn new(
        config: &'a Config,
        collaborators: &'a Collaborators,
        registry: &'a SessionRegistry,
        session: Session,
        accepted_at: Instant,
    ) -> Self {
        Self {
            config,
            collaborators,
            registry,
            executor: StageExecutor::from_config(config),
            session,
            budget: new_budget(config, accepted_at),
            routers: SessionRouters::from_preferences(&config.model_preferences),
            accepted_at,
            timed_out: false,
        }
    }

    async fn run(mut self) -> SessionReport {
        let mut url = self.session.url.clone();
        while let Some(next_url) = self.run_hop(&url).await {
            url = next_url;
        }
        self.finish().await
    }

    /// 处理一道题，返回需要继续处理的下一题 URL
    ///
    /// 返回 None 时会话已经进入终止状态。
    async fn run_hop(&mut self, url: &str) -> Option<String> {
        let ctx = AttemptCtx::new(self.session.id.clone(), self.session.chain_depth, url);
        self.session.attempts.push(Attempt::new(url));
        info!("{} 🚀 开始处理: {}", ctx, url);

        // ========== FETCHING ==========
        let content = if self.check_deadline().await {
            FetchedContent::placeholder(url)
        } else {
            self.transition(SessionState::Fetching).await;
            match self.fetch(url).await {
                Ok(content) => content,
                Err(e) if e.is_deadline() => {
                    self.enter_timed_out().await;
                    FetchedContent::placeholder(url)
                }
                Err(e) => {
                    error!("{} ❌ 无法获取题目: {}", ctx, e);
                    self.fail(format!("抓取失败: {}", e)).await;
                    return None;
                }
            }
        };
        if let Some(attempt) = self.session.active_attempt() {
            if !content.question.trim().is_empty() {
                attempt.question = Some(truncate_text(&content.question, 200));
            }
        }

        // ========== REFINING ==========
        if !self.check_deadline().await {
            self.transition(SessionState::Refining).await;
            if self.refine(&ctx, &content).await == Decision::Timeout {
                self.enter_timed_out().await;
            }
        }

        // ========== EXECUTING ==========
        let code = self
            .session
            .attempts
            .last()
            .and_then(|attempt| attempt.code.clone());
        if let Some(code) = code {
            if !self.check_deadline().await {
                self.transition(SessionState::Executing).await;
                self.execute(&ctx, &code, &content).await;
            }
        }

        // ========== SUBMITTING ==========
        self.check_deadline().await;
        self.transition(SessionState::Submitting).await;
        let outcome = match self.submit(&ctx, &content).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} ❌ 提交失败: {}", ctx, e);
                self.fail(format!("提交失败: {}", e)).await;
                return None;
            }
        };
        if let Some(attempt) = self.session.active_attempt() {
            attempt.submission = Some(outcome.clone());
        }

        if self.timed_out {
            self.transition(SessionState::TimedOut).await;
            return None;
        }

        // ========== CHAINING ==========
        match outcome.next_url {
            Some(next_url) if self.can_chain() => {
                info!("{} 🔗 进入下一题: {}", ctx, next_url);
                self.transition(SessionState::Chaining).await;
                self.session.chain_depth += 1;
                if !self.config.shared_chain_budget {
                    self.budget = new_budget(self.config, Instant::now());
                }
                Some(next_url)
            }
            Some(next_url) => {
                warn!(
                    "{} ⚠️ 剩余时间 {} 不足，不再进入下一题: {}",
                    ctx,
                    format_duration(self.budget.remaining_total()),
                    next_url
                );
                self.transition(SessionState::Done).await;
                None
            }
            None => {
                self.transition(SessionState::Done).await;
                None
            }
        }
    }

    async fn fetch(&mut self, url: &str) -> Result<FetchedContent, StageError> {
        let fetcher = self.collaborators.fetcher.as_ref();
        self.executor
            .run(
                Stage::Fetch,
                &mut self.routers.fetch,
                &mut self.budget,
                move |backend, timeout| async move { fetcher.fetch(url, timeout, &backend).await },
            )
            .await
            .map(|output| output.value)
    }

    async fn refine(&mut self, ctx: &AttemptCtx, content: &FetchedContent) -> Decision {
        let collaborators = self.collaborators;
        let refinement = RefinementLoop::new(
            &self.executor,
            collaborators.analyzer.as_ref(),
            collaborators.verifier.as_ref(),
            self.config.verification_enabled,
        );
        let max_rounds = self.config.max_refinement_rounds;
        let Some(attempt) = self.session.attempts.last_mut() else {
            return Decision::Reject;
        };
        refinement
            .run(
                ctx,
                content,
                attempt,
                &mut self.routers,
                &mut self.budget,
                max_rounds,
            )
            .await
    }

    /// 执行生成的代码；成功且有输出时用输出替换答案
    async fn execute(&mut self, ctx: &AttemptCtx, code: &str, content: &FetchedContent) {
        let code_executor = self.collaborators.executor.as_ref();
        let result = self
            .executor
            .run(
                Stage::Execute,
                &mut self.routers.execute,
                &mut self.budget,
                move |backend, timeout| async move {
                    code_executor.execute(code, content, timeout, &backend).await
                },
            )
            .await;

        match result {
            Ok(output) => match output.value.extract_answer() {
                Some(answer) => {
                    info!(
                        "{} ▶️ 代码输出答案: {}",
                        ctx,
                        truncate_text(&answer.to_string(), 80)
                    );
                    if let Some(attempt) = self.session.active_attempt() {
                        attempt.answer = Some(answer);
                    }
                }
                None => warn!("{} ⚠️ 代码没有输出，保留分析答案", ctx),
            },
            Err(e) if e.is_deadline() => self.enter_timed_out().await,
            Err(e) => warn!("{} ⚠️ 代码执行失败，保留分析答案: {}", ctx, e),
        }
    }

    /// 最终提交：没有任何答案时使用占位答案
    async fn submit(
        &mut self,
        ctx: &AttemptCtx,
        content: &FetchedContent,
    ) -> Result<SubmitOutcome, StageError> {
        let placeholder = JsonValue::String(self.config.placeholder_answer.clone());
        let Some(attempt) = self.session.attempts.last_mut() else {
            return Err(StageError::StageFailed {
                stage: Stage::Submit,
                calls: 0,
                last_error: None,
            });
        };
        let answer = match &attempt.answer {
            Some(answer) => answer.clone(),
            None => {
                warn!("{} ⚠️ 没有可用答案，提交占位答案", ctx);
                attempt.answer = Some(placeholder.clone());
                placeholder
            }
        };

        let submission = Submission {
            session_id: self.session.id.to_string(),
            quiz_url: ctx.url.clone(),
            submit_url: content.submit_url.clone(),
            answer,
            caller: self.session.caller.clone(),
        };
        info!(
            "{} 📤 提交答案: {}",
            ctx,
            truncate_text(&submission.answer.to_string(), 80)
        );

        let submitter = self.collaborators.submitter.as_ref();
        let submission = &submission;
        self.executor
            .run_final(
                Stage::Submit,
                &mut self.routers.submit,
                &mut self.budget,
                move |backend, timeout| async move {
                    submitter.submit(submission, timeout, &backend).await
                },
            )
            .await
            .map(|output| output.value)
    }

    fn can_chain(&self) -> bool {
        !self.config.shared_chain_budget || self.budget.remaining_total() > self.config.chain_floor()
    }

    /// 在阶段边界检查工作时间，用尽时进入 TIMED_OUT
    ///
    /// 返回会话是否已经超时。
    async fn check_deadline(&mut self) -> bool {
        if !self.timed_out && self.budget.is_expired() {
            self.enter_timed_out().await;
        }
        self.timed_out
    }

    async fn enter_timed_out(&mut self) {
        if self.timed_out {
            return;
        }
        self.timed_out = true;
        warn!(
            "[会话 {}] ⏰ 工作时间用尽，转入最终提交",
            self.session.id
        );
        self.transition(SessionState::TimedOut).await;
    }

    async fn fail(&mut self, reason: String) {
        self.session.failure = Some(reason);
        self.transition(SessionState::Failed).await;
    }

    /// 状态迁移：记录、打日志、发布快照
    async fn transition(&mut self, next: SessionState) {
        let from = self.session.state;
        if !from.can_transition_to(next) {
            error!(
                "[会话 {}] 非法状态迁移 {} → {}",
                self.session.id, from, next
            );
        }

        let remaining = self.budget.remaining_total();
        let elapsed = self.accepted_at.elapsed();
        info!(
            "[会话 {}] 🔀 {} → {} | 已用 {} | 剩余 {}",
            self.session.id,
            from,
            next,
            format_duration(elapsed),
            format_duration(remaining)
        );

        let record = TransitionRecord {
            from,
            to: next,
            hop: self.session.chain_depth,
            elapsed_ms: elapsed.as_millis() as u64,
            remaining_ms: remaining.as_millis() as u64,
        };
        self.session.transitions.push(record);
        self.session.state = next;

        self.registry
            .publish(StatusSnapshot {
                session_id: self.session.id.clone(),
                state: next,
                chain_depth: self.session.chain_depth,
                elapsed_ms: elapsed.as_millis() as u64,
                remaining_ms: remaining.as_millis() as u64,
            })
            .await;
    }

    /// 归档会话
    async fn finish(self) -> SessionReport {
        let report = self.session.into_report(self.accepted_at.elapsed());
        logging::print_session_report(&report);

        if !self.config.output_log_file.is_empty() {
            if let Err(e) = logging::append_session_summary(&self.config.output_log_file, &report)
            {
                warn!("⚠️ 写入会话日志失败: {}", e);
            }
        }

        self.registry.complete(report.clone()).await;
        report
    }
}
