//! 协作方接口 - 业务能力层
//!
//! 编排核心只通过这些 trait 与外部交互。每个方法都接收本次调用的超时
//! 和路由器选出的后端标识，超时由调用方强制执行。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CallError;
use crate::models::{
    AnalysisOutput, ExecutionResult, FetchedContent, Submission, SubmitOutcome, Verdict,
};

/// 抓取题目页面（含渲染）
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        backend: &str,
    ) -> Result<FetchedContent, CallError>;
}

/// 求解题目
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// `prior_feedback` 为上一轮校验的拒绝反馈，第一轮为 None
    async fn analyze(
        &self,
        content: &FetchedContent,
        prior_feedback: Option<&str>,
        timeout: Duration,
        backend: &str,
    ) -> Result<AnalysisOutput, CallError>;
}

/// 校验答案
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        content: &FetchedContent,
        candidate: &AnalysisOutput,
        timeout: Duration,
        backend: &str,
    ) -> Result<Verdict, CallError>;
}

/// 在沙箱中执行生成的代码
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        content: &FetchedContent,
        timeout: Duration,
        backend: &str,
    ) -> Result<ExecutionResult, CallError>;
}

/// 提交答案
///
/// 远端按内容幂等：同一答案提交两次是可以接受的。
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(
        &self,
        submission: &Submission,
        timeout: Duration,
        backend: &str,
    ) -> Result<SubmitOutcome, CallError>;
}

/// 一组协作方，所有会话共享
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub analyzer: Arc<dyn Analyzer>,
    pub verifier: Arc<dyn Verifier>,
    pub executor: Arc<dyn CodeExecutor>,
    pub submitter: Arc<dyn Submitter>,
}
