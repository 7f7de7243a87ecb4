//! 集成测试用的协作方替身
//!
//! 所有替身都记录调用，并可以在调用中推进（暂停的）tokio 时钟来模拟耗时。

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quiz_pipeline::config::{Config, ModelPreferences};
use quiz_pipeline::error::CallError;
use quiz_pipeline::models::{
    AnalysisOutput, ExecutionResult, FetchedContent, SessionReport, SessionState, Submission,
    SubmitOutcome, Verdict,
};
use quiz_pipeline::services::{
    Analyzer, CodeExecutor, Collaborators, Fetcher, Submitter, Verifier,
};

pub const SUBMIT_URL: &str = "https://quiz.example.com/submit";

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// 测试配置：不写日志文件，analyze 有主备两个后端
pub fn test_config() -> Config {
    Config {
        output_log_file: String::new(),
        model_preferences: ModelPreferences {
            fetch: vec!["browser".to_string()],
            analyze: vec!["primary".to_string(), "fallback".to_string()],
            verify: vec!["reviewer".to_string()],
            execute: vec!["python3".to_string()],
            submit: vec!["http".to_string()],
        },
        ..Config::default()
    }
}

async fn burn(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::advance(duration).await;
    }
}

// ========== fetch ==========

#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub cost: Duration,
    pub broken: bool,
}

impl FakeFetcher {
    pub fn costing(cost: Duration) -> Self {
        Self {
            cost,
            ..Default::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        _timeout: Duration,
        _backend: &str,
    ) -> Result<FetchedContent, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        burn(self.cost).await;
        if self.broken {
            return Err(CallError::Fetch(format!("{} 返回 502", url)));
        }
        Ok(FetchedContent {
            url: url.to_string(),
            question: format!("What is the answer for {}?", url),
            submit_url: Some(SUBMIT_URL.to_string()),
            ..Default::default()
        })
    }
}

// ========== analyze ==========

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeCall {
    pub backend: String,
    pub feedback: Option<String>,
}

/// 按顺序返回预设答案；预设用完后返回 "answer-N"
#[derive(Default)]
pub struct ScriptedAnalyzer {
    pub calls: Mutex<Vec<AnalyzeCall>>,
    pub answers: Mutex<VecDeque<AnalysisOutput>>,
    pub failing_backends: Vec<String>,
    pub hanging: bool,
    pub cost: Duration,
}

impl ScriptedAnalyzer {
    pub fn answering(answers: Vec<AnalysisOutput>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Default::default()
        }
    }

    pub fn failing_on(backends: &[&str]) -> Self {
        Self {
            failing_backends: backends.iter().map(|b| b.to_string()).collect(),
            ..Default::default()
        }
    }

    /// 每次调用都不返回，只能被超时打断
    pub fn hanging() -> Self {
        Self {
            hanging: true,
            ..Default::default()
        }
    }

    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }

    pub fn calls(&self) -> Vec<AnalyzeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn backends(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.backend).collect()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _content: &FetchedContent,
        prior_feedback: Option<&str>,
        _timeout: Duration,
        backend: &str,
    ) -> Result<AnalysisOutput, CallError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(AnalyzeCall {
                backend: backend.to_string(),
                feedback: prior_feedback.map(str::to_string),
            });
            calls.len()
        };

        if self.hanging {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }
        burn(self.cost).await;

        if self.failing_backends.iter().any(|b| b == backend) {
            return Err(CallError::Analyze(format!("{} 返回 503", backend)));
        }

        let scripted = self.answers.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| {
            AnalysisOutput::answer(json!(format!("answer-{}", call_number)))
        }))
    }
}

// ========== verify ==========

/// 按顺序返回预设结论；预设用完后返回 `fallback`
pub struct ScriptedVerifier {
    pub calls: Mutex<Vec<JsonValue>>,
    pub backends: Mutex<Vec<String>>,
    pub verdicts: Mutex<VecDeque<Verdict>>,
    pub fallback: Option<Verdict>,
    pub cost: Duration,
}

impl ScriptedVerifier {
    pub fn scripted(verdicts: Vec<Verdict>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            backends: Mutex::new(Vec::new()),
            verdicts: Mutex::new(verdicts.into()),
            fallback: Some(Verdict::Accept),
            cost: Duration::ZERO,
        }
    }

    pub fn always_reject(feedback: &str) -> Self {
        Self {
            fallback: Some(Verdict::Reject {
                feedback: feedback.to_string(),
            }),
            ..Self::scripted(Vec::new())
        }
    }

    /// 所有调用都失败
    pub fn unavailable() -> Self {
        Self {
            fallback: None,
            ..Self::scripted(Vec::new())
        }
    }

    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn backends(&self) -> Vec<String> {
        self.backends.lock().unwrap().clone()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(
        &self,
        _content: &FetchedContent,
        candidate: &AnalysisOutput,
        _timeout: Duration,
        backend: &str,
    ) -> Result<Verdict, CallError> {
        self.calls.lock().unwrap().push(candidate.answer.clone());
        self.backends.lock().unwrap().push(backend.to_string());
        burn(self.cost).await;

        let scripted = self.verdicts.lock().unwrap().pop_front();
        scripted
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| CallError::Verify("reviewer 不可用".to_string()))
    }
}

// ========== execute ==========

/// stdout 为 None 时执行失败
#[derive(Default)]
pub struct FakeExecutor {
    pub calls: Mutex<Vec<String>>,
    pub stdout: Option<String>,
}

impl FakeExecutor {
    pub fn printing(stdout: &str) -> Self {
        Self {
            stdout: Some(stdout.to_string()),
            ..Default::default()
        }
    }

    pub fn crashing() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeExecutor for FakeExecutor {
    async fn execute(
        &self,
        code: &str,
        _content: &FetchedContent,
        _timeout: Duration,
        _backend: &str,
    ) -> Result<ExecutionResult, CallError> {
        self.calls.lock().unwrap().push(code.to_string());
        match &self.stdout {
            Some(stdout) => Ok(ExecutionResult {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
            None => Err(CallError::Execution("Traceback: ZeroDivisionError".to_string())),
        }
    }
}

// ========== submit ==========

/// 按顺序返回预设回执；预设用完后返回"正确、没有下一题"
#[derive(Default)]
pub struct RecordingSubmitter {
    pub submissions: Mutex<Vec<Submission>>,
    pub replies: Mutex<VecDeque<Result<SubmitOutcome, CallError>>>,
    pub broken: bool,
}

impl RecordingSubmitter {
    pub fn replying(replies: Vec<Result<SubmitOutcome, CallError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<JsonValue> {
        self.submissions()
            .into_iter()
            .map(|submission| submission.answer)
            .collect()
    }
}

pub fn next(url: &str) -> Result<SubmitOutcome, CallError> {
    Ok(SubmitOutcome {
        accepted: true,
        reason: None,
        next_url: Some(url.to_string()),
    })
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(
        &self,
        submission: &Submission,
        _timeout: Duration,
        _backend: &str,
    ) -> Result<SubmitOutcome, CallError> {
        self.submissions.lock().unwrap().push(submission.clone());
        if self.broken {
            return Err(CallError::Submit("HTTP 500".to_string()));
        }
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(SubmitOutcome {
                accepted: true,
                ..Default::default()
            })
        })
    }
}

// ========== 组装 ==========

pub struct Fakes {
    pub fetcher: Arc<FakeFetcher>,
    pub analyzer: Arc<ScriptedAnalyzer>,
    pub verifier: Arc<ScriptedVerifier>,
    pub executor: Arc<FakeExecutor>,
    pub submitter: Arc<RecordingSubmitter>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            fetcher: Arc::new(FakeFetcher::default()),
            analyzer: Arc::new(ScriptedAnalyzer::default()),
            verifier: Arc::new(ScriptedVerifier::scripted(Vec::new())),
            executor: Arc::new(FakeExecutor::printing("42")),
            submitter: Arc::new(RecordingSubmitter::default()),
        }
    }
}

impl Fakes {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            fetcher: self.fetcher.clone(),
            analyzer: self.analyzer.clone(),
            verifier: self.verifier.clone(),
            executor: self.executor.clone(),
            submitter: self.submitter.clone(),
        }
    }
}

/// 状态序列必须从 RECEIVED 开始、首尾相接，并且每一步都合法
pub fn assert_legal_transitions(report: &SessionReport) {
    let transitions = &report.transitions;
    assert!(!transitions.is_empty(), "会话没有任何状态迁移");
    assert_eq!(transitions[0].from, SessionState::Received);
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
    }
    for record in transitions {
        assert!(
            record.from.can_transition_to(record.to),
            "非法迁移 {} -> {}",
            record.from,
            record.to
        );
    }
    assert_eq!(transitions.last().map(|t| t.to), Some(report.final_state));
    assert!(report.final_state.is_terminal());
}

pub fn states(report: &SessionReport) -> Vec<SessionState> {
    let mut states = vec![SessionState::Received];
    states.extend(report.transitions.iter().map(|t| t.to));
    states
}
