//! 会话与尝试
//!
//! 一个 Session 对应一次入站请求，可能跨越多个链式题目；
//! 每个题目对应一个 Attempt。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::Display;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{CallerIdentity, SubmitOutcome, Verdict};

/// 会话 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 会话状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Received,
    Fetching,
    Refining,
    Executing,
    Submitting,
    Chaining,
    Done,
    Failed,
    TimedOut,
}

impl SessionState {
    /// 终止状态
    ///
    /// `TimedOut` 之后仍会进入一次 `Submitting`，因此它同时是中间状态。
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed | SessionState::TimedOut
        )
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if matches!(next, Failed) {
            return !matches!(self, Done | Failed);
        }
        match self {
            Received => matches!(next, Fetching | TimedOut),
            Fetching => matches!(next, Refining | TimedOut),
            Refining => matches!(next, Executing | Submitting | TimedOut),
            Executing => matches!(next, Submitting | TimedOut),
            Submitting => matches!(next, Chaining | Done | TimedOut),
            Chaining => matches!(next, Fetching | TimedOut),
            TimedOut => matches!(next, Submitting),
            Done | Failed => false,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Received => "RECEIVED",
            SessionState::Fetching => "FETCHING",
            SessionState::Refining => "REFINING",
            SessionState::Executing => "EXECUTING",
            SessionState::Submitting => "SUBMITTING",
            SessionState::Chaining => "CHAINING",
            SessionState::Done => "DONE",
            SessionState::Failed => "FAILED",
            SessionState::TimedOut => "TIMED_OUT",
        };
        f.write_str(name)
    }
}

/// 一次尝试的最终决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    Timeout,
}

/// 单个题目的一次完整处理
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub url: String,
    /// 抓取到的题干（预览）
    pub question: Option<String>,
    pub answer: Option<JsonValue>,
    pub code: Option<String>,
    pub verdicts: Vec<Verdict>,
    /// analyze 调用轮数
    pub rounds: usize,
    pub decision: Option<Decision>,
    pub submission: Option<SubmitOutcome>,
}

impl Attempt {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            question: None,
            answer: None,
            code: None,
            verdicts: Vec::new(),
            rounds: 0,
            decision: None,
            submission: None,
        }
    }

    /// 提交回执中给出的下一题 URL
    pub fn next_url(&self) -> Option<&str> {
        self.submission
            .as_ref()
            .and_then(|outcome| outcome.next_url.as_deref())
    }
}

/// 一次状态迁移记录
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: SessionState,
    pub to: SessionState,
    pub hop: usize,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
}

/// 对外暴露的状态快照
///
/// 只在状态迁移时更新，所以没有新事件时多次读取结果不变。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    pub chain_depth: usize,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
}

/// 会话
///
/// 由 PipelineOrchestrator 独占，终止后归档为 SessionReport。
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub url: String,
    pub caller: CallerIdentity,
    pub created_at: DateTime<Local>,
    pub total_budget: Duration,
    pub state: SessionState,
    pub chain_depth: usize,
    pub attempts: Vec<Attempt>,
    pub transitions: Vec<TransitionRecord>,
    pub failure: Option<String>,
}

impl Session {
    pub fn new(
        id: SessionId,
        url: impl Into<String>,
        caller: CallerIdentity,
        total_budget: Duration,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            caller,
            created_at: Local::now(),
            total_budget,
            state: SessionState::Received,
            chain_depth: 0,
            attempts: Vec::new(),
            transitions: Vec::new(),
            failure: None,
        }
    }

    /// 当前活动的尝试
    pub fn active_attempt(&mut self) -> Option<&mut Attempt> {
        self.attempts.last_mut()
    }

    pub fn into_report(self, elapsed: Duration) -> SessionReport {
        SessionReport {
            session_id: self.id,
            url: self.url,
            email: self.caller.email,
            created_at: self.created_at,
            final_state: self.state,
            chain_depth: self.chain_depth,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts: self.attempts,
            transitions: self.transitions,
            failure: self.failure,
        }
    }
}

/// 会话归档
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub url: String,
    pub email: String,
    pub created_at: DateTime<Local>,
    pub final_state: SessionState,
    pub chain_depth: usize,
    pub elapsed_ms: u64,
    pub attempts: Vec<Attempt>,
    pub transitions: Vec<TransitionRecord>,
    pub failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions_are_legal() {
        let path = [Received, Fetching, Refining, Executing, Submitting, Chaining, Fetching];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(Submitting.can_transition_to(Done));
        assert!(Refining.can_transition_to(Submitting));
    }

    #[test]
    fn test_timed_out_must_go_through_submitting() {
        assert!(Refining.can_transition_to(TimedOut));
        assert!(TimedOut.can_transition_to(Submitting));
        assert!(!TimedOut.can_transition_to(Done));
        assert!(!TimedOut.can_transition_to(Chaining));
        assert!(Submitting.can_transition_to(TimedOut));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_states() {
        for state in [Received, Fetching, Refining, Executing, Submitting, Chaining, TimedOut] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Fetching));
    }

    #[test]
    fn test_executing_cannot_skip_back() {
        assert!(!Executing.can_transition_to(Refining));
        assert!(!Fetching.can_transition_to(Submitting));
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::from("abc-123");
        assert_eq!(id.to_string(), "abc-123");
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_report_serializes_with_timestamp() {
        let session = Session::new(
            SessionId::from("abc-123"),
            "https://quiz.example.com/q1",
            CallerIdentity::new("a@example.com", "s3cret"),
            Duration::from_secs(180),
        );
        let report = session.into_report(Duration::from_millis(1500));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
        assert_eq!(json["email"], "a@example.com");
        assert!(json["created_at"].as_str().is_some());
        assert!(!json.to_string().contains("s3cret"));
    }
}
