pub mod payload;
pub mod session;
pub mod stage;
pub mod verdict;

pub use payload::{
    AnalysisOutput, CallerIdentity, ExecutionResult, FetchedContent, Submission, SubmitOutcome,
};
pub use session::{
    Attempt, Decision, Session, SessionId, SessionReport, SessionState, StatusSnapshot,
    TransitionRecord,
};
pub use stage::Stage;
pub use verdict::Verdict;
