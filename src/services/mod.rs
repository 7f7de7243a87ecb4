pub mod code_runner;
pub mod collaborators;
pub mod llm_service;
pub mod page_fetcher;
pub mod submit_client;

pub use code_runner::CodeRunner;
pub use collaborators::{Analyzer, CodeExecutor, Collaborators, Fetcher, Submitter, Verifier};
pub use llm_service::LlmService;
pub use page_fetcher::PageFetcher;
pub use submit_client::SubmitClient;
