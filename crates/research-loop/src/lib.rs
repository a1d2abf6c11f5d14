//! research-loop: plan, research, write and grade orchestration for
//! LLM-driven financial research
//!
//! - `ResearchState`: per-run state with replace/accumulate merge policies
//! - `Stage` trait and the four built-in stages
//! - `Router`: score threshold and loop cap
//! - `Orchestrator`: drives a run with timeouts, retries and cancellation
//! - `ResultsStore`: queued/running/completed/failed records with expiry
//! - `RunLauncher` and `DailySchedule`: background and scheduled runs
//!
//! # Usage
//!
//! ```rust,ignore
//! use rig::providers::ollama;
//! use rig::client::{CompletionClient, ProviderClient};
//! use research_loop::{EngineConfig, Orchestrator, RigAgentAdapter, RunId, StageSet, TavilyRetriever};
//!
//! let agent = ollama::Client::from_env().agent("llama3.2").build();
//! let llm = Arc::new(RigAgentAdapter::new(agent));
//! let retriever = Arc::new(TavilyRetriever::from_env()?);
//!
//! let orchestrator = Orchestrator::new(
//!     StageSet::from_services(llm, retriever),
//!     EngineConfig::default(),
//! )?;
//! let report = orchestrator.run(RunId::generate(), "Analyze NVDA").await;
//! println!("{:?}: {}", report.outcome, report.state.score);
//! ```

pub mod engine;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod retrieval;
pub mod router;
pub mod stages;
pub mod state;
pub mod store;
pub mod trigger;

// Re-exports for convenience
pub use engine::{
    CancelToken, EngineConfig, Orchestrator, Phase, RetryPolicy, RunEvent, RunEventStream, RunId,
    RunOutcome, RunReport,
};
pub use error::{ResearchError, ServiceError};
pub use llm::{LLMConfig, LLMProvider, LLMResponse, Message, RigAgentAdapter, Role, TokenUsage};
pub use retrieval::{Fragment, RetrievalQuery, Retriever, TavilyError, TavilyRetriever};
pub use router::{HaltReason, RouteDecision, Router, RouterConfig};
pub use stages::{GradeStage, PlanStage, ResearchStage, Stage, StageKind, StageSet, WriteStage};
pub use state::{Field, FieldValue, MergePolicy, ResearchState, StateUpdate};
pub use store::{
    create_store, FileStore, MemoryStore, RecordUpdate, ResultsStore, RunRecord, RunStatus,
    StoreConfig, DEFAULT_RETENTION,
};
pub use trigger::{DailySchedule, ResearchRequest, RunLauncher, Submission};
