//! Scripted services shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use research_loop::prompts;
use research_loop::{
    CancelToken, EngineConfig, Fragment, LLMConfig, LLMProvider, LLMResponse, Message,
    Orchestrator, RetrievalQuery, RetryPolicy, Retriever, ServiceError, StageSet,
};

pub const PLAN_REPLY: &str = "1. Review latest quarterly revenue and margins";

/// Answers by system prompt: a fixed plan, a report echoing the notes, and
/// grades taken from a script (the last grade repeats)
pub struct ScriptedLlm {
    grades: Vec<String>,
    grade_calls: AtomicU32,
    pub write_calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new(grades: &[&str]) -> Self {
        Self {
            grades: grades.iter().map(|g| g.to_string()).collect(),
            grade_calls: AtomicU32::new(0),
            write_calls: AtomicU32::new(0),
        }
    }

    pub fn grade_calls(&self) -> u32 {
        self.grade_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[Message],
        _config: Option<&LLMConfig>,
    ) -> Result<LLMResponse, ServiceError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let user = messages.last().map(|m| m.content.as_str()).unwrap_or("");

        let reply = if system == prompts::PLANNER_SYSTEM {
            PLAN_REPLY.to_string()
        } else if system == prompts::WRITER_SYSTEM {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            format!("## Executive Summary\n\n{}", user)
        } else if system == prompts::GRADER_SYSTEM {
            let call = self.grade_calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.grades[call.min(self.grades.len() - 1)].clone()
        } else {
            return Err(ServiceError::Rejected("unexpected prompt".into()));
        };

        Ok(LLMResponse::new(Message::assistant(reply)))
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

/// Returns one fragment per query quoting the query text.
///
/// Calls numbered `fail_from` and later (1-based) return `Unavailable`.
/// When `cancel_on_first` is set the token fires during the first call.
pub struct ScriptedRetriever {
    calls: AtomicU32,
    fail_from: Option<u32>,
    delay: Option<Duration>,
    cancel_on_first: Option<CancelToken>,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedRetriever {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_from: None,
            delay: None,
            cancel_on_first: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_from(mut self, call: u32) -> Self {
        self.fail_from = Some(call);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn cancelling(mut self, token: CancelToken) -> Self {
        self.cancel_on_first = Some(token);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Fragment>, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.queries.lock().unwrap().push(query.text.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call == 1 {
            if let Some(token) = &self.cancel_on_first {
                token.cancel();
            }
        }
        if matches!(self.fail_from, Some(from) if call >= from) {
            return Err(ServiceError::Unavailable("search backend down".into()));
        }

        Ok(vec![Fragment::new(
            format!("finding {} about {}", call, query.text),
            format!("https://news.example.com/{}", call),
        )
        .with_published("2024-11-01")])
    }

    fn name(&self) -> &str {
        "scripted-search"
    }
}

/// Engine config with fast retries so failure paths finish quickly
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_stage_timeout(Duration::from_secs(5))
        .with_retry_policy(
            RetryPolicy::new(2)
                .with_backoff_base(Duration::from_millis(1))
                .with_backoff_max(Duration::from_millis(5)),
        )
}

pub fn orchestrator(
    llm: Arc<dyn LLMProvider>,
    retriever: Arc<dyn Retriever>,
    config: EngineConfig,
) -> Arc<Orchestrator> {
    let stages = StageSet::from_services(llm, retriever);
    Arc::new(Orchestrator::new(stages, config).expect("valid engine config"))
}
