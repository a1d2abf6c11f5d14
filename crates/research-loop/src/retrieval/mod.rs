//! Retrieval service interface
//!
//! The research stage appends exactly what a [`Retriever`] returns, one note
//! per fragment, with the fragment's provenance kept in the note text.

mod tavily;

pub use tavily::{SearchDepth, TavilyError, TavilyRetriever, Topic};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// A piece of retrieved text and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Retrieved content
    pub text: String,
    /// Source identifier (URL, filing id, document name)
    pub source: String,
    /// Publication date or other recency marker, when known
    pub published: Option<String>,
    /// Relevance score (0-1), when the service reports one
    pub relevance: Option<f64>,
}

impl Fragment {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            published: None,
            relevance: None,
        }
    }

    pub fn with_published(mut self, published: impl Into<String>) -> Self {
        self.published = Some(published.into());
        self
    }

    /// Render as a research note: `[source | published] text`
    pub fn to_note(&self) -> String {
        match &self.published {
            Some(published) => format!("[{} | {}] {}", self.source, published, self.text.trim()),
            None => format!("[{}] {}", self.source, self.text.trim()),
        }
    }
}

/// A single retrieval request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalQuery {
    pub text: String,
    pub max_results: u32,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>, max_results: u32) -> Self {
        Self {
            text: text.into(),
            max_results,
        }
    }
}

/// Source of research fragments
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return zero or more fragments for the query
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Fragment>, ServiceError>;

    /// Retriever name for logging
    fn name(&self) -> &str;
}
