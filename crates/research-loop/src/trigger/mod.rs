//! Ways a research run gets started
//!
//! A [`ResearchRequest`] is validated synchronously and turned into a task
//! string. [`RunLauncher`] queues it in the results store and executes it in
//! the background; [`DailySchedule`] submits a canned task once a day.

mod launcher;
mod schedule;

pub use launcher::{report_update, RunLauncher, Submission};
pub use schedule::{DailySchedule, DAILY_TASK};

use serde::{Deserialize, Serialize};

use crate::error::ResearchError;

pub const DEFAULT_INSTRUCTIONS: &str = "Analyze financial performance and market position";
pub const DEFAULT_CRITERIA: &str = "Warren Buffett value investing";
pub const DEFAULT_MAX_STOCKS: u32 = 10;
pub const MAX_STOCKS_LIMIT: u32 = 100;

const MAX_TICKER_LEN: usize = 10;
const MAX_TEXT_LEN: usize = 2000;

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

fn default_criteria() -> String {
    DEFAULT_CRITERIA.to_string()
}

fn default_max_stocks() -> u32 {
    DEFAULT_MAX_STOCKS
}

/// What a caller asked to research
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResearchRequest {
    /// Single-stock analysis
    Ticker {
        ticker: String,
        #[serde(default = "default_instructions")]
        instructions: String,
    },

    /// Screen a universe of stocks against investment criteria
    Screen {
        #[serde(default = "default_criteria")]
        criteria: String,
        #[serde(default = "default_max_stocks")]
        max_stocks: u32,
        #[serde(default)]
        sectors: Vec<String>,
    },

    /// Free-form task
    Task { task: String },
}

impl ResearchRequest {
    pub fn ticker(ticker: impl Into<String>) -> Self {
        ResearchRequest::Ticker {
            ticker: ticker.into(),
            instructions: default_instructions(),
        }
    }

    pub fn ticker_with_instructions(ticker: impl Into<String>, instructions: impl Into<String>) -> Self {
        ResearchRequest::Ticker {
            ticker: ticker.into(),
            instructions: instructions.into(),
        }
    }

    pub fn task(task: impl Into<String>) -> Self {
        ResearchRequest::Task { task: task.into() }
    }

    /// Shape checks; failures are returned to the caller before anything runs
    pub fn validate(&self) -> Result<(), ResearchError> {
        match self {
            ResearchRequest::Ticker {
                ticker,
                instructions,
            } => {
                normalize_ticker(ticker)?;
                check_text("instructions", instructions)
            }
            ResearchRequest::Screen {
                criteria,
                max_stocks,
                sectors,
            } => {
                check_text("criteria", criteria)?;
                if !(1..=MAX_STOCKS_LIMIT).contains(max_stocks) {
                    return Err(ResearchError::validation(format!(
                        "max_stocks must be between 1 and {}, got {}",
                        MAX_STOCKS_LIMIT, max_stocks
                    )));
                }
                if sectors.iter().any(|s| s.trim().is_empty()) {
                    return Err(ResearchError::validation("sector names must not be empty"));
                }
                Ok(())
            }
            ResearchRequest::Task { task } => check_text("task", task),
        }
    }

    /// Validate and render the task text a run starts from
    pub fn into_task(self) -> Result<String, ResearchError> {
        self.validate()?;
        let task = match self {
            ResearchRequest::Ticker {
                ticker,
                instructions,
            } => format!("{} for {}", instructions.trim(), normalize_ticker(&ticker)?),
            ResearchRequest::Screen {
                criteria,
                max_stocks,
                sectors,
            } => {
                let mut task = format!("Screen stocks using {} criteria. ", criteria.trim());
                if !sectors.is_empty() {
                    let sectors: Vec<&str> = sectors.iter().map(|s| s.trim()).collect();
                    task.push_str(&format!("Focus on sectors: {}. ", sectors.join(", ")));
                }
                task.push_str(&format!("Return top {} recommendations.", max_stocks));
                task
            }
            ResearchRequest::Task { task } => task.trim().to_string(),
        };
        Ok(task)
    }

    /// Short label for logs and submission messages
    pub fn label(&self) -> String {
        match self {
            ResearchRequest::Ticker { ticker, .. } => ticker.trim().to_ascii_uppercase(),
            ResearchRequest::Screen { criteria, .. } => format!("screen ({})", criteria.trim()),
            ResearchRequest::Task { .. } => "task".to_string(),
        }
    }
}

/// Upper-case a ticker symbol and check its shape
pub fn normalize_ticker(ticker: &str) -> Result<String, ResearchError> {
    let ticker = ticker.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(ResearchError::validation("ticker is required"));
    }
    let valid = ticker.len() <= MAX_TICKER_LEN
        && ticker
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
    if !valid {
        return Err(ResearchError::validation(format!(
            "invalid ticker {:?}: expected 1-{} characters of A-Z, 0-9, '.' or '-'",
            ticker, MAX_TICKER_LEN
        )));
    }
    Ok(ticker)
}

fn check_text(name: &str, value: &str) -> Result<(), ResearchError> {
    if value.trim().is_empty() {
        return Err(ResearchError::validation(format!("{} must not be empty", name)));
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(ResearchError::validation(format!(
            "{} exceeds {} bytes",
            name, MAX_TEXT_LEN
        )));
    }
    Ok(())
}
