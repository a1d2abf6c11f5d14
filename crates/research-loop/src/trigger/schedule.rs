//! Once-a-day research trigger

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::future::Future;
use tracing::{error, info};

use super::{launcher::RunLauncher, ResearchRequest};
use crate::error::ResearchError;

/// Task submitted by the daily trigger
pub const DAILY_TASK: &str = "Daily Market Report";

/// Fires at a fixed UTC time of day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    pub at: NaiveTime,
    pub task: String,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            at: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            task: DAILY_TASK.to_string(),
        }
    }
}

impl DailySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire at `hour:minute` UTC
    pub fn at_time(mut self, hour: u32, minute: u32) -> Result<Self, ResearchError> {
        self.at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            ResearchError::configuration(format!("invalid time of day {:02}:{:02}", hour, minute))
        })?;
        Ok(self)
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    /// First firing strictly after `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    /// Submit the daily task through `launcher` every day until `shutdown`
    /// resolves
    pub async fn run<F>(&self, launcher: &RunLauncher, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let now = Utc::now();
            let next = self.next_fire_after(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, task = %self.task, "Daily run scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Daily schedule stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match launcher.submit(ResearchRequest::task(self.task.clone())).await {
                Ok(submission) => info!(run_id = %submission.run_id, "Daily run submitted"),
                Err(e) => error!(error = %e, "Daily run could not be submitted"),
            }
        }
    }
}
