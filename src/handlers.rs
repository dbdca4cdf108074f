//! Handlers available to every worker started from the command line.

use std::time::Duration;

use async_trait::async_trait;

use crate::job::{HandlerError, JobContext, JobHandler, JobRegistry};

/// Writes the job's arguments to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, context: JobContext) -> Result<(), HandlerError> {
        log::info!("[{}] {}", context.queue, context.arguments);
        Ok(())
    }
}

/// Sleeps for `{"seconds": n}`, stopping early if the job is cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn handle(&self, context: JobContext) -> Result<(), HandlerError> {
        let seconds = context
            .arguments
            .get("seconds")
            .and_then(serde_json::Value::as_f64)
            .ok_or("sleep needs a numeric \"seconds\" argument")?;
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|_| format!("cannot sleep for {seconds} seconds"))?;

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = context.cancellation.cancelled() => Err("interrupted".into()),
        }
    }
}

pub fn builtin() -> JobRegistry {
    JobRegistry::new().with(LogHandler).with(SleepHandler)
}
