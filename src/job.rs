//! Jobs, their handlers and synchronous dispatch.
//!
//! A [`Job`] names a handler registered in a [`JobRegistry`] and carries the
//! JSON arguments for it. The job itself is what gets serialized into the
//! queue table; handlers stay in process and are looked up by name when the
//! job is dispatched.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::JobError;

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Upper bound on retries accepted from the command line and the admin API.
pub const MAX_RETRIES: u32 = 64;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// How often and how long after a failure a job is re-queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub limit: u32,
    /// Schedule expression for the next attempt, e.g. `+5 minutes`.
    pub wait: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(skip)]
    id: Option<i64>,
    uuid: Uuid,
    pub name: String,
    pub queue: String,
    pub arguments: Value,
    #[serde(default)]
    attempts: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(skip)]
    ran: bool,
    #[serde(skip)]
    error: Option<JobError>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Job {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: name.into(),
            queue: DEFAULT_QUEUE.to_owned(),
            arguments,
            attempts: 0,
            timeout: DEFAULT_TIMEOUT_SECS,
            retry: None,
            ran: false,
            error: None,
        }
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Seconds the handler may run; `0` disables the limit.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_retry(mut self, limit: u32, wait: impl Into<String>) -> Self {
        self.retry = Some(RetryPolicy {
            limit,
            wait: wait.into(),
        });
        self
    }

    /// Row id, unset until the job has been persisted.
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn increment_attempts(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn has_run(&self) -> bool {
        self.ran
    }

    pub fn last_error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn serialize(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn deserialize(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// Runs the handler for this job and waits for it.
    ///
    /// The handler executes in its own task so that panics are contained and
    /// cancelling `token` aborts it. Nothing escapes: every failure comes back
    /// as a [`JobError`] and is also kept as [`Job::last_error`].
    pub async fn dispatch_now(
        &mut self,
        registry: &JobRegistry,
        token: CancellationToken,
    ) -> Result<(), JobError> {
        self.ran = true;
        let result = self.execute(registry, token).await;
        self.error = result.as_ref().err().cloned();
        result
    }

    async fn execute(
        &self,
        registry: &JobRegistry,
        token: CancellationToken,
    ) -> Result<(), JobError> {
        let handler = registry.resolve(&self.name)?;
        let context = JobContext {
            id: self.id,
            name: self.name.clone(),
            queue: self.queue.clone(),
            arguments: self.arguments.clone(),
            attempts: self.attempts,
            cancellation: token.clone(),
        };

        let mut task = tokio::spawn(async move { handler.handle(context).await });

        tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(JobError::Failed(error.to_string())),
                Err(error) if error.is_panic() => Err(JobError::Panicked(panic_message(error.into_panic()))),
                Err(_) => Err(JobError::Cancelled),
            },
            _ = token.cancelled() => {
                task.abort();
                Err(JobError::Cancelled)
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// What a handler gets to see of the job it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: Option<i64>,
    pub name: String,
    pub queue: String,
    pub arguments: Value,
    pub attempts: u32,
    /// Cancelled when the job runs past its timeout.
    pub cancellation: CancellationToken,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Name jobs use to refer to this handler.
    fn name(&self) -> &str;

    async fn handle(&self, context: JobContext) -> Result<(), HandlerError>;
}

/// Handlers known to this process, keyed by name.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("JobRegistry").field("handlers", &names).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: JobHandler + 'static>(&mut self, handler: H) -> &mut Self {
        self.handlers
            .insert(handler.name().to_owned(), Arc::new(handler));
        self
    }

    pub fn with<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::UnknownHandler(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
