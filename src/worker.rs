//! The queue worker: pulls jobs from one or more queues and runs them.
//!
//! Each pass visits the configured queues in order and takes at most one job
//! from each, so a busy queue cannot starve the others. Jobs run one at a
//! time. A daemon repeats passes until its stop token is cancelled, which is
//! only checked between passes so an in-flight job always finishes.
//!
//! Console output is best effort: once a row is claimed its outcome is always
//! recorded, even if the output stream has gone away.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::console::Console;
use crate::engine::DatabaseEngine;
use crate::error::{Error, JobError, Result};
use crate::job::{Job, JobRegistry, DEFAULT_QUEUE};
use crate::memory::MemoryMonitor;

pub const DEFAULT_SLEEP_SECS: u64 = 5;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 128;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub queues: Vec<String>,
    pub daemon: bool,
    /// Pause after a pass in which no queue had work (daemon only).
    pub sleep: Duration,
    pub memory_limit_mb: u64,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_owned()],
            daemon: false,
            sleep: Duration::from_secs(DEFAULT_SLEEP_SECS),
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
        }
    }
}

pub struct Worker {
    engine: Arc<DatabaseEngine>,
    registry: Arc<JobRegistry>,
    options: WorkerOptions,
    stop: CancellationToken,
    console: Console,
    memory: MemoryMonitor,
}

impl Worker {
    pub fn new(
        engine: Arc<DatabaseEngine>,
        registry: Arc<JobRegistry>,
        mut options: WorkerOptions,
    ) -> Self {
        if options.queues.is_empty() {
            options.queues.push(DEFAULT_QUEUE.to_owned());
        }

        Self {
            engine,
            registry,
            options,
            stop: CancellationToken::new(),
            console: Console::stdout(),
            memory: MemoryMonitor::new(),
        }
    }

    pub fn with_console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Cancelling this token stops a daemon after its current pass.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Runs a single pass, or passes until stopped when in daemon mode.
    ///
    /// Timeouts and the memory ceiling end the run with an error.
    pub async fn run(&mut self) -> Result<()> {
        let result = if self.options.daemon {
            self.daemon().await
        } else {
            self.work(None).await.map(|_| ())
        };

        if let Err(error) = &result {
            if error.is_fatal() {
                report(self.console.error(&error.to_string()));
            }
        }

        result
    }

    async fn daemon(&mut self) -> Result<()> {
        let sleep = self.options.sleep;
        let notice = self.announce_shutdown();

        let mut result = Ok(());
        while !self.stop.is_cancelled() {
            if let Err(error) = self.work(Some(sleep)).await {
                result = Err(error);
                break;
            }
        }

        if result.is_ok() {
            let _ = notice.await;
        } else {
            notice.abort();
        }

        result
    }

    /// Prints the shutdown notice as soon as a stop is requested, even while
    /// a job is still running.
    fn announce_shutdown(&self) -> tokio::task::JoinHandle<()> {
        let stop = self.stop.clone();
        let console = self.console.clone();

        tokio::spawn(async move {
            stop.cancelled().await;
            report(console.warning("Shutting down....."));
        })
    }

    /// One round-robin pass. Returns whether any queue had a job.
    pub async fn work(&mut self, sleep: Option<Duration>) -> Result<bool> {
        let queues = self.options.queues.clone();
        let mut ran_jobs = false;

        for queue in &queues {
            if self.process_queue(queue).await? {
                ran_jobs = true;
            }
            self.check_memory_usage()?;
        }

        if !ran_jobs {
            if let Some(sleep) = sleep.filter(|sleep| !sleep.is_zero()) {
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = self.stop.cancelled() => {}
                }
            }
        }

        Ok(ran_jobs)
    }

    async fn process_queue(&mut self, queue: &str) -> Result<bool> {
        let Some(job) = self.engine.fetch(queue)? else {
            return Ok(false);
        };

        self.dispatch_job(job).await?;
        Ok(true)
    }

    async fn dispatch_job(&mut self, mut job: Job) -> Result<()> {
        let cancellation = CancellationToken::new();
        let alarm = (job.timeout > 0).then(|| {
            let token = cancellation.clone();
            let timeout = Duration::from_secs(job.timeout);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        });

        report(self.console.job_started(self.engine.now(), &job));
        let started = Instant::now();
        let result = job.dispatch_now(&self.registry, cancellation.clone()).await;
        let took = started.elapsed();
        if let Some(alarm) = alarm {
            alarm.abort();
        }
        report(self.console.job_finished(took, result.is_ok()));

        match result {
            Ok(()) => {
                let recorded = self.engine.success(&job)?;
                self.warn_unrecorded(&job, recorded);
                Ok(())
            }
            Err(JobError::Cancelled) if cancellation.is_cancelled() => {
                let recorded = self.engine.fail(&job)?;
                self.warn_unrecorded(&job, recorded);
                report(self.console.warning(&format!(
                    "Killing job {} ({}) after {}s",
                    job.name,
                    job.id().unwrap_or_default(),
                    job.timeout
                )));
                Err(Error::Timeout {
                    seconds: job.timeout,
                })
            }
            Err(error) => {
                log::warn!(
                    "Job {} ({}) on {} failed: {}",
                    job.name,
                    job.id().unwrap_or_default(),
                    job.queue,
                    error
                );
                let recorded = self.record_failure(&mut job)?;
                self.warn_unrecorded(&job, recorded);
                Ok(())
            }
        }
    }

    /// Retries the job when it carries a retry policy, otherwise fails it.
    fn record_failure(&self, job: &mut Job) -> Result<bool> {
        let Some(policy) = job.retry.clone() else {
            return self.engine.fail(job);
        };

        match self.engine.retry(job, policy.limit, &policy.wait) {
            Err(Error::InvalidSchedule(expression)) => {
                log::error!(
                    "Job {} has an invalid retry wait '{}', marking it failed",
                    job.name,
                    expression
                );
                self.engine.fail(job)
            }
            other => other,
        }
    }

    fn warn_unrecorded(&self, job: &Job, recorded: bool) {
        if !recorded {
            log::warn!(
                "Could not record the outcome of job {} ({})",
                job.name,
                job.id().unwrap_or_default()
            );
        }
    }

    fn check_memory_usage(&mut self) -> Result<()> {
        let maximum = self.options.memory_limit_mb;
        if self.memory.resident_mb() >= maximum as f64 {
            return Err(Error::MemoryLimit {
                megabytes: maximum,
            });
        }

        Ok(())
    }
}

fn report(written: io::Result<()>) {
    if let Err(e) = written {
        log::warn!("Could not write worker output. {}", e);
    }
}
