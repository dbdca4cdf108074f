use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDateTime;
use colored::*;

use crate::job::Job;

/// The worker's output stream: one status line per job plus warnings.
///
/// Clones share the same sink.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// First half of a status line, written before the job runs.
    pub fn job_started(&self, at: NaiveDateTime, job: &Job) -> io::Result<()> {
        let kind = match job.attempts() {
            0 => "Run".to_owned(),
            n => format!("Retry #{n}"),
        };
        let id = job.id().map(|id| id.to_string()).unwrap_or_default();

        let mut out = self.lock()?;
        write!(
            out,
            "[{}] {} {} {} {}",
            at.format("%Y-%m-%d %-H:%M:%S"),
            job.queue.dimmed(),
            kind.cyan(),
            job.name,
            id.green()
        )?;
        out.flush()
    }

    pub fn job_finished(&self, took: Duration, succeeded: bool) -> io::Result<()> {
        let status = if succeeded {
            " OK ".white().on_green()
        } else {
            " FAILED ".white().on_bright_red()
        };

        let mut out = self.lock()?;
        writeln!(out, " ({}s) {}", took.as_secs(), status)?;
        out.flush()
    }

    pub fn warning(&self, message: &str) -> io::Result<()> {
        let mut out = self.lock()?;
        writeln!(out, "{}", message.yellow())?;
        out.flush()
    }

    pub fn error(&self, message: &str) -> io::Result<()> {
        let mut out = self.lock()?;
        writeln!(out, "{} {}", "ERROR".red().bold(), message.red())?;
        out.flush()
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Box<dyn Write + Send>>> {
        self.out
            .lock()
            .map_err(|_| io::Error::other("console output is poisoned"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    /// In-memory sink whose contents can be read while a console owns a clone.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn at() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-03-10 09:05:07", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn status_line_for_a_first_run() {
        let buffer = SharedBuffer::default();
        let console = Console::new(buffer.clone());
        let mut job = Job::new("send_email", json!({})).on_queue("mail");
        job.set_id(7);

        console.job_started(at(), &job).unwrap();
        console.job_finished(Duration::from_secs(2), true).unwrap();

        let line = buffer.contents();
        assert!(line.starts_with("[2024-03-10 9:05:07]"), "{line}");
        for part in ["mail", "Run", "send_email", "7", "(2s)", "OK"] {
            assert!(line.contains(part), "{part} missing from {line}");
        }
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn status_line_for_a_retry() {
        let buffer = SharedBuffer::default();
        let console = Console::new(buffer.clone());
        let mut job = Job::new("send_email", json!({}));
        job.increment_attempts();
        job.increment_attempts();

        console.job_started(at(), &job).unwrap();
        console.job_finished(Duration::ZERO, false).unwrap();

        let line = buffer.contents();
        assert!(line.contains("Retry #2"), "{line}");
        assert!(line.contains("FAILED"), "{line}");
    }
}
