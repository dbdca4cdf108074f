use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DEFAULT_CONNECTION};
use crate::engine::DatabaseEngine;
use crate::error::{Error, Result};
use crate::job::Job;

/// Entry point for queueing work: resolves named connections to engines and
/// keeps one engine per connection for the life of the process.
pub struct Queue {
    config: Config,
    clock: Arc<dyn Clock>,
    engines: Mutex<HashMap<String, Arc<DatabaseEngine>>>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.config.connections.keys().collect();
        names.sort();
        f.debug_struct("Queue").field("connections", &names).finish()
    }
}

impl Queue {
    pub fn new(connections: HashMap<String, String>) -> Self {
        Self::from_config(&Config {
            connections,
            ..Config::default()
        })
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            config: config.clone(),
            clock: Arc::new(SystemClock),
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The engine for `name`, connecting on first use.
    pub fn connection(&self, name: &str) -> Result<Arc<DatabaseEngine>> {
        let url = self.config.database_url(name)?;

        let mut engines = self
            .engines
            .lock()
            .map_err(|_| Error::Datasource("engine cache is poisoned".to_owned()))?;

        if let Some(engine) = engines.get(name) {
            return Ok(Arc::clone(engine));
        }

        let engine = Arc::new(DatabaseEngine::connect(name, url, Arc::clone(&self.clock))?);
        log::debug!("Connected queue '{}'", name);
        engines.insert(name.to_owned(), Arc::clone(&engine));

        Ok(engine)
    }

    /// Adds `job` through the default connection.
    pub fn add(&self, job: &mut Job, when: &str) -> Result<bool> {
        self.connection(DEFAULT_CONNECTION)?.add(job, when)
    }

    /// Fetches from `queue_name` through the default connection.
    pub fn fetch(&self, queue_name: &str) -> Result<Option<Job>> {
        self.connection(DEFAULT_CONNECTION)?.fetch(queue_name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn queue() -> Queue {
        Queue::new(HashMap::from([
            ("default".to_owned(), ":memory:".to_owned()),
            ("reports".to_owned(), ":memory:".to_owned()),
        ]))
    }

    #[test]
    fn engines_are_cached_per_connection() {
        let queue = queue();

        let first = queue.connection("default").unwrap();
        let again = queue.connection("default").unwrap();
        let reports = queue.connection("reports").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &reports));
        assert_eq!(reports.name(), "reports");
    }

    #[test]
    fn unknown_connections_are_configuration_errors() {
        let queue = queue();
        assert!(matches!(
            queue.connection("billing"),
            Err(Error::UnknownConnection(name)) if name == "billing"
        ));
    }

    #[test]
    fn add_then_fetch_through_the_default_connection() {
        let queue = queue();
        let mut job = Job::new("send_email", json!({"to": "amy@example.com"}));

        assert!(queue.add(&mut job, "now").unwrap());
        let fetched = queue.fetch("default").unwrap().unwrap();

        assert_eq!(fetched.id(), job.id());
        assert_eq!(fetched.arguments, json!({"to": "amy@example.com"}));
    }
}
