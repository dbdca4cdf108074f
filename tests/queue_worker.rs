use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use origin_queue::console::Console;
use origin_queue::{
    async_trait, Config, HandlerError, Job, JobContext, JobHandler, JobRegistry, ListFilter,
    Queue, QueueStatus, Worker, WorkerOptions,
};
use serde_json::json;

struct Sum {
    total: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    async fn handle(&self, context: JobContext) -> Result<(), HandlerError> {
        let values = context
            .arguments
            .as_array()
            .ok_or("expected an array of numbers")?;
        for value in values {
            let value = value.as_u64().ok_or("expected a number")?;
            self.total.fetch_add(value as usize, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[tokio::test]
async fn jobs_added_through_the_queue_are_run_by_a_worker() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("queue.sqlite");
    let config = Config::from_vars([("DATABASE_URL", path.to_str().unwrap())]).unwrap();
    let queue = Queue::from_config(&config);

    let mut good = Job::new("sum", json!([1, 2, 3]));
    let mut bad = Job::new("sum", json!("six"));
    let mut later = Job::new("sum", json!([100]));
    assert!(queue.add(&mut good, "now").unwrap());
    assert!(queue.add(&mut bad, "now").unwrap());
    assert!(queue.add(&mut later, "+1 hour").unwrap());

    let total = Arc::new(AtomicUsize::new(0));
    let registry = JobRegistry::new().with(Sum {
        total: Arc::clone(&total),
    });
    let engine = queue.connection("default").unwrap();
    let mut worker = Worker::new(Arc::clone(&engine), Arc::new(registry), WorkerOptions {
        memory_limit_mb: u64::MAX,
        ..Default::default()
    })
    .with_console(Console::new(std::io::sink()));

    worker.run().await.unwrap();
    worker.run().await.unwrap();
    worker.run().await.unwrap();

    assert_eq!(total.load(Ordering::SeqCst), 6);
    assert!(engine.get(good.id().unwrap()).unwrap().is_none());

    let failed = engine
        .list(&ListFilter {
            status: Some(QueueStatus::Failed),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, bad.id().unwrap());

    let waiting = engine.get(later.id().unwrap()).unwrap().unwrap();
    assert_eq!(waiting.status, "queued");
    assert!(!waiting.is_locked());
}

#[test]
fn unknown_connections_fail_at_resolution() {
    let queue = Queue::new(HashMap::new());
    assert!(queue.connection("default").is_err());
}
