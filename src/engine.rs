//! SQL-backed storage for queued jobs.
//!
//! A row is claimable iff `status = 'queued' AND locked IS NULL AND
//! scheduled <= now`. Claiming happens in two steps: the oldest claimable row
//! is selected, then re-selected and locked inside an IMMEDIATE transaction.
//! SQLite takes its write lock at `BEGIN IMMEDIATE`, which is what
//! `SELECT ... FOR UPDATE` gives on other databases, so only one connection
//! can move a given row from unlocked to locked.
//!
//! Statement failures are logged and reported as `false`/`None`. Only a
//! broken connection surfaces as an [`Error`].

use std::sync::{Arc, Mutex, MutexGuard};

use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_types::BigInt;
use diesel::sqlite::SqliteConnection;

use crate::clock::{Clock, SystemClock};
use crate::database::{self, is_connection_failure};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::models::{NewQueueRecord, QueueRecord, QueueStatus};
use crate::schedule;
use crate::schema::queue;

diesel::define_sql_function! {
    fn last_insert_rowid() -> BigInt;
}

/// Filters for [`DatabaseEngine::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub queue: Option<String>,
    pub status: Option<QueueStatus>,
    pub limit: Option<i64>,
}

pub struct DatabaseEngine {
    name: String,
    connection: Mutex<SqliteConnection>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseEngine")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DatabaseEngine {
    /// Wraps an open connection, creating the queue table if needed.
    pub fn new(
        name: impl Into<String>,
        mut connection: SqliteConnection,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        database::setup(&mut connection)?;

        Ok(Self {
            name: name.into(),
            connection: Mutex::new(connection),
            clock,
        })
    }

    pub fn connect(
        name: impl Into<String>,
        database_url: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::new(name, database::establish_connection(database_url)?, clock)
    }

    /// Private in-memory database, mostly useful in tests.
    pub fn in_memory() -> Result<Self> {
        Self::connect("default", ":memory:", Arc::new(SystemClock))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    /// Persists `job` as a queued row scheduled at `when` and stores the new
    /// row id on the job.
    pub fn add(&self, job: &mut Job, when: &str) -> Result<bool> {
        let now = self.clock.now();
        let scheduled = schedule::resolve(when, now)?;
        let data = job.serialize()?;

        let mut connection = self.connection()?;
        let inserted = connection.transaction::<_, DieselError, _>(|connection| {
            diesel::insert_into(queue::table)
                .values(&NewQueueRecord {
                    queue_name: &job.queue,
                    data: &data,
                    status: QueueStatus::Queued.as_str(),
                    scheduled,
                    locked: None,
                    created: now,
                    modified: now,
                })
                .execute(connection)?;

            diesel::select(last_insert_rowid()).get_result::<i64>(connection)
        });

        match reported("add", inserted)? {
            Some(id) => {
                job.set_id(id);
                log::debug!("Queued {} job {} on {} for {}", job.name, id, job.queue, scheduled);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Claims the oldest claimable job on `queue_name`.
    ///
    /// Losing the claim to another worker returns `None`; the caller polls
    /// again on its next pass rather than retrying here.
    pub fn fetch(&self, queue_name: &str) -> Result<Option<Job>> {
        let Some(record) = self.find_next(queue_name)? else {
            return Ok(None);
        };

        if !self.lock_record(&record)? {
            log::debug!("Job {} on {} was claimed by another worker", record.id, queue_name);
            return Ok(None);
        }

        match Job::deserialize(&record.data) {
            Ok(mut job) => {
                job.set_id(record.id);
                Ok(Some(job))
            }
            Err(e) => {
                log::error!("Job {} on {} has unreadable data: {}", record.id, queue_name, e);
                self.mark_failed(record.id)?;
                Ok(None)
            }
        }
    }

    /// First step of a claim: the oldest claimable row, without locking it.
    pub fn find_next(&self, queue_name: &str) -> Result<Option<QueueRecord>> {
        let now = self.clock.now();
        let mut connection = self.connection()?;

        let record = queue::table
            .filter(queue::queue_name.eq(queue_name))
            .filter(queue::status.eq(QueueStatus::Queued.as_str()))
            .filter(queue::locked.is_null())
            .filter(queue::scheduled.le(now))
            .order(queue::id.asc())
            .select(QueueRecord::as_select())
            .first(&mut *connection)
            .optional();

        Ok(reported("fetch", record)?.flatten())
    }

    /// Second step of a claim: locks `record` unless someone else already did.
    pub fn lock_record(&self, record: &QueueRecord) -> Result<bool> {
        let now = self.clock.now();
        let mut connection = self.connection()?;

        let locked = connection.immediate_transaction::<_, DieselError, _>(|connection| {
            let still_free = queue::table
                .filter(queue::id.eq(record.id))
                .filter(queue::status.eq(QueueStatus::Queued.as_str()))
                .filter(queue::locked.is_null())
                .select(queue::id)
                .first::<i64>(connection)
                .optional()?;

            if still_free.is_none() {
                return Ok(false);
            }

            diesel::update(queue::table.find(record.id))
                .set((queue::locked.eq(Some(now)), queue::modified.eq(now)))
                .execute(connection)?;

            Ok(true)
        });

        Ok(reported("lock", locked)?.unwrap_or(false))
    }

    /// Removes a successfully processed job.
    pub fn success(&self, job: &Job) -> Result<bool> {
        self.delete(job)
    }

    /// Marks the job failed and releases its lock. Failed rows stay in the
    /// table until they are requeued or deleted by hand.
    pub fn fail(&self, job: &Job) -> Result<bool> {
        match job.id() {
            Some(id) => self.mark_failed(id),
            None => Ok(false),
        }
    }

    /// Re-queues a failed job unless it has used up its attempts, in which
    /// case the job is marked failed instead.
    ///
    /// The attempt counter is incremented first; the job is re-queued while
    /// `attempts <= max_attempts`.
    pub fn retry(&self, job: &mut Job, max_attempts: u32, when: &str) -> Result<bool> {
        let Some(id) = job.id() else {
            return Ok(false);
        };

        job.increment_attempts();
        if job.attempts() > max_attempts {
            return self.fail(job);
        }

        let now = self.clock.now();
        let scheduled = schedule::resolve(when, now)?;
        let data = job.serialize()?;

        let mut connection = self.connection()?;
        let updated = diesel::update(queue::table.find(id))
            .set((
                queue::status.eq(QueueStatus::Queued.as_str()),
                queue::scheduled.eq(scheduled),
                queue::data.eq(data.as_str()),
                queue::locked.eq(None::<chrono::NaiveDateTime>),
                queue::modified.eq(now),
            ))
            .execute(&mut *connection);

        Ok(reported("retry", updated)?.is_some_and(|rows| rows == 1))
    }

    pub fn delete(&self, job: &Job) -> Result<bool> {
        match job.id() {
            Some(id) => self.delete_record(id),
            None => Ok(false),
        }
    }

    pub fn delete_record(&self, id: i64) -> Result<bool> {
        let mut connection = self.connection()?;
        let deleted = diesel::delete(queue::table.find(id)).execute(&mut *connection);

        Ok(reported("delete", deleted)?.is_some_and(|rows| rows == 1))
    }

    pub fn get(&self, id: i64) -> Result<Option<QueueRecord>> {
        let mut connection = self.connection()?;
        let record = queue::table
            .find(id)
            .select(QueueRecord::as_select())
            .first(&mut *connection)
            .optional();

        Ok(reported("get", record)?.flatten())
    }

    pub fn list(&self, filter: &ListFilter) -> Result<Vec<QueueRecord>> {
        let mut connection = self.connection()?;

        let mut query = queue::table
            .select(QueueRecord::as_select())
            .order(queue::id.asc())
            .into_boxed();
        if let Some(queue_name) = &filter.queue {
            query = query.filter(queue::queue_name.eq(queue_name.clone()));
        }
        if let Some(status) = filter.status {
            query = query.filter(queue::status.eq(status.as_str()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        let records = query.load(&mut *connection);
        Ok(reported("list", records)?.unwrap_or_default())
    }

    /// Puts a failed or orphaned row back in line: queued, unlocked and due now.
    pub fn requeue(&self, id: i64) -> Result<bool> {
        let now = self.clock.now();
        let mut connection = self.connection()?;
        let updated = diesel::update(queue::table.find(id))
            .set((
                queue::status.eq(QueueStatus::Queued.as_str()),
                queue::locked.eq(None::<chrono::NaiveDateTime>),
                queue::scheduled.eq(now),
                queue::modified.eq(now),
            ))
            .execute(&mut *connection);

        Ok(reported("requeue", updated)?.is_some_and(|rows| rows == 1))
    }

    fn mark_failed(&self, id: i64) -> Result<bool> {
        let now = self.clock.now();
        let mut connection = self.connection()?;
        let updated = diesel::update(queue::table.find(id))
            .set((
                queue::status.eq(QueueStatus::Failed.as_str()),
                queue::locked.eq(None::<chrono::NaiveDateTime>),
                queue::modified.eq(now),
            ))
            .execute(&mut *connection);

        Ok(reported("fail", updated)?.is_some_and(|rows| rows == 1))
    }

    fn connection(&self) -> Result<MutexGuard<'_, SqliteConnection>> {
        self.connection
            .lock()
            .map_err(|_| Error::Datasource(format!("connection '{}' is poisoned", self.name)))
    }
}

/// `Ok(None)` for a failed statement, `Err` for a dead connection.
fn reported<T>(operation: &str, result: QueryResult<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_connection_failure(&e) => Err(Error::Datasource(e.to_string())),
        Err(e) => {
            log::error!("Queue {} failed. {}", operation, e);
            Ok(None)
        }
    }
}
