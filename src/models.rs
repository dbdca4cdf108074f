// src/models.rs

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::queue;

/// Persisted state of a queue row. Successful jobs are deleted, so there is
/// no "completed" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(Self::Queued),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown queue status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueRecord {
    pub id: i64,
    pub queue_name: String,
    pub data: String,
    pub status: String,
    pub scheduled: NaiveDateTime,
    pub locked: Option<NaiveDateTime>,
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
}

impl QueueRecord {
    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }
}

#[derive(Insertable)]
#[diesel(table_name = queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NewQueueRecord<'a> {
    pub queue_name: &'a str,
    pub data: &'a str,
    pub status: &'a str,
    pub scheduled: NaiveDateTime,
    pub locked: Option<NaiveDateTime>,
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
}
