use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown queue connection '{0}'")]
    UnknownConnection(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("could not connect to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: diesel::ConnectionError,
    },

    #[error("datasource error: {0}")]
    Datasource(String),

    #[error("failed to serialize job: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid schedule expression '{0}'")]
    InvalidSchedule(String),

    #[error("Maximum timeout {seconds} reached")]
    Timeout { seconds: u64 },

    #[error("Maximum memory {megabytes} mb reached")]
    MemoryLimit { megabytes: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Timeouts and memory ceilings stop the worker process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::MemoryLimit { .. })
    }
}

/// Why a job's handler did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("job was cancelled")]
    Cancelled,
}
