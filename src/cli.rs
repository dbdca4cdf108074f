use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_CONNECTION;
use crate::job::{DEFAULT_QUEUE, DEFAULT_TIMEOUT_SECS, MAX_RETRIES};
use crate::worker::{DEFAULT_MEMORY_LIMIT_MB, DEFAULT_SLEEP_SECS};

#[derive(Debug, Parser)]
#[command(name = "origin_queue", version, about = "Database backed job queue")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processes jobs in the queue
    Worker(WorkerArgs),
    /// Adds a job to a queue
    Enqueue(EnqueueArgs),
    /// Serves the job admin API
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Queue names, visited in order
    #[arg(default_value = DEFAULT_QUEUE)]
    pub queues: Vec<String>,

    /// The connection to use
    #[arg(long, default_value = DEFAULT_CONNECTION)]
    pub connection: String,

    /// Keep polling until stopped
    #[arg(short, long)]
    pub daemon: bool,

    /// Seconds to sleep when no jobs are available
    #[arg(long, default_value_t = DEFAULT_SLEEP_SECS)]
    pub sleep: u64,

    /// Memory limit in megabytes
    #[arg(long, default_value_t = DEFAULT_MEMORY_LIMIT_MB)]
    pub memory: u64,
}

#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Name of the handler to run
    pub name: String,

    #[arg(long, default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Handler arguments as JSON
    #[arg(long, default_value = "{}")]
    pub arguments: String,

    /// When the job becomes available, e.g. "+10 minutes"
    #[arg(long, default_value = "now")]
    pub schedule: String,

    /// Seconds the job may run, 0 for no limit
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Times to retry after a failure
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_RETRIES)))]
    pub retries: Option<u32>,

    /// Delay before each retry
    #[arg(long, default_value = "now")]
    pub wait: String,

    #[arg(long, default_value = DEFAULT_CONNECTION)]
    pub connection: String,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, default_value = DEFAULT_CONNECTION)]
    pub connection: String,

    /// Overrides QUEUE_HTTP_ADDR
    #[arg(long)]
    pub addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults() {
        let cli = Cli::parse_from(["origin_queue", "worker"]);
        let Command::Worker(args) = cli.command else {
            panic!("expected worker");
        };

        assert_eq!(args.queues, vec!["default"]);
        assert_eq!(args.connection, "default");
        assert!(!args.daemon);
        assert_eq!(args.sleep, 5);
        assert_eq!(args.memory, 128);
    }

    #[test]
    fn worker_with_options() {
        let cli = Cli::parse_from([
            "origin_queue",
            "worker",
            "mail",
            "reports",
            "--connection=secondary",
            "-d",
            "--sleep=1",
            "--memory=64",
        ]);
        let Command::Worker(args) = cli.command else {
            panic!("expected worker");
        };

        assert_eq!(args.queues, vec!["mail", "reports"]);
        assert_eq!(args.connection, "secondary");
        assert!(args.daemon);
        assert_eq!(args.sleep, 1);
        assert_eq!(args.memory, 64);
    }

    #[test]
    fn enqueue_arguments() {
        let cli = Cli::parse_from([
            "origin_queue",
            "enqueue",
            "sleep",
            "--arguments",
            r#"{"seconds": 2}"#,
            "--schedule",
            "+10 minutes",
            "--retries",
            "3",
        ]);
        let Command::Enqueue(args) = cli.command else {
            panic!("expected enqueue");
        };

        assert_eq!(args.name, "sleep");
        assert_eq!(args.queue, "default");
        assert_eq!(args.schedule, "+10 minutes");
        assert_eq!(args.retries, Some(3));
        assert_eq!(args.timeout, 60);
    }

    #[test]
    fn retries_are_capped() {
        let parse = |retries: &str| {
            Cli::try_parse_from(["origin_queue", "enqueue", "log", "--retries", retries])
        };

        assert!(parse("64").is_ok());
        assert!(parse("65").is_err());
        assert!(parse("4294967295").is_err());
    }

    #[test]
    fn command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
