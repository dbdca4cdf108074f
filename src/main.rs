use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use origin_queue::cli::{Cli, Command, EnqueueArgs, ServeArgs, WorkerArgs};
use origin_queue::logger::init_logger;
use origin_queue::{handlers, http, signals};
use origin_queue::{Config, Error, Job, Queue, Result, Worker, WorkerOptions};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logger(config.log_level) {
        eprintln!("Failed to install logger. {e}");
    }

    let queue = Queue::from_config(&config);

    let result = match cli.command {
        Command::Worker(args) => run_worker(&queue, args).await,
        Command::Enqueue(args) => enqueue(&queue, args),
        Command::Serve(args) => serve(&queue, &config, args).await,
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_worker(queue: &Queue, args: WorkerArgs) -> Result<()> {
    let engine = queue.connection(&args.connection)?;
    let options = WorkerOptions {
        queues: args.queues,
        daemon: args.daemon,
        sleep: Duration::from_secs(args.sleep),
        memory_limit_mb: args.memory,
    };

    let mut worker = Worker::new(engine, Arc::new(handlers::builtin()), options);

    if !signals::install_shutdown_handler(worker.stop_token())? {
        log::warn!("Process signals are not supported here; only Ctrl-C stops the worker gracefully.");
    }

    log::info!(
        "Worker started on {} ({})",
        worker.options().queues.join(", "),
        args.connection
    );

    worker.run().await
}

fn enqueue(queue: &Queue, args: EnqueueArgs) -> Result<()> {
    let engine = queue.connection(&args.connection)?;
    let arguments = serde_json::from_str(&args.arguments).map_err(|e| Error::InvalidSetting {
        name: "--arguments".to_owned(),
        reason: e.to_string(),
    })?;

    let mut job = Job::new(args.name, arguments)
        .on_queue(args.queue)
        .with_timeout(args.timeout);
    if let Some(retries) = args.retries {
        job = job.with_retry(retries, args.wait);
    }

    if !engine.add(&mut job, &args.schedule)? {
        return Err(Error::Datasource("failed to add job".to_owned()));
    }

    println!("{}", job.id().unwrap_or_default());
    Ok(())
}

async fn serve(queue: &Queue, config: &Config, args: ServeArgs) -> Result<()> {
    let engine = queue.connection(&args.connection)?;
    let addr = args.addr.unwrap_or(config.http_addr);

    http::serve(engine, addr).await?;
    Ok(())
}
