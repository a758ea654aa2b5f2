//! jobrun CLI entry point.
//!
//! Runs a single job described by a TOML job file through the executor
//! registry, relays its captured output, and exits with the job's exit
//! code. Pre-start failures are reported as "failed to start" so they
//! can be told apart from jobs that ran and failed.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobrun_common::{ExecutionOutcome, JobFile};
use jobrun_executor::{Executor, ExecutorRegistry, OutputKind};
use jobrun_wasm::WasmExecutor;

#[derive(Parser)]
#[command(name = "jobrun", version, about = "Run sandboxed WebAssembly compute jobs")]
struct Cli {
    /// Path to the TOML job file.
    #[arg(short, long, env = "JOBRUN_JOB")]
    job: PathBuf,

    /// Stream captured output while the job runs instead of printing it
    /// at the end.
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,jobrun=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let file = JobFile::from_file(&cli.job)
        .with_context(|| format!("loading job file {}", cli.job.display()))?;

    let registry = ExecutorRegistry::new();
    registry.register(Arc::new(WasmExecutor::new(&file.runtime)?));
    let executor = registry.get(&file.engine)?;

    let execution_id = uuid::Uuid::new_v4().to_string();
    let job_id = cli
        .job
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("job")
        .to_string();
    let request = file.to_request(execution_id.clone(), job_id);

    info!(execution = %execution_id, engine = %file.engine, "submitting job");

    let follower = cli.follow.then(|| {
        let executor = Arc::clone(&executor);
        let execution_id = execution_id.clone();
        tokio::spawn(async move { follow_output(executor, &execution_id).await })
    });

    let outcome = match executor.run(request).await {
        Ok(outcome) => outcome,
        Err(error) => {
            eprintln!("failed to start: {error}");
            std::process::exit(125);
        }
    };

    let streamed = match follower {
        Some(follower) => follower.await.unwrap_or(false),
        None => false,
    };
    if !streamed {
        relay_output(&outcome)?;
    }

    info!(
        execution = %execution_id,
        exit_code = outcome.exit_code,
        kind = %outcome.kind,
        "job ended"
    );
    if let Some(detail) = &outcome.error_detail {
        eprintln!("execution {}: {detail}", outcome.kind);
    }

    std::process::exit(outcome.exit_code.clamp(0, 255));
}

/// Print the completed outcome's captured output.
fn relay_output(outcome: &ExecutionOutcome) -> anyhow::Result<()> {
    std::io::stdout().write_all(&outcome.stdout)?;
    std::io::stderr().write_all(&outcome.stderr)?;
    Ok(())
}

/// Stream captured output while the execution runs.
///
/// The execution only becomes addressable once its run has started, so
/// the stream is retried briefly. Returns `false` if the execution
/// finished before a stream could be attached (the caller prints the
/// completed outcome instead).
async fn follow_output(executor: Arc<dyn Executor>, execution_id: &str) -> bool {
    let mut stream = None;
    for _ in 0..100 {
        match executor.output_stream(execution_id, true) {
            Ok(attached) => {
                stream = Some(attached);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let Some(mut stream) = stream else {
        return false;
    };

    while let Some(chunk) = stream.next_chunk().await {
        match chunk.kind {
            OutputKind::Stdout => {
                let _ = std::io::stdout().write_all(&chunk.data);
            }
            OutputKind::Stderr => {
                let _ = std::io::stderr().write_all(&chunk.data);
            }
        }
    }
    true
}
