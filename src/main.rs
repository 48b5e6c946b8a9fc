use std::io::{self, Read, Write};
use std::panic;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use sandbox_judge::{
    config::Config,
    core::{
        domain::Submission,
        pipeline::{
            dispatch::{handle_submissions, submit},
            judge::Judge,
        },
    },
    docker::DockerRuntime,
};

/// Reads submissions (a stream of JSON documents) from stdin and writes one
/// result JSON line per submission to stdout, in input order.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(io::stderr)
        .init();
    set_panic_hook();

    let profiles = Arc::new(config.profile_registry()?);
    tracing::info!(languages = ?profiles.languages(), "Language profiles loaded");

    let runtime = Arc::new(DockerRuntime::connect(config.docker_host.as_deref())?);
    let judge = Judge::new(runtime, profiles);

    let (job_tx, job_rx) = mpsc::channel(config.max_parallel_submissions.max(1));
    let worker = handle_submissions(job_rx, judge, config.max_parallel_submissions);

    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let submissions = serde_json::Deserializer::from_str(&input)
        .into_iter::<Submission>()
        .collect::<Result<Vec<_>, _>>()?;
    tracing::info!(count = submissions.len(), "Submissions received");

    let results = join_all(
        submissions
            .into_iter()
            .map(|submission| submit(&job_tx, submission)),
    )
    .await;
    drop(job_tx);

    let mut stdout = io::stdout().lock();
    let mut failed = false;
    for result in results {
        match result {
            Ok(result) => writeln!(stdout, "{}", serde_json::to_string(&result)?)?,
            Err(e) => {
                tracing::error!(error = %e, "Submission could not be judged");
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                failed = true;
            }
        }
    }
    stdout.flush()?;
    drop(stdout);

    worker.await?;
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
