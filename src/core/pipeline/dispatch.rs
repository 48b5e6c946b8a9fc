use std::sync::Arc;

use tokio::{
    sync::{
        Semaphore,
        mpsc::{Receiver, Sender},
        oneshot,
    },
    task::JoinHandle,
};

use crate::{
    constants::JOB_TX_ERR,
    core::{
        domain::{Submission, SubmissionResult},
        errors::EngineError,
        pipeline::judge::Judge,
    },
};

#[derive(Debug)]
pub struct Job {
    pub submission: Submission,
    pub reply: oneshot::Sender<Result<SubmissionResult, EngineError>>,
}

/// Pulls jobs off `job_rx` and evaluates them concurrently, at most
/// `max_parallel` at a time. Finishes once every sender is gone and the
/// in-flight jobs are done.
pub fn handle_submissions(
    mut job_rx: Receiver<Job>,
    judge: Judge,
    max_parallel: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));

    tokio::spawn(async move {
        let mut in_flight = Vec::new();

        while let Some(job) = job_rx.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let judge = judge.clone();

            in_flight.push(tokio::spawn(async move {
                let result = judge.evaluate(job.submission).await;
                drop(permit);
                if job.reply.send(result).is_err() {
                    tracing::warn!("Submission result dropped, caller went away");
                }
            }));
            in_flight.retain(|handle: &JoinHandle<()>| !handle.is_finished());
        }

        for outcome in futures::future::join_all(in_flight).await {
            if let Err(e) = outcome {
                tracing::error!(error = %e, "Submission task failed");
            }
        }
        tracing::debug!("Submission queue closed");
    })
}

/// Queues one submission and waits for its result.
pub async fn submit(
    job_tx: &Sender<Job>,
    submission: Submission,
) -> Result<SubmissionResult, EngineError> {
    let (reply, result) = oneshot::channel();
    job_tx
        .send(Job { submission, reply })
        .await
        .map_err(|_| {
            tracing::error!("{}", JOB_TX_ERR);
            EngineError::WorkerUnavailable
        })?;
    result.await.map_err(|_| EngineError::WorkerUnavailable)?
}
