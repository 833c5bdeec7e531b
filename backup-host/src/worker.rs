//! Single consumer of the chunk queue.
//!
//! Chunks run on the blocking pool one at a time, so two invocations for
//! the same backup never overlap within this host.

use backup_engine::scheduler::ScheduledTask;
use backup_engine::{ChunkProcessor, ProcessOutcome};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn start_chunk_worker(
    processor: Arc<ChunkProcessor>,
    mut queue: mpsc::UnboundedReceiver<ScheduledTask>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                task = queue.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let backup_id = task.backup_id().to_string();
            let processor = processor.clone();
            let id = backup_id.clone();
            let result = tokio::task::spawn_blocking(move || processor.process(&id)).await;

            match result {
                Ok(Ok(ProcessOutcome::Busy)) => {
                    tracing::debug!(backup_id = %backup_id, "Chunk skipped, another run holds the job");
                }
                Ok(Ok(outcome)) => {
                    tracing::debug!(backup_id = %backup_id, ?outcome, "Chunk task finished");
                }
                Ok(Err(e)) => {
                    tracing::error!(backup_id = %backup_id, code = e.code(), error = %e, "Chunk failed");
                }
                Err(e) => {
                    tracing::error!(backup_id = %backup_id, error = %e, "Chunk task panicked");
                }
            }
        }
        tracing::info!("Chunk worker stopped");
    })
}
