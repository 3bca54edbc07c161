// Background worker for document processing.
// The upload boundary stays non-blocking: jobs are queued and one worker
// task runs each document's pipeline start to finish before the next.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::DocumentProcessor;
use crate::{KbError, Result};

#[derive(Debug, Clone, Copy)]
struct Job {
    document_id: i64,
    reprocess: bool,
}

/// Handle to a spawned processing worker. Dropping the handle (or calling
/// [`shutdown`](Self::shutdown)) stops the worker after the queue drains.
pub struct ProcessingWorker {
    sender: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl ProcessingWorker {
    /// Spawn a worker that consumes queued documents strictly sequentially.
    #[inline]
    pub fn spawn(processor: Arc<DocumentProcessor>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let handle = tokio::spawn(async move {
            info!("Processing worker started");

            while let Some(job) = receiver.recv().await {
                debug!(
                    "Worker picked up document {} (reprocess: {})",
                    job.document_id, job.reprocess
                );

                let result = if job.reprocess {
                    processor.reprocess_document(job.document_id).await
                } else {
                    processor.process_document(job.document_id).await
                };

                // Pipeline failures are recorded on the document itself;
                // anything surfacing here is an infrastructure error
                if let Err(e) = result {
                    error!("Processing job for document {} failed: {}", job.document_id, e);
                }
            }

            info!("Processing worker stopped");
        });

        Self { sender, handle }
    }

    /// Queue a document for processing. Returns immediately.
    #[inline]
    pub fn enqueue(&self, document_id: i64) -> Result<()> {
        self.send(Job {
            document_id,
            reprocess: false,
        })
    }

    /// Queue a document for a full wipe-and-rebuild.
    #[inline]
    pub fn enqueue_reprocess(&self, document_id: i64) -> Result<()> {
        self.send(Job {
            document_id,
            reprocess: true,
        })
    }

    fn send(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| KbError::Other(anyhow!("processing worker is not running")))
    }

    /// Drain the queue and wait for the worker to finish.
    #[inline]
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!("Processing worker task panicked: {e}");
        }
    }
}
