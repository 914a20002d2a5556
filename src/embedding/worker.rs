//! The embedding worker thread.
//!
//! Embedding never runs on the request path. Item embeddings are scheduled
//! fire-and-forget after a store succeeds and flow back as messages that the
//! engine applies before handling the next request. Query embeddings are
//! awaited with a bounded timeout; on timeout the pending reply is discarded
//! and retrieval proceeds FTS-only.

use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::Embedder;

enum Job {
    /// Embed an item's text; the result is delivered on the completion channel.
    Item { id: String, text: String },
    /// Embed a query; the caller awaits the reply.
    Query {
        text: String,
        reply: oneshot::Sender<Vec<f32>>,
    },
}

/// A finished item embedding, ready to be written to the vector sidecar.
pub struct CompletedEmbedding {
    pub id: String,
    pub vector: Vec<f32>,
}

pub struct EmbedWorker {
    jobs: mpsc::UnboundedSender<Job>,
    completed: mpsc::UnboundedReceiver<CompletedEmbedding>,
    handle: Option<JoinHandle<()>>,
    provider_name: &'static str,
    provider_ready: bool,
}

impl EmbedWorker {
    /// Spawn the worker thread around an embedding provider.
    pub fn spawn(provider: Box<dyn Embedder>) -> Self {
        let provider_name = provider.name();
        let provider_ready = provider.ready();
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        let (done_tx, done_rx) = mpsc::unbounded_channel::<CompletedEmbedding>();

        let handle = std::thread::Builder::new()
            .name("cortex-embed".into())
            .spawn(move || {
                while let Some(job) = job_rx.blocking_recv() {
                    match job {
                        Job::Item { id, text } => match provider.embed(&text) {
                            Ok(vector) => {
                                let _ = done_tx.send(CompletedEmbedding { id, vector });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, id, "item embedding failed");
                            }
                        },
                        Job::Query { text, reply } => match provider.embed(&text) {
                            Ok(vector) => {
                                // Receiver may have timed out; that's fine.
                                let _ = reply.send(vector);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "query embedding failed");
                            }
                        },
                    }
                }
            })
            .expect("failed to spawn embedding worker thread");

        Self {
            jobs: job_tx,
            completed: done_rx,
            handle: Some(handle),
            provider_name,
            provider_ready,
        }
    }

    /// Queue an item embedding. Fire-and-forget.
    pub fn schedule(&self, id: &str, text: &str) {
        let _ = self.jobs.send(Job::Item {
            id: id.to_string(),
            text: text.to_string(),
        });
    }

    /// Take every finished item embedding without blocking.
    pub fn drain_completed(&mut self) -> Vec<CompletedEmbedding> {
        let mut out = Vec::new();
        while let Ok(done) = self.completed.try_recv() {
            out.push(done);
        }
        out
    }

    /// Embed a query, waiting at most `timeout`. `None` on timeout or worker
    /// failure — the caller degrades to FTS-only retrieval.
    pub async fn embed_query(&self, text: &str, timeout: Duration) -> Option<Vec<f32>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job::Query {
                text: text.to_string(),
                reply: reply_tx,
            })
            .ok()?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!("query embedding timed out, falling back to keyword search");
                None
            }
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    pub fn ready(&self) -> bool {
        self.provider_ready
    }

    /// Stop the worker and join the thread. Pending jobs are dropped.
    pub fn shutdown(mut self) {
        drop(self.jobs);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
