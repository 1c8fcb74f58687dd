// src/bot/workers.rs - Fixed-size classifier worker pool fed by a bounded queue

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::ChatMessage;

/// How long a worker waits on an empty queue before re-checking cancellation
const DEQUEUE_POLL: Duration = Duration::from_millis(100);

/// Work done for each dequeued message
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

/// Workers for one connection generation. Dropped only through
/// [`WorkerPool::shutdown`], which joins every thread.
pub struct WorkerPool {
    generation: u64,
    sender: Option<Sender<ChatMessage>>,
    receiver: Receiver<ChatMessage>,
    workers: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl WorkerPool {
    pub fn start(
        generation: u64,
        size: usize,
        capacity: usize,
        token: CancellationToken,
        handler: MessageHandler,
    ) -> Result<Self> {
        let (sender, receiver) = bounded(capacity.max(1));
        let size = size.max(1);

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let token = token.clone();
            let handler = handler.clone();
            let worker = std::thread::Builder::new()
                .name(format!("classifier-{}-{}", generation, index))
                .spawn(move || Self::work(receiver, token, handler))
                .with_context(|| format!("Failed to spawn classifier worker {}", index))?;
            workers.push(worker);
        }

        info!("Started {} classifier workers for generation {}", size, generation);
        Ok(Self {
            generation,
            sender: Some(sender),
            receiver,
            workers,
            token,
        })
    }

    fn work(receiver: Receiver<ChatMessage>, token: CancellationToken, handler: MessageHandler) {
        loop {
            if token.is_cancelled() {
                break;
            }
            match receiver.recv_timeout(DEQUEUE_POLL) {
                // A message dequeued before cancellation is always finished
                Ok(message) => handler(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Enqueue a message. Blocks the calling runtime thread while the queue is
    /// full, so the reader slows down instead of dropping events. Gives up
    /// with an error once the generation is cancelled.
    pub fn dispatch(&self, message: ChatMessage) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .context("Worker pool is shut down")?;

        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                debug!("Work queue full, applying backpressure");
                tokio::task::block_in_place(|| self.send_until_cancelled(sender, message))
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow::anyhow!("Worker pool has no running workers")),
        }
    }

    fn send_until_cancelled(&self, sender: &Sender<ChatMessage>, mut message: ChatMessage) -> Result<()> {
        loop {
            if self.token.is_cancelled() {
                return Err(anyhow::anyhow!(
                    "Generation {} cancelled while the work queue was full",
                    self.generation
                ));
            }
            match sender.send_timeout(message, DEQUEUE_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => message = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(anyhow::anyhow!("Worker pool closed while enqueueing"))
                }
            }
        }
    }

    /// Cancel the generation, close the queue and join every worker. Returns
    /// the number of queued messages discarded.
    pub fn shutdown(mut self) -> usize {
        self.token.cancel();
        self.sender.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("A classifier worker of generation {} panicked", self.generation);
            }
        }

        let discarded = self.receiver.try_iter().count();
        info!(
            "Generation {} workers joined, {} queued messages discarded",
            self.generation, discarded
        );
        discarded
    }
}
