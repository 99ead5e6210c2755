//! Mailbox-based actor runtime.
//!
//! An actor is a behavior bound to one bounded mailbox, processed strictly
//! one message at a time on its own task. Replies travel inside message
//! variants as [`Reply`] slots, so each actor's receive path is a closed
//! sum over its accepted variants. `tell` never blocks (drop-with-counter
//! on saturation); `ask` applies back-pressure via its deadline.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Default per-ask deadline.
pub const ASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default mailbox capacity.
pub const MAILBOX_CAPACITY: usize = 256;

/// One-shot reply slot carried inside ask-style message variants.
pub type Reply<T> = oneshot::Sender<Result<T>>;

/// Deliver a reply, discarding it when the asker has gone away
/// (cancelled or timed out).
pub fn respond<T>(slot: Reply<T>, result: Result<T>) {
    let _ = slot.send(result);
}

#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    async fn handle(&mut self, msg: Self::Msg);

    fn name(&self) -> &'static str {
        "actor"
    }
}

/// Cloneable handle to a running actor.
pub struct Addr<M> {
    tx: mpsc::Sender<M>,
    dropped: Arc<AtomicU64>,
    name: &'static str,
}

impl<M> Clone for Addr<M> {
    fn clone(&self) -> Self {
        Addr {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
            name: self.name,
        }
    }
}

impl<M: Send + 'static> Addr<M> {
    /// Fire-and-forget. Drops silently on a saturated mailbox, counting
    /// the drop; ordering from a single caller is preserved.
    pub fn tell(&self, msg: M) {
        if self.tx.try_send(msg).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(actor = self.name, "mailbox full, tell dropped");
        }
    }

    /// Request/response with the default deadline.
    pub async fn ask<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(Reply<T>) -> M,
    {
        self.ask_with_deadline(ASK_TIMEOUT, build).await
    }

    /// Request/response. The deadline bounds both mailbox admission and
    /// the wait for the reply; on expiry the caller gets `Cancelled` and
    /// the eventual reply (if any) is discarded.
    pub async fn ask_with_deadline<T, F>(&self, deadline: Duration, build: F) -> Result<T>
    where
        F: FnOnce(Reply<T>) -> M,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = build(reply_tx);

        match tokio::time::timeout(deadline, self.tx.send(msg)).await {
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(Error::Unavailable(format!("{} mailbox saturated", self.name)));
            }
            Ok(Err(_)) => return Err(Error::Unavailable(format!("{} stopped", self.name))),
            Ok(Ok(())) => {}
        }

        match tokio::time::timeout(deadline, reply_rx).await {
            Err(_) => Err(Error::Cancelled),
            // The handler dropped the reply slot without answering; this is
            // what in-flight askers of a panicked message observe.
            Ok(Err(_)) => Err(Error::internal(format!("{} dropped reply", self.name))),
            Ok(Ok(result)) => result,
        }
    }

    /// Total messages dropped on saturation since spawn.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// An actor's receive loop, ready to be spawned once a runtime exists.
pub type ActorTask = std::pin::Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Bind an actor to a fresh mailbox without spawning it. The returned
/// task is the receive loop; spawn it at liftoff.
pub fn prepare<A: Actor>(actor: A) -> (Addr<A::Msg>, ActorTask) {
    prepare_with_capacity(actor, MAILBOX_CAPACITY)
}

pub fn prepare_with_capacity<A: Actor>(mut actor: A, capacity: usize) -> (Addr<A::Msg>, ActorTask) {
    let (tx, mut rx) = mpsc::channel(capacity);
    let name = actor.name();
    let task: ActorTask = Box::pin(async move {
        while let Some(msg) = rx.recv().await {
            // A panicking handler fails the current message only; askers of
            // that message see their reply slot dropped. The actor moves on.
            let run = std::panic::AssertUnwindSafe(actor.handle(msg)).catch_unwind();
            if let Err(panic) = run.await {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(actor = name, %detail, "handler panicked, message failed");
            }
        }
        tracing::debug!(actor = name, "mailbox closed, actor stopped");
    });
    let addr = Addr {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        name,
    };
    (addr, task)
}

/// Spawn an actor onto its own task with a bounded mailbox. Requires a
/// running runtime; during server construction use [`prepare`] instead.
pub fn spawn<A: Actor>(actor: A) -> Addr<A::Msg> {
    spawn_with_capacity(actor, MAILBOX_CAPACITY)
}

pub fn spawn_with_capacity<A: Actor>(actor: A, capacity: usize) -> Addr<A::Msg> {
    let (addr, task) = prepare_with_capacity(actor, capacity);
    tokio::spawn(task);
    addr
}

/// N workers behind a round-robin dispatcher keyed by a lock-free counter.
/// Exposes the same ask/tell surface plus a broadcast fan-out.
pub struct Pool<M> {
    workers: Vec<Addr<M>>,
    cursor: AtomicUsize,
}

impl<M: Send + 'static> Pool<M> {
    /// Bind N workers without spawning them; spawn the tasks at liftoff.
    pub fn prepare<A, F>(size: usize, mut make: F) -> (Arc<Pool<M>>, Vec<ActorTask>)
    where
        A: Actor<Msg = M>,
        F: FnMut(usize) -> A,
    {
        assert!(size > 0, "pool needs at least one worker");
        let mut workers = Vec::with_capacity(size);
        let mut tasks = Vec::with_capacity(size);
        for i in 0..size {
            let (addr, task) = prepare_with_capacity(make(i), MAILBOX_CAPACITY);
            workers.push(addr);
            tasks.push(task);
        }
        let pool = Arc::new(Pool {
            workers,
            cursor: AtomicUsize::new(0),
        });
        (pool, tasks)
    }

    pub fn spawn<A, F>(size: usize, make: F) -> Arc<Pool<M>>
    where
        A: Actor<Msg = M>,
        F: FnMut(usize) -> A,
    {
        let (pool, tasks) = Pool::prepare(size, make);
        for task in tasks {
            tokio::spawn(task);
        }
        pool
    }

    fn next(&self) -> &Addr<M> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[i]
    }

    pub fn tell(&self, msg: M) {
        self.next().tell(msg);
    }

    pub async fn ask<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(Reply<T>) -> M,
    {
        self.next().ask(build).await
    }

    /// Deliver one message to every worker (tell semantics per worker).
    pub fn broadcast<F>(&self, mut make: F)
    where
        F: FnMut() -> M,
    {
        for worker in &self.workers {
            worker.tell(make());
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.workers.iter().map(|w| w.dropped_count()).sum()
    }
}
