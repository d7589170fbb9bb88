use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::trace;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_ACTOR: u64;
}

/// A message-driven component with exclusive ownership of its state.
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    /// Process one message to completion.
    fn handle(
        &mut self,
        msg: Self::Msg,
        ctx: &mut Context<Self::Msg>,
    ) -> impl Future<Output = ()> + Send;

    /// Called once before the first message.
    fn on_start(&mut self, _ctx: &mut Context<Self::Msg>) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Called once after the loop exits.
    fn on_stop(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Errors from [`Handle::call`].
#[derive(Debug, Error)]
pub enum CallError {
    #[error("actor is gone")]
    ActorGone,

    #[error("actor dropped the reply")]
    NoReply,

    #[error("call() invoked from the target actor's own handler")]
    Reentrant,
}

/// Handed to the actor while processing; lets it address itself and stop.
pub struct Context<M> {
    handle: Handle<M>,
    stopped: bool,
}

impl<M: Send + 'static> Context<M> {
    /// A handle to this actor, for self-posts and for passing to children.
    #[must_use]
    pub fn handle(&self) -> Handle<M> {
        self.handle.clone()
    }

    /// Exit the message loop after the current message completes.
    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// A cloneable address of a spawned actor.
#[derive(Debug)]
pub struct Handle<M> {
    id: u64,
    tx: mpsc::UnboundedSender<M>,
    cancel: CancellationToken,
}

impl<M> Clone for Handle<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<M: Send + 'static> Handle<M> {
    /// Post a message. Posting to a stopped actor is a no-op.
    pub fn post(&self, msg: M) {
        if self.tx.send(msg).is_err() {
            trace!(actor = self.id, "post to stopped actor dropped");
        }
    }

    /// Post a message after `delay`.
    ///
    /// The message is delivered unconditionally; the receiver is expected to
    /// discard it if a [`crate::Generation`] it carries has gone stale.
    pub fn post_delayed(&self, msg: M, delay: Duration) {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(msg);
                }
            }
        });
    }

    /// Post a message built around a reply sender and await the reply.
    ///
    /// Must not be called from the target actor's own handler: the handler
    /// would be awaiting a reply only it can produce. Debug builds panic on
    /// this; release builds return [`CallError::Reentrant`].
    pub async fn call<R, F>(&self, make: F) -> Result<R, CallError>
    where
        F: FnOnce(oneshot::Sender<R>) -> M,
    {
        let reentrant = CURRENT_ACTOR.try_with(|id| *id == self.id).unwrap_or(false);
        if reentrant {
            debug_assert!(false, "call() invoked from the target actor's own handler");
            return Err(CallError::Reentrant);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| CallError::ActorGone)?;
        reply_rx.await.map_err(|_| CallError::NoReply)
    }

    /// Tear the actor down without delivering further messages.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the actor's loop has exited (or was torn down).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Build a handle/context pair that is not driven by any task.
///
/// Test-only plumbing for [`crate::testing::ActorHarness`]: messages posted
/// to the handle pile up in the returned receiver instead of being
/// delivered.
pub(crate) fn detached_context<M: Send + 'static>()
-> (Context<M>, mpsc::UnboundedReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Handle {
        id: NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed),
        tx,
        cancel: CancellationToken::new(),
    };
    (
        Context {
            handle,
            stopped: false,
        },
        rx,
    )
}

pub(crate) fn context_is_stopped<M>(ctx: &Context<M>) -> bool {
    ctx.stopped
}

/// Spawn `actor` on the current tokio runtime and return its address.
pub fn spawn<A: Actor>(mut actor: A) -> Handle<A::Msg> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed);
    let cancel = CancellationToken::new();

    let handle = Handle {
        id,
        tx,
        cancel: cancel.clone(),
    };
    let ctx_handle = handle.clone();

    tokio::spawn(CURRENT_ACTOR.scope(id, async move {
        trace!(actor = id, "actor started");
        let mut ctx = Context {
            handle: ctx_handle,
            stopped: false,
        };
        actor.on_start(&mut ctx).await;

        while !ctx.stopped {
            let msg = tokio::select! {
                () = cancel.cancelled() => break,
                msg = rx.recv() => msg,
            };
            match msg {
                Some(msg) => actor.handle(msg, &mut ctx).await,
                None => break,
            }
        }

        rx.close();
        actor.on_stop().await;
        trace!(actor = id, "actor stopped");
    }));

    handle
}
