//! Deterministic single-step driving of actors in tests.
//!
//! [`ActorHarness`] runs an actor without spawning its task: each message is
//! delivered by hand, and everything the actor posts to itself (including
//! arrived delayed posts) is captured for inspection or replay. This makes
//! multi-phase protocols testable step by step.

use tokio::sync::mpsc;

use crate::actor::{Actor, Context, Handle, context_is_stopped, detached_context};

/// Build a [`Handle`] whose posted messages pile up in the returned receiver
/// instead of being delivered to any actor task.
///
/// Test-only plumbing for capturing what a component posts to a collaborator
/// it was handed (e.g. a session handle given to a fetcher).
#[must_use]
pub fn capture_handle<M: Send + 'static>() -> (Handle<M>, mpsc::UnboundedReceiver<M>) {
    let (ctx, rx) = detached_context();
    (ctx.handle(), rx)
}

pub struct ActorHarness<A: Actor> {
    actor: A,
    ctx: Context<A::Msg>,
    rx: mpsc::UnboundedReceiver<A::Msg>,
}

impl<A: Actor> ActorHarness<A> {
    pub fn new(actor: A) -> Self {
        let (ctx, rx) = detached_context();
        Self { actor, ctx, rx }
    }

    /// The address other components post to; captured, not delivered.
    #[must_use]
    pub fn handle(&self) -> Handle<A::Msg> {
        self.ctx.handle()
    }

    /// Deliver one message to the actor.
    pub async fn deliver(&mut self, msg: A::Msg) {
        self.actor.handle(msg, &mut self.ctx).await;
    }

    /// Pop the next captured message without delivering it.
    pub fn next_captured(&mut self) -> Option<A::Msg> {
        self.rx.try_recv().ok()
    }

    /// Deliver every currently captured message, repeatedly, until the
    /// mailbox is quiet. Returns how many messages were delivered.
    pub async fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.actor.handle(msg, &mut self.ctx).await;
            delivered += 1;
        }
        delivered
    }

    /// Whether the actor asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        context_is_stopped(&self.ctx)
    }

    #[must_use]
    pub fn actor(&self) -> &A {
        &self.actor
    }

    #[must_use]
    pub fn actor_mut(&mut self) -> &mut A {
        &mut self.actor
    }
}
