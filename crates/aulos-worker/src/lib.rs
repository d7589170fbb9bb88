#![forbid(unsafe_code)]

//! Single-threaded cooperative actor primitives.
//!
//! Every stateful aulos component (playback controller, streaming session,
//! segment fetcher) is an [`Actor`]: one tokio task draining one typed
//! message channel, processing each message to completion before the next.
//! State owned by an actor is touched only from its own task, so none of it
//! needs locking.
//!
//! Cross-actor interaction is message posting via [`Handle`]. Two extras
//! cover the recurring patterns:
//!
//! - **Delayed messages + generations**: [`Handle::post_delayed`] delivers a
//!   message later; cancellation is done by bumping a [`Generation`] counter
//!   and discarding stale messages on arrival, never by removing them from a
//!   timer queue.
//! - **Post-and-await-reply**: [`Handle::call`] sends a message carrying a
//!   oneshot sender and awaits the reply. It must not be invoked from the
//!   target actor's own handler (that would deadlock); debug builds check
//!   this.

mod actor;
mod generation;
pub mod testing;

pub use actor::{Actor, CallError, Context, Handle, spawn};
pub use generation::Generation;
