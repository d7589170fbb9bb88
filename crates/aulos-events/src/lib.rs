#![forbid(unsafe_code)]

//! Unified event bus for the aulos playback engine.

mod bus;
mod event;
mod player;
mod session;

pub use bus::EventBus;
pub use event::Event;
pub use player::PlayerEvent;
pub use session::SessionEvent;
