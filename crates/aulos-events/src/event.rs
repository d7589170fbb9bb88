use crate::{PlayerEvent, SessionEvent};

/// Any event published on the [`crate::EventBus`].
#[derive(Clone, Debug)]
pub enum Event {
    Player(PlayerEvent),
    Session(SessionEvent),
}

impl From<PlayerEvent> for Event {
    fn from(event: PlayerEvent) -> Self {
        Event::Player(event)
    }
}

impl From<SessionEvent> for Event {
    fn from(event: SessionEvent) -> Self {
        Event::Session(event)
    }
}
