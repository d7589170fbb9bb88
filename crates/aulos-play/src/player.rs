//! The public playback handle.
//!
//! [`Player`] is a thin cloneable front over the controller actor: every
//! operation posts a message; progress and completion arrive as
//! [`PlayerEvent`](aulos_events::PlayerEvent)s on the shared bus. `reset`,
//! `track_info` and `select_track` await their replies.

use std::sync::Arc;

use aulos_core::TrackInfo;
use aulos_events::{Event, EventBus};
use aulos_worker::Handle;
use tokio::sync::broadcast;

use crate::{
    controller::{Controller, PlayerMsg},
    decoder::DecoderFactory,
    error::PlayError,
    renderer::RendererFactory,
    source::Source,
    types::{AudioSinkHandle, SurfaceHandle},
};

/// Host integration points for a [`Player`].
#[derive(Clone)]
pub struct PlayerConfig {
    pub decoder_factory: DecoderFactory,
    pub renderer_factory: RendererFactory,
}

/// A playback session: one source, up to two decoders, one renderer.
#[derive(Clone)]
pub struct Player {
    handle: Handle<PlayerMsg>,
    bus: EventBus,
}

impl Player {
    /// Spawn the controller actor. Must be called from a tokio runtime.
    #[must_use]
    pub fn new(config: PlayerConfig, bus: EventBus) -> Self {
        let handle = aulos_worker::spawn(Controller::new(config, bus.clone()));
        Self { handle, bus }
    }

    pub fn set_data_source(&self, source: Arc<dyn Source>) {
        self.handle.post(PlayerMsg::SetDataSource { source });
    }

    /// Begin preparing; completion arrives as `PlayerEvent::PrepareComplete`.
    pub fn prepare_async(&self) {
        self.handle.post(PlayerMsg::Prepare);
    }

    pub fn start(&self) {
        self.handle.post(PlayerMsg::Start);
    }

    pub fn pause(&self) {
        self.handle.post(PlayerMsg::Pause);
    }

    pub fn resume(&self) {
        self.handle.post(PlayerMsg::Resume);
    }

    /// Reposition; completion arrives as `PlayerEvent::SeekComplete`.
    pub fn seek_to(&self, time_us: i64) {
        self.handle.post(PlayerMsg::SeekTo { time_us });
    }

    /// Tear everything down and return to idle; resolves once the source has
    /// been released.
    pub async fn reset(&self) -> Result<(), PlayError> {
        self.handle
            .call(|reply| PlayerMsg::Reset { reply })
            .await
            .map_err(|_| PlayError::PlayerGone)
    }

    pub fn set_surface(&self, surface: Option<SurfaceHandle>) {
        self.handle.post(PlayerMsg::SetSurface { surface });
    }

    pub fn set_audio_sink(&self, sink: Option<AudioSinkHandle>) {
        self.handle.post(PlayerMsg::SetAudioSink { sink });
    }

    pub async fn track_info(&self) -> Result<Vec<TrackInfo>, PlayError> {
        self.handle
            .call(|reply| PlayerMsg::GetTrackInfo { reply })
            .await
            .map_err(|_| PlayError::PlayerGone)
    }

    pub async fn select_track(&self, index: usize, select: bool) -> Result<(), PlayError> {
        self.handle
            .call(|reply| PlayerMsg::SelectTrack {
                index,
                select,
                reply,
            })
            .await
            .map_err(|_| PlayError::PlayerGone)?
    }

    /// Subscribe to player and session events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }
}
