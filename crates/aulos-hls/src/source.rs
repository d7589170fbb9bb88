//! The Source-contract adapter over a streaming session.
//!
//! [`HlsSource`] is thin by design: dequeue and format reads go straight to
//! the per-kind packet queues (which carry their own synchronization), and
//! everything stateful is posted into the session actor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aulos_core::{Format, StreamKind, TrackInfo};
use aulos_events::EventBus;
use aulos_net::Fetch;
use aulos_play::{Dequeue, PlayError, Source, SourceNotify};
use aulos_queue::PacketQueue;
use aulos_worker::Handle;
use tracing::debug;
use url::Url;

use crate::{
    config::HlsConfig,
    session::{SessionMsg, SessionShared, StreamingSession},
};

/// An adaptive HTTP-streaming [`Source`].
pub struct HlsSource {
    session: Handle<SessionMsg>,
    queues: HashMap<StreamKind, PacketQueue>,
    shared: Arc<SessionShared>,
}

impl HlsSource {
    /// Create a source for `url` and spawn its session actor.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(url: Url, fetch: Arc<dyn Fetch>, config: HlsConfig, bus: EventBus) -> Self {
        let queues: HashMap<StreamKind, PacketQueue> = StreamKind::ALL
            .into_iter()
            .map(|kind| (kind, PacketQueue::new()))
            .collect();
        let shared = Arc::new(SessionShared::new());

        debug!(url = %url, "creating streaming source");
        let session = aulos_worker::spawn(StreamingSession::new(
            url,
            fetch,
            Arc::new(config),
            bus,
            shared.clone(),
            queues.clone(),
        ));

        Self {
            session,
            queues,
            shared,
        }
    }
}

#[async_trait]
impl Source for HlsSource {
    fn prepare_async(&self, notify: SourceNotify) {
        self.session.post(SessionMsg::SetNotify { notify });
        self.session.post(SessionMsg::Connect);
    }

    fn start(&self) {
        // Connecting already starts the fetchers; nothing extra to do.
    }

    async fn stop(&self) {
        let _ = self
            .session
            .call(|reply| SessionMsg::Disconnect { reply })
            .await;
    }

    fn pause(&self) {
        self.session.post(SessionMsg::Pause);
    }

    fn resume(&self) {
        self.session.post(SessionMsg::Resume);
    }

    fn get_format(&self, kind: StreamKind) -> Option<Format> {
        if !self.shared.active().contains(kind) {
            return None;
        }
        self.queues.get(&kind)?.format()
    }

    fn dequeue_access_unit(&self, kind: StreamKind) -> Dequeue {
        if !self.shared.active().contains(kind) {
            return Dequeue::WouldBlock;
        }
        let Some(queue) = self.queues.get(&kind) else {
            return Dequeue::WouldBlock;
        };
        let result = queue.dequeue();
        if let Dequeue::Unit(unit) = &result {
            self.shared.note_dequeued(kind, unit.pts_us);
        }
        result
    }

    fn duration_us(&self) -> Option<i64> {
        let duration = self.shared.duration_us();
        (duration >= 0).then_some(duration)
    }

    async fn track_info(&self) -> Vec<TrackInfo> {
        self.session
            .call(|reply| SessionMsg::GetTrackInfo { reply })
            .await
            .unwrap_or_default()
    }

    async fn select_track(&self, index: usize, select: bool) -> Result<(), PlayError> {
        self.session
            .call(|reply| SessionMsg::SelectTrack {
                index,
                select,
                reply,
            })
            .await
            .map_err(|e| PlayError::Source(e.to_string()))?
    }

    fn seek_to(&self, time_us: i64) {
        self.session.post(SessionMsg::Seek { time_us });
    }

    fn is_real_time(&self) -> bool {
        self.shared.is_real_time()
    }
}
