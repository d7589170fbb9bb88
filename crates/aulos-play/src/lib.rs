#![forbid(unsafe_code)]

//! Playback controller for the aulos engine.
//!
//! The [`Player`] drives an abstract [`Source`], up to two decoders and a
//! renderer through an asynchronous, message-driven lifecycle. The hard part
//! lives in the controller's dual-track flush protocol and deferred-action
//! queue; sources, decoders and renderers are trait contracts implemented
//! elsewhere.

mod controller;
mod error;
mod player;
mod types;

pub mod decoder;
pub mod mock;
pub mod renderer;
pub mod source;

pub use decoder::{Decoder, DecoderEvent, DecoderFactory, DecoderInput, DecoderNotify};
pub use error::PlayError;
pub use player::{Player, PlayerConfig};
pub use renderer::{Renderer, RendererEvent, RendererFactory, RendererNotify};
pub use source::{Dequeue, Source, SourceEvent, SourceFlags, SourceInfo, SourceNotify};
pub use types::{AudioSinkHandle, FlushStatus, PlayState, SurfaceHandle};
