//! # Sonavox
//!
//! A real-time spatial audio engine for games: music streams, one-shot effects
//! and looping ambient sources played against a 3D listener through a small,
//! fixed pool of hardware voices.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sonavox::*;
//! use std::sync::Arc;
//!
//! let engine = SonavoxEngine::spawn(
//!     SonavoxEngineDesc::default(),
//!     SoftwareDevice::open_default_output,
//!     Arc::new(SymphoniaCodec),
//!     Arc::new(|_channel: &ChannelId| 1.0),
//! )?;
//!
//! let music = AssetKey::new(FileAsset::new("music.ogg"));
//! engine.play_music(&music, SoundParams::new("music").gain(0.8), true)?;
//!
//! let step = AssetKey::new(FileAsset::new("step.wav"));
//! engine.play_sound(&step, SoundParams::new("sfx").spatial(DVec3::new(4.0, 0.0, -2.0)))?;
//!
//! // Move the listener as your camera/player moves
//! engine.set_listener(ListenerState::from_position(DVec3::new(1.0, 0.0, 0.0)))?;
//!
//! for event in engine.poll_events() {
//!     if let SonavoxEvent::StreamEnded { channel } = event {
//!         println!("{} finished", channel);
//!     }
//! }
//!
//! engine.dispose()?;
//! # Ok::<(), SonavoxError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`SonavoxEngine`]**: Handle to the engine thread; every command is a non-blocking enqueue
//! - **[`VoicePool`]**: The fixed table of hardware voices, shared by all requests
//! - **[`AudioCache`]**: Decoded sounds uploaded once per asset, with single-flight decoding
//! - **[`StreamPipeline`]**: Bounded block exchange between a stream's decode task and playback
//! - **[`SpatialOrigin`]**: Recentering of world coordinates before they reach the device
//! - **[`AudioDevice`]**: The voice API the engine drives, implemented by [`SoftwareDevice`]
//! - **[`Codec`]**: Pull-based decoding to 16-bit PCM, implemented by [`SymphoniaCodec`]
//!
//! ## Architecture
//!
//! 1. **Caller threads**: enqueue commands on a bounded queue and never wait
//! 2. **Engine thread**: drains commands, polls every active sound, updates the
//!    listener and recenters, then sleeps until the next tick or a new command
//! 3. **Decode threads**: turn assets into PCM and talk to the engine only
//!    through bounded channels
//!
//! All voice and buffer state lives on the engine thread, so none of it is locked.

pub mod asset;
pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod math;
pub mod origin;
pub mod pipeline;
pub mod voice_pool;

mod command;
mod entity;

#[cfg(test)]
pub(crate) mod test_support;

pub use asset::{AssetKey, AssetSource, ByteStream, FileAsset, MemoryAsset};
pub use backend::{
    AudioDevice, BufferHandle, DistanceModel, Orientation, PcmFormat, SoftwareDevice,
    SoftwareMixer, VoiceHandle, VoiceState,
};
pub use cache::{AudioCache, CacheLookup, CachedAudio};
pub use codec::{Codec, Decoder, PcmBlock, PullStatus, SymphoniaCodec};
pub use config::{ChannelId, Placement, SonavoxEngineDesc, SoundParams, VolumeFn};
pub use engine::SonavoxEngine;
pub use entity::StaticAudioHandle;
pub use error::{Result, SonavoxError};
pub use events::SonavoxEvent;
pub use math::{DVec3, ListenerState, Quat, Vec3};
pub use origin::SpatialOrigin;
pub use pipeline::StreamPipeline;
pub use voice_pool::VoicePool;
