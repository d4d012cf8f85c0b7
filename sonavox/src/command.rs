use crate::asset::AssetKey;
use crate::config::{ChannelId, SoundParams};
use crate::entity::StaticAudioHandle;
use crate::math::ListenerState;
use std::time::Instant;

/// Commands sent from caller threads to the engine thread.
///
/// Processed in enqueue order per producer, all before the next tick's polling.
pub(crate) enum EngineCommand {
    PlayEffect {
        asset: AssetKey,
        params: SoundParams,
        created_at: Instant,
    },
    PlayStatic {
        asset: AssetKey,
        params: SoundParams,
        looping: bool,
        handle: StaticAudioHandle,
    },
    PlayStream {
        asset: AssetKey,
        params: SoundParams,
        looping: bool,
    },
    Stop(ChannelId),
    SetListener(ListenerState),
    Enable,
    Disable,
    ClearCache,
    Shutdown,
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayEffect { .. } => "PlayEffect",
            Self::PlayStatic { .. } => "PlayStatic",
            Self::PlayStream { .. } => "PlayStream",
            Self::Stop(_) => "Stop",
            Self::SetListener(_) => "SetListener",
            Self::Enable => "Enable",
            Self::Disable => "Disable",
            Self::ClearCache => "ClearCache",
            Self::Shutdown => "Shutdown",
        }
    }
}
