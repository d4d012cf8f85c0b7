mod engine_desc;
mod sound_params;

pub use engine_desc::SonavoxEngineDesc;
pub use sound_params::{ChannelId, Placement, SoundParams, VolumeFn};
