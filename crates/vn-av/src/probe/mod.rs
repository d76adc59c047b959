//! Media inspection: the [`MediaInfo`] model and the ffprobe backend that
//! produces it.

pub mod ffprobe;
pub mod types;

pub use self::ffprobe::FfprobeProber;
pub use self::types::{MediaInfo, ProbeDepth, StreamInfo};
