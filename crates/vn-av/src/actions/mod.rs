//! ffmpeg actions: lossless stream-copy remux and full re-encode.

mod remux;
mod transcode;

pub use remux::{remux, RemuxRequest};
pub use transcode::{
    adaptive_crf, audio_encoder_for, fit_h264_level, h264_level_name, h264_max_frame_macroblocks,
    resolve_hw_accel, software_encoder_for, transcode, AudioEncode, EncodeProgress, HwAccel,
    ProgressParser, Quality, TranscodeRequest, VideoEncode,
};
