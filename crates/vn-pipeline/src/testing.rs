//! Scripted [`MediaEngine`] and media fixtures for tests.
//!
//! "Media files" here are JSON-serialized [`MediaInfo`] documents.
//! [`FakeEngine`] probes by reading them back and transforms by writing the
//! `MediaInfo` a real remux or encode would have produced, so outputs can be
//! probed again by the verifier or a second normalization pass.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vn_av::{
    AudioEncode, EncodeProgress, MediaEngine, MediaInfo, ProbeDepth, ProgressFn, RemuxRequest,
    StreamInfo, TranscodeRequest, VideoEncode,
};
use vn_core::{AudioCodec, Container, Error, StreamKind};

const MP4_FORMAT_NAME: &str = "mov,mp4,m4a,3gp,3g2,mj2";

/// Decrements `counter` if positive; returns whether it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process [`MediaEngine`] with failure injection and call accounting.
#[derive(Debug, Default)]
pub struct FakeEngine {
    probes: AtomicUsize,
    remuxes: AtomicUsize,
    transcodes: AtomicUsize,
    failing_remuxes: AtomicUsize,
    failing_transcodes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    transcode_delay: Option<Duration>,
    last_remux: Mutex<Option<RemuxRequest>>,
    last_transcode: Mutex<Option<TranscodeRequest>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transcode take `delay` (cut short by cancellation).
    pub fn with_transcode_delay(mut self, delay: Duration) -> Self {
        self.transcode_delay = Some(delay);
        self
    }

    /// The next `n` remuxes fail like a crashed ffmpeg.
    pub fn fail_next_remuxes(&self, n: usize) {
        self.failing_remuxes.store(n, Ordering::SeqCst);
    }

    /// The next `n` transcodes fail like a crashed ffmpeg.
    pub fn fail_next_transcodes(&self, n: usize) {
        self.failing_transcodes.store(n, Ordering::SeqCst);
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn remux_calls(&self) -> usize {
        self.remuxes.load(Ordering::SeqCst)
    }

    pub fn transcode_calls(&self) -> usize {
        self.transcodes.load(Ordering::SeqCst)
    }

    pub fn last_remux(&self) -> Option<RemuxRequest> {
        lock(&self.last_remux).clone()
    }

    pub fn last_transcode(&self) -> Option<TranscodeRequest> {
        lock(&self.last_transcode).clone()
    }

    /// Highest number of transcodes observed running at once.
    pub fn max_concurrent_transcodes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn read_media(path: &Path) -> vn_core::Result<MediaInfo> {
        let bytes = std::fs::read(path).map_err(|e| Error::probe(path, e.to_string()))?;
        let mut media: MediaInfo = serde_json::from_slice(&bytes)
            .map_err(|_| Error::probe(path, "invalid data found when processing input"))?;
        media.file_path = path.to_path_buf();
        Ok(media)
    }

    async fn run_transcode(
        &self,
        req: &TranscodeRequest,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> vn_core::Result<()> {
        if let Some(delay) = self.transcode_delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled { tool: "ffmpeg".into() });
                }
            }
        }
        if take_one(&self.failing_transcodes) {
            return Err(Error::tool("ffmpeg", "simulated crash"));
        }

        let source = Self::read_media(&req.input).map_err(|e| Error::tool("ffmpeg", e.to_string()))?;
        write_media(&req.output, &simulate_transcode(&source, req));
        on_progress(EncodeProgress {
            pct: Some(1.0),
            done: true,
            ..EncodeProgress::default()
        });
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(
        &self,
        path: &Path,
        _depth: ProbeDepth,
        cancel: &CancellationToken,
    ) -> vn_core::Result<MediaInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { tool: "ffprobe".into() });
        }
        Self::read_media(path)
    }

    async fn remux(&self, req: &RemuxRequest, cancel: &CancellationToken) -> vn_core::Result<()> {
        self.remuxes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_remux) = Some(req.clone());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { tool: "ffmpeg".into() });
        }
        if take_one(&self.failing_remuxes) {
            return Err(Error::tool("ffmpeg", "simulated crash"));
        }

        let source = Self::read_media(&req.input).map_err(|e| Error::tool("ffmpeg", e.to_string()))?;
        write_media(&req.output, &simulate_remux(&source, req));
        Ok(())
    }

    async fn transcode(
        &self,
        req: &TranscodeRequest,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> vn_core::Result<()> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_transcode) = Some(req.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.run_transcode(req, on_progress, cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn retag_aac(stream: &mut StreamInfo) {
    if AudioCodec::from_codec_name(&stream.codec_name) == AudioCodec::Aac {
        stream.codec_tag = Some("mp4a".into());
    }
}

fn output_media(source: &MediaInfo, output: &Path, container: Container, streams: Vec<StreamInfo>) -> MediaInfo {
    let streams = streams
        .into_iter()
        .enumerate()
        .map(|(i, mut s)| {
            s.index = i as u32;
            s
        })
        .collect();
    MediaInfo {
        file_path: output.to_path_buf(),
        file_size: source.file_size,
        container,
        format_name: match container {
            Container::Mp4 => MP4_FORMAT_NAME.into(),
            other => other.to_string(),
        },
        duration: source.duration,
        streams,
    }
}

/// What a stream-copy remux of `source` produces.
pub fn simulate_remux(source: &MediaInfo, req: &RemuxRequest) -> MediaInfo {
    let mp4 = req.container == Container::Mp4;
    let mut streams: Vec<StreamInfo> = source
        .streams_of(StreamKind::Video)
        .chain(source.streams_of(StreamKind::Audio))
        .cloned()
        .collect();
    for s in &mut streams {
        match s.kind {
            StreamKind::Audio if req.retag_aac || mp4 => retag_aac(s),
            StreamKind::Video if mp4 && s.codec_name == "h264" => s.codec_tag = Some("avc1".into()),
            _ => {}
        }
    }
    output_media(source, &req.output, req.container, streams)
}

fn codec_for_encoder(encoder: &str) -> &'static str {
    if encoder == "libx265" || encoder.starts_with("hevc_") {
        "hevc"
    } else {
        "h264"
    }
}

/// `"5.2"` to ffprobe's 52.
fn parse_level(level: &str) -> Option<i32> {
    level.parse::<f64>().ok().map(|v| (v * 10.0).round() as i32)
}

fn pick(source: &MediaInfo, kind: StreamKind, index: Option<u32>) -> Option<StreamInfo> {
    match index {
        Some(i) => source.streams.iter().find(|s| s.index == i && s.kind == kind),
        None => source.streams_of(kind).next(),
    }
    .cloned()
}

/// What a re-encode of `source` produces.
pub fn simulate_transcode(source: &MediaInfo, req: &TranscodeRequest) -> MediaInfo {
    let mp4 = req.container == Container::Mp4;
    let mut streams = Vec::new();

    if let Some(mut video) = pick(source, StreamKind::Video, req.video_index) {
        if let VideoEncode::Encode {
            encoder,
            profile,
            level,
            scale,
            ..
        } = &req.video
        {
            let codec = codec_for_encoder(encoder);
            video.codec_name = codec.into();
            // Without an explicit profile or level the encoder's choice
            // follows the source.
            if let Some(p) = profile {
                video.profile = Some(match p.as_str() {
                    "baseline" => "Baseline".into(),
                    "main" => "Main".into(),
                    "high" => "High".into(),
                    other => other.into(),
                });
            }
            if let Some(l) = level.as_deref().and_then(parse_level) {
                video.level = Some(l);
            }
            if let Some((w, h)) = scale {
                video.width = Some(*w);
                video.height = Some(*h);
            }
            let tag = if codec == "hevc" { "hvc1" } else { "avc1" };
            video.codec_tag = mp4.then(|| tag.into());
        }
        streams.push(video);
    }

    if let Some(mut audio) = pick(source, StreamKind::Audio, req.audio_index) {
        match &req.audio {
            AudioEncode::Encode { encoder, channels, .. } => {
                audio.codec_name = encoder.trim_start_matches("lib").replace("mp3lame", "mp3");
                audio.profile = (encoder == "aac").then(|| "LC".into());
                audio.codec_tag = (mp4 && encoder == "aac").then(|| "mp4a".into());
                if channels.is_some() {
                    audio.channels = *channels;
                }
            }
            AudioEncode::Copy if mp4 => retag_aac(&mut audio),
            AudioEncode::Copy => {}
        }
        streams.push(audio);
    }

    output_media(source, &req.output, req.container, streams)
}

/// Write `media` to `path` as a fake media file.
pub fn write_media(path: &Path, media: &MediaInfo) {
    let json = serde_json::to_vec_pretty(media).expect("MediaInfo serializes");
    std::fs::write(path, json).expect("write fixture");
}

/// A one-minute file at `path`.
pub fn media_file(path: impl AsRef<Path>, container: Container, streams: Vec<StreamInfo>) -> MediaInfo {
    MediaInfo {
        file_path: path.as_ref().to_path_buf(),
        file_size: 48_000_000,
        container,
        format_name: match container {
            Container::Mp4 => MP4_FORMAT_NAME.into(),
            Container::Mkv | Container::Webm => "matroska,webm".into(),
            other => other.to_string(),
        },
        duration: Some(Duration::from_secs(60)),
        streams,
    }
}

fn video(index: u32, codec: &str, width: u32, height: u32) -> StreamInfo {
    let mut s = StreamInfo::new(index, StreamKind::Video, codec);
    s.width = Some(width);
    s.height = Some(height);
    s.frame_count = Some(1440);
    s.default = true;
    s
}

fn audio(index: u32, codec: &str, profile: Option<&str>) -> StreamInfo {
    let mut s = StreamInfo::new(index, StreamKind::Audio, codec);
    s.profile = profile.map(Into::into);
    s.channels = Some(2);
    s.sample_rate = Some(48_000);
    s.frame_count = Some(2813);
    s.default = true;
    s
}

/// 24fps H.264 High@4.0, one minute.
pub fn h264_video(index: u32, width: u32, height: u32) -> StreamInfo {
    let mut s = video(index, "h264", width, height);
    s.profile = Some("High".into());
    s.level = Some(40);
    s.codec_tag = Some("avc1".into());
    s
}

pub fn hevc_video(index: u32) -> StreamInfo {
    let mut s = video(index, "hevc", 1920, 1080);
    s.profile = Some("Main".into());
    s.level = Some(120);
    s.codec_tag = Some("hvc1".into());
    s
}

/// 4K AV1.
pub fn av1_video(index: u32) -> StreamInfo {
    let mut s = video(index, "av1", 3840, 2160);
    s.profile = Some("Main".into());
    s.level = Some(12);
    s
}

pub fn aac_audio(index: u32) -> StreamInfo {
    let mut s = audio(index, "aac", Some("LC"));
    s.codec_tag = Some("mp4a".into());
    s
}

/// HE-AAC without the `mp4a` sample entry tag.
pub fn he_aac_audio(index: u32) -> StreamInfo {
    audio(index, "aac", Some("HE-AAC"))
}

pub fn opus_audio(index: u32) -> StreamInfo {
    audio(index, "opus", None)
}
