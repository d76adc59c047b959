//! Stream-copy remux using ffmpeg.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vn_core::Container;

use crate::command::ToolCommand;

/// A lossless repackage of `input` into `output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub container: Container,
    /// Write AAC audio with the `mp4a` sample entry.
    pub retag_aac: bool,
}

impl RemuxRequest {
    /// The ffmpeg argument list for this request.
    ///
    /// Video streams are mapped before audio streams so the output has the
    /// canonical order; cover art, subtitles and data streams are dropped.
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-nostdin", "-hide_banner", "-i"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(self.input.to_string_lossy().to_string());

        // 0:V skips attached pictures; `?` tolerates missing kinds.
        args.extend(
            ["-map", "0:V?", "-map", "0:a?", "-c", "copy", "-map_metadata", "0"]
                .into_iter()
                .map(String::from),
        );

        if self.retag_aac {
            args.extend(["-tag:a", "mp4a"].into_iter().map(String::from));
        }

        if self.container == Container::Mp4 {
            args.extend(["-movflags", "+faststart"].into_iter().map(String::from));
        }
        if let Some(muxer) = self.container.muxer() {
            args.extend(["-f", muxer].into_iter().map(String::from));
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Run the remux described by `req`.
///
/// Errors are the raw [`ToolCommand`] errors; the pipeline decides how to
/// classify them.
pub async fn remux(
    ffmpeg: &Path,
    req: &RemuxRequest,
    cancel: &CancellationToken,
) -> vn_core::Result<()> {
    tracing::info!(
        "remux {:?} -> {:?} ({}, retag_aac={})",
        req.input,
        req.output,
        req.container,
        req.retag_aac
    );

    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    // Stream copy is I/O bound; an hour covers very large files.
    cmd.timeout(Duration::from_secs(3600));
    cmd.args(req.ffmpeg_args());
    cmd.cancel_on(cancel.clone());
    cmd.execute().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(retag: bool, container: Container) -> RemuxRequest {
        RemuxRequest {
            input: PathBuf::from("/in/a.mkv"),
            output: PathBuf::from("/tmp/.vidnorm-x/output.mp4"),
            container,
            retag_aac: retag,
        }
    }

    fn position(args: &[String], needle: &str) -> usize {
        args.iter().position(|a| a == needle).unwrap()
    }

    #[test]
    fn maps_video_before_audio_and_copies() {
        let args = request(false, Container::Mp4).ffmpeg_args();
        assert!(position(&args, "0:V?") < position(&args, "0:a?"));
        let c = position(&args, "-c");
        assert_eq!(args[c + 1], "copy");
        assert!(!args.iter().any(|a| a.starts_with("0:s") || a.starts_with("0:d")));
    }

    #[test]
    fn mp4_gets_faststart_and_muxer() {
        let args = request(false, Container::Mp4).ffmpeg_args();
        assert!(args.contains(&"+faststart".to_string()));
        let f = position(&args, "-f");
        assert_eq!(args[f + 1], "mp4");
        assert_eq!(args.last().unwrap(), "/tmp/.vidnorm-x/output.mp4");
    }

    #[test]
    fn retag_adds_mp4a_tag() {
        let args = request(true, Container::Mp4).ffmpeg_args();
        let t = position(&args, "-tag:a");
        assert_eq!(args[t + 1], "mp4a");
        assert!(!request(false, Container::Mp4).ffmpeg_args().contains(&"-tag:a".to_string()));
    }

    #[test]
    fn mkv_has_no_faststart() {
        let args = request(false, Container::Mkv).ffmpeg_args();
        assert!(!args.contains(&"+faststart".to_string()));
        let f = position(&args, "-f");
        assert_eq!(args[f + 1], "matroska");
    }
}
