//! Transcode Command Builder
//!
//! A pure, serializable description of one FFmpeg/FFprobe invocation.
//! Nothing here spawns processes or touches the filesystem; `build_args`
//! renders the ordered argument vector that the runner hands to the binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{FFmpegError, FFmpegResult};
use crate::core::TimeSec;

/// Default encode settings used by [`TranscodeCommand::encode`]
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_PRESET: &str = "medium";
pub const DEFAULT_CRF: u8 = 23;
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Which binary the command targets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Ffmpeg,
    Ffprobe,
}

/// Video scaling applied through `-vf`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ScaleMode {
    /// Fit inside the frame and pad the remainder with black
    Fit { width: u32, height: u32 },
    /// Fill the frame and crop the overflow
    Cover { width: u32, height: u32 },
    /// Round source dimensions down to even numbers
    Even,
}

impl ScaleMode {
    fn filter(&self) -> String {
        match *self {
            ScaleMode::Fit { width, height } => format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
                w = width,
                h = height
            ),
            ScaleMode::Cover { width, height } => format!(
                "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}:(iw-{w})/2:(ih-{h})/2",
                w = width,
                h = height
            ),
            ScaleMode::Even => "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEncode {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
}

impl Default for VideoEncode {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEncode {
    pub codec: String,
    pub bitrate: String,
}

impl Default for AudioEncode {
    fn default() -> Self {
        Self {
            codec: DEFAULT_AUDIO_CODEC.to_string(),
            bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

/// Codec handling. Encoding and stream copy exclude each other; whichever
/// setter ran last decides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum CodecMode {
    /// Let FFmpeg pick codecs from the output extension
    #[default]
    Auto,
    Encode {
        video: Option<VideoEncode>,
        audio: Option<AudioEncode>,
    },
    StreamCopy,
}

/// One transcoder invocation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeCommand {
    tool: Tool,
    input: Option<PathBuf>,
    concat_list: Option<PathBuf>,
    seek: Option<TimeSec>,
    duration: Option<TimeSec>,
    thumbnail_at: Option<TimeSec>,
    scale: Option<ScaleMode>,
    pixel_format: Option<String>,
    volume: Option<f64>,
    muted: bool,
    codec: CodecMode,
    progress: bool,
    output: Option<PathBuf>,
}

impl TranscodeCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// FFprobe invocation emitting format and stream info as JSON
    pub fn probe(path: impl Into<PathBuf>) -> Self {
        Self {
            tool: Tool::Ffprobe,
            input: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    /// Reads inputs from a concat demuxer manifest instead of a single file
    pub fn concat_list(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.concat_list = Some(manifest.into());
        self
    }

    /// Reads `duration` seconds starting at `start` of the input
    pub fn trim(mut self, start: TimeSec, duration: TimeSec) -> Self {
        self.seek = Some(start);
        self.duration = Some(duration);
        self
    }

    /// Fits into `width`x`height`, preserving aspect ratio with padding
    pub fn scale(mut self, width: u32, height: u32) -> Self {
        self.scale = Some(ScaleMode::Fit { width, height });
        self
    }

    /// Fills `width`x`height`, cropping the overflow
    pub fn scale_cover(mut self, width: u32, height: u32) -> Self {
        self.scale = Some(ScaleMode::Cover { width, height });
        self
    }

    pub fn scale_even(mut self) -> Self {
        self.scale = Some(ScaleMode::Even);
        self
    }

    pub fn video_encode(mut self, codec: impl Into<String>, preset: impl Into<String>, crf: u8) -> Self {
        let video = VideoEncode {
            codec: codec.into(),
            preset: preset.into(),
            crf,
        };
        self.codec = match self.codec {
            CodecMode::Encode { audio, .. } => CodecMode::Encode {
                video: Some(video),
                audio,
            },
            _ => CodecMode::Encode {
                video: Some(video),
                audio: None,
            },
        };
        self
    }

    pub fn audio_encode(mut self, codec: impl Into<String>, bitrate: impl Into<String>) -> Self {
        let audio = AudioEncode {
            codec: codec.into(),
            bitrate: bitrate.into(),
        };
        self.codec = match self.codec {
            CodecMode::Encode { video, .. } => CodecMode::Encode {
                video,
                audio: Some(audio),
            },
            _ => CodecMode::Encode {
                video: None,
                audio: Some(audio),
            },
        };
        self
    }

    /// H.264 medium/23 with AAC 128k
    pub fn encode(mut self) -> Self {
        self.codec = CodecMode::Encode {
            video: Some(VideoEncode::default()),
            audio: Some(AudioEncode::default()),
        };
        self
    }

    pub fn stream_copy(mut self) -> Self {
        self.codec = CodecMode::StreamCopy;
        self
    }

    pub fn pixel_format(mut self, format: impl Into<String>) -> Self {
        self.pixel_format = Some(format.into());
        self
    }

    /// Audio gain, clamped to 0.0-1.0. Unity gain adds no filter.
    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume.clamp(0.0, 1.0));
        self
    }

    pub fn mute(mut self) -> Self {
        self.muted = true;
        self
    }

    /// Grabs a single frame at `time`
    pub fn thumbnail(mut self, time: TimeSec) -> Self {
        self.thumbnail_at = Some(time);
        self
    }

    pub fn enable_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    pub fn codec_mode(&self) -> &CodecMode {
        &self.codec
    }

    pub fn progress_enabled(&self) -> bool {
        self.progress
    }

    fn audio_filter(&self) -> Option<String> {
        if self.thumbnail_at.is_some() {
            return None;
        }
        if self.muted {
            return Some("volume=0".to_string());
        }
        match self.volume {
            Some(v) if v < 1.0 => Some(format!("volume={}", v)),
            _ => None,
        }
    }

    /// Checks the combination of settings without touching the filesystem
    pub fn validate(&self) -> FFmpegResult<()> {
        if self.tool == Tool::Ffprobe {
            return match self.input {
                Some(_) => Ok(()),
                None => Err(FFmpegError::InvalidInput("probe requires an input".to_string())),
            };
        }

        match (&self.input, &self.concat_list) {
            (None, None) => {
                return Err(FFmpegError::InvalidInput("no input specified".to_string()))
            }
            (Some(_), Some(_)) => {
                return Err(FFmpegError::InvalidInput(
                    "input and concat list are mutually exclusive".to_string(),
                ))
            }
            _ => {}
        }
        if self.output.is_none() {
            return Err(FFmpegError::InvalidInput("no output specified".to_string()));
        }

        if let Some(start) = self.seek {
            if !start.is_finite() || start < 0.0 {
                return Err(FFmpegError::InvalidInput(format!(
                    "trim start must be non-negative, got {}",
                    start
                )));
            }
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(FFmpegError::InvalidInput(format!(
                    "trim duration must be positive, got {}",
                    duration
                )));
            }
        }
        if let Some(t) = self.thumbnail_at {
            if !t.is_finite() || t < 0.0 {
                return Err(FFmpegError::InvalidInput(format!(
                    "thumbnail time must be non-negative, got {}",
                    t
                )));
            }
        }
        if let Some(v) = self.volume {
            if !v.is_finite() {
                return Err(FFmpegError::InvalidInput("volume must be finite".to_string()));
            }
        }

        match self.scale {
            Some(ScaleMode::Fit { width, height }) | Some(ScaleMode::Cover { width, height })
                if width == 0 || height == 0 =>
            {
                return Err(FFmpegError::InvalidInput(format!(
                    "invalid scale {}x{}",
                    width, height
                )));
            }
            _ => {}
        }

        if self.codec == CodecMode::StreamCopy {
            if self.scale.is_some() || self.pixel_format.is_some() {
                return Err(FFmpegError::InvalidInput(
                    "video filters require re-encoding, not stream copy".to_string(),
                ));
            }
            if self.thumbnail_at.is_some() {
                return Err(FFmpegError::InvalidInput(
                    "thumbnails cannot be stream copied".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Renders the ordered argument vector (program name excluded)
    pub fn build_args(&self) -> FFmpegResult<Vec<String>> {
        self.validate()?;

        let mut args: Vec<String> = Vec::new();

        if self.tool == Tool::Ffprobe {
            args.extend(
                ["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"]
                    .map(String::from),
            );
            if let Some(input) = &self.input {
                args.push(path_arg(input));
            }
            return Ok(args);
        }

        if let Some(list) = &self.concat_list {
            args.extend(["-f", "concat", "-safe", "0", "-i"].map(String::from));
            args.push(path_arg(list));
        } else if let Some(input) = &self.input {
            // Input-side seek; a thumbnail time wins over a trim start.
            if let Some(at) = self.thumbnail_at.or(self.seek) {
                args.push("-ss".to_string());
                args.push(format_time(at));
            }
            if self.thumbnail_at.is_none() {
                if let Some(duration) = self.duration {
                    args.push("-t".to_string());
                    args.push(format_time(duration));
                }
            }
            args.push("-i".to_string());
            args.push(path_arg(input));
        }

        if let Some(scale) = &self.scale {
            args.push("-vf".to_string());
            args.push(scale.filter());
        }

        let audio_filter = self.audio_filter();
        if let Some(filter) = &audio_filter {
            args.push("-af".to_string());
            args.push(filter.clone());
        }

        match &self.codec {
            CodecMode::Auto => {}
            CodecMode::StreamCopy => {
                if audio_filter.is_some() {
                    args.extend(
                        ["-c:v", "copy", "-c:a", DEFAULT_AUDIO_CODEC].map(String::from),
                    );
                } else {
                    args.extend(["-c", "copy"].map(String::from));
                }
                args.extend(["-avoid_negative_ts", "make_zero"].map(String::from));
            }
            CodecMode::Encode { video, audio } => {
                if let Some(video) = video {
                    args.push("-c:v".to_string());
                    args.push(video.codec.clone());
                    args.push("-preset".to_string());
                    args.push(video.preset.clone());
                    args.push("-crf".to_string());
                    args.push(video.crf.to_string());
                }
                if let Some(audio) = audio {
                    args.push("-c:a".to_string());
                    args.push(audio.codec.clone());
                    args.push("-b:a".to_string());
                    args.push(audio.bitrate.clone());
                }
            }
        }

        if let Some(pix_fmt) = &self.pixel_format {
            args.push("-pix_fmt".to_string());
            args.push(pix_fmt.clone());
        }

        if self.thumbnail_at.is_some() {
            args.push("-vframes".to_string());
            args.push("1".to_string());
        }

        if self.progress {
            args.extend(["-progress", "pipe:1", "-nostats"].map(String::from));
        }

        args.push("-y".to_string());
        if let Some(output) = &self.output {
            args.push(path_arg(output));
        }

        Ok(args)
    }
}

/// Seconds with millisecond precision
pub fn format_time(seconds: TimeSec) -> String {
    format!("{:.3}", seconds)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Renders a concat demuxer manifest, one `file '<path>'` line per input
pub fn concat_manifest<P: AsRef<Path>>(paths: &[P]) -> String {
    let mut manifest = String::new();
    for path in paths {
        let escaped = path.as_ref().to_string_lossy().replace('\'', "'\\''");
        manifest.push_str("file '");
        manifest.push_str(&escaped);
        manifest.push_str("'\n");
    }
    manifest
}
