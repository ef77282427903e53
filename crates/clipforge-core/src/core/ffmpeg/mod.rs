//! FFmpeg Integration Module
//!
//! Everything that touches the external transcoder:
//! - Pure command descriptions (`builder`)
//! - Locating bundled or system binaries (`detection`)
//! - `-progress` stream parsing and throttling (`progress`)
//! - Process execution, probing and short operations (`runner`)
//!
//! Bundled binaries follow the sidecar naming convention
//! `ffmpeg-<target-triple>[.exe]`; a plain `ffmpeg` in the bundle directory is
//! accepted as well before falling back to the system installation.

mod builder;
mod detection;
mod progress;
mod runner;

pub use builder::*;
pub use detection::*;
pub use progress::*;
pub use runner::*;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Install FFmpeg or place bundled binaries in the bundle directory.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("FFmpeg reported success but produced no output: {0}")]
    OutputMissing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("FFmpeg process cancelled")]
    Cancelled,
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_error_display() {
        let err = FFmpegError::NotFound;
        assert!(err.to_string().contains("FFmpeg not found"));

        let err = FFmpegError::ExecutionFailed("exit code 1".to_string());
        assert!(err.to_string().contains("exit code 1"));

        let err = FFmpegError::OutputMissing("/tmp/out.mp4".to_string());
        assert!(err.to_string().contains("/tmp/out.mp4"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FFmpegError = io.into();
        assert!(matches!(err, FFmpegError::ProcessError(_)));
    }
}
