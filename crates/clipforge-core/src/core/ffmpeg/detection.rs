//! FFmpeg Detection Module
//!
//! Locates FFmpeg/FFprobe binaries. A bundled copy is always preferred; the
//! system installation is used only as a fallback and the caller is handed a
//! warning to surface.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FFmpegError, FFmpegResult};
use crate::core::process::configure_std_command;

/// Information about a resolved FFmpeg installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary, when one was found next to ffmpeg or on the system
    pub ffprobe_path: Option<PathBuf>,
    /// Whether ffmpeg came from the bundle directory
    pub is_bundled: bool,
}

/// Result of binary resolution
#[derive(Debug, Clone)]
pub struct ResolvedBinaries {
    pub info: FFmpegInfo,
    /// Set when the bundled binary was unavailable and the system one is used
    pub warning: Option<String>,
}

/// Target triple used in bundled binary names
pub fn target_triple() -> &'static str {
    if cfg!(all(target_os = "windows", target_arch = "x86_64")) {
        "x86_64-pc-windows-msvc"
    } else if cfg!(all(target_os = "windows", target_arch = "aarch64")) {
        "aarch64-pc-windows-msvc"
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        "aarch64-apple-darwin"
    } else if cfg!(target_os = "macos") {
        "x86_64-apple-darwin"
    } else if cfg!(all(target_os = "linux", target_arch = "aarch64")) {
        "aarch64-unknown-linux-gnu"
    } else {
        "x86_64-unknown-linux-gnu"
    }
}

/// Bundled name of a tool, e.g. `ffmpeg-x86_64-unknown-linux-gnu`
pub fn platform_binary_name(base: &str) -> String {
    format!("{}-{}{}", base, target_triple(), std::env::consts::EXE_SUFFIX)
}

/// Plain executable name, e.g. `ffmpeg` or `ffmpeg.exe`
pub fn executable_name(base: &str) -> String {
    format!("{}{}", base, std::env::consts::EXE_SUFFIX)
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Finds `base` in a bundle directory, platform-suffixed name first
fn find_bundled(dir: &Path, base: &str) -> Option<PathBuf> {
    [platform_binary_name(base), executable_name(base)]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| is_executable(path))
}

fn find_in_dirs(dirs: &[PathBuf], base: &str) -> Option<PathBuf> {
    let name = executable_name(base);
    dirs.iter()
        .map(|dir| dir.join(&name))
        .find(|path| is_executable(path))
}

/// Directories searched for a system installation: `PATH` followed by
/// well-known install locations
pub fn system_search_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    for path in get_common_ffmpeg_paths() {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));

        // Chocolatey
        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }
        // Scoop
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin")); // MacPorts
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Resolves which ffmpeg/ffprobe binaries a job should run
#[derive(Debug, Clone)]
pub struct FFmpegLocator {
    bundle_dir: Option<PathBuf>,
    search_paths: Option<Vec<PathBuf>>,
    allow_system: bool,
}

impl Default for FFmpegLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FFmpegLocator {
    pub fn new() -> Self {
        Self {
            bundle_dir: None,
            search_paths: None,
            allow_system: true,
        }
    }

    pub fn with_bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    /// Replaces the system search directories
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = Some(paths);
        self
    }

    /// Only bundled binaries are accepted
    pub fn without_system(mut self) -> Self {
        self.allow_system = false;
        self
    }

    pub fn bundle_dir(&self) -> Option<&Path> {
        self.bundle_dir.as_deref()
    }

    fn system_dirs(&self) -> Vec<PathBuf> {
        match &self.search_paths {
            Some(paths) => paths.clone(),
            None => system_search_paths(),
        }
    }

    /// Bundled binary first, then system `ffmpeg` with a warning
    pub fn resolve(&self) -> FFmpegResult<ResolvedBinaries> {
        let system_dirs = if self.allow_system {
            self.system_dirs()
        } else {
            Vec::new()
        };

        if let Some(dir) = &self.bundle_dir {
            if let Some(ffmpeg_path) = find_bundled(dir, "ffmpeg") {
                let ffprobe_path =
                    find_bundled(dir, "ffprobe").or_else(|| find_in_dirs(&system_dirs, "ffprobe"));
                return Ok(ResolvedBinaries {
                    info: FFmpegInfo {
                        ffmpeg_path,
                        ffprobe_path,
                        is_bundled: true,
                    },
                    warning: None,
                });
            }
        }

        if !self.allow_system {
            return Err(FFmpegError::NotFound);
        }

        let ffmpeg_path = find_in_dirs(&system_dirs, "ffmpeg").ok_or(FFmpegError::NotFound)?;
        let ffprobe_path = find_in_dirs(&system_dirs, "ffprobe");
        let warning = match &self.bundle_dir {
            Some(dir) => format!(
                "Bundled FFmpeg not found in {}; falling back to system binary at {}",
                dir.display(),
                ffmpeg_path.display()
            ),
            None => format!(
                "No bundled FFmpeg configured; falling back to system binary at {}",
                ffmpeg_path.display()
            ),
        };

        Ok(ResolvedBinaries {
            info: FFmpegInfo {
                ffmpeg_path,
                ffprobe_path,
                is_bundled: false,
            },
            warning: Some(warning),
        })
    }
}

/// Get FFmpeg version string by running `ffmpeg -version`
pub fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let mut cmd = Command::new(ffmpeg_path);
    configure_std_command(&mut cmd);
    let output = cmd.arg("-version").output()?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    parse_version_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses the first line of `ffmpeg -version`: "ffmpeg version X.X.X ..."
pub fn parse_version_output(output: &str) -> FFmpegResult<String> {
    let first_line = output
        .lines()
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))?;

    if let Some(version) = first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
    {
        return Ok(version.to_string());
    }
    Ok(first_line.to_string())
}
