//! Settings Persistence System
//!
//! Provides persistent editor/export settings with:
//! - Atomic file writes (temp file + rename)
//! - Schema defaults for missing fields
//! - Tolerant normalization of out-of-range values
//!
//! Storage location: {config_dir}/clipforge/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::core::{CoreError, CoreResult, Resolution};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "clipforge";

/// Default settings directory (`~/.config/clipforge` on Linux)
pub fn default_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Timeline editing settings
    #[serde(default)]
    pub editor: EditorSettings,

    /// Preview synchronization settings
    #[serde(default)]
    pub playback: PlaybackSettings,

    /// Export pipeline settings
    #[serde(default)]
    pub export: ExportSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            editor: EditorSettings::default(),
            playback: PlaybackSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl AppSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected instead of rejected so an old or hand-edited
    /// file never prevents startup.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let editor = &mut self.editor;
        editor.snap_interval_sec = clamp_f64(editor.snap_interval_sec, 0.01, 60.0);
        editor.track_count = editor.track_count.clamp(1, 16);
        editor.default_zoom = clamp_f64(editor.default_zoom, 1.0, 1000.0);
        editor.label_width = clamp_f64(editor.label_width, 0.0, 400.0);
        editor.ruler_height = clamp_f64(editor.ruler_height, 0.0, 200.0);
        editor.track_height = clamp_f64(editor.track_height, 16.0, 400.0);
        editor.trim_handle_px = clamp_f64(editor.trim_handle_px, 1.0, 32.0);
        editor.playhead_hotspot_px = clamp_f64(editor.playhead_hotspot_px, 1.0, 32.0);

        self.playback.sync_cooldown_ms = self.playback.sync_cooldown_ms.min(2_000);

        let export = &mut self.export;
        export.preset = normalize_enum(&export.preset, X264_PRESETS, default_preset());
        export.crf = export.crf.clamp(0, 51);
        if export.video_codec.trim().is_empty() {
            export.video_codec = default_video_codec();
        }
        if export.audio_codec.trim().is_empty() {
            export.audio_codec = default_audio_codec();
        }
        if !is_bitrate(&export.audio_bitrate) {
            export.audio_bitrate = default_audio_bitrate();
        }
        export.progress_interval_ms = export.progress_interval_ms.clamp(100, 5_000);
    }
}

const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

fn normalize_enum(value: &str, allowed: &[&str], fallback: String) -> String {
    if allowed.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        value.to_ascii_lowercase()
    } else {
        fallback
    }
}

/// Accepts FFmpeg-style bitrates such as `128k` or `2M`
fn is_bitrate(value: &str) -> bool {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M']);
    !digits.is_empty() && digits.len() + 1 >= value.len() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Timeline editing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditorSettings {
    /// Snap drops to the grid
    #[serde(default = "default_true")]
    pub snap_to_grid: bool,

    /// Grid interval in seconds
    #[serde(default = "default_snap_interval")]
    pub snap_interval_sec: f64,

    /// Number of tracks in a new workspace
    #[serde(default = "default_track_count")]
    pub track_count: usize,

    /// Zoom of a new workspace (pixels per second)
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,

    /// Track label column width (px)
    #[serde(default = "default_label_width")]
    pub label_width: f64,

    /// Time ruler height (px)
    #[serde(default = "default_ruler_height")]
    pub ruler_height: f64,

    /// Track row height (px)
    #[serde(default = "default_track_height")]
    pub track_height: f64,

    /// Trim hotspot half-width (px)
    #[serde(default = "default_trim_handle_px")]
    pub trim_handle_px: f64,

    /// Playhead hotspot half-width (px)
    #[serde(default = "default_playhead_hotspot_px")]
    pub playhead_hotspot_px: f64,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            snap_to_grid: true,
            snap_interval_sec: default_snap_interval(),
            track_count: default_track_count(),
            default_zoom: default_zoom(),
            label_width: default_label_width(),
            ruler_height: default_ruler_height(),
            track_height: default_track_height(),
            trim_handle_px: default_trim_handle_px(),
            playhead_hotspot_px: default_playhead_hotspot_px(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_snap_interval() -> f64 {
    0.1
}

fn default_track_count() -> usize {
    crate::core::timeline::DEFAULT_TRACK_COUNT
}

fn default_zoom() -> f64 {
    crate::core::timeline::DEFAULT_ZOOM
}

fn default_label_width() -> f64 {
    100.0
}

fn default_ruler_height() -> f64 {
    30.0
}

fn default_track_height() -> f64 {
    80.0
}

fn default_trim_handle_px() -> f64 {
    8.0
}

fn default_playhead_hotspot_px() -> f64 {
    6.0
}

/// Preview synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSettings {
    /// Window in which an update echoing the other side is ignored (ms)
    #[serde(default = "default_sync_cooldown_ms")]
    pub sync_cooldown_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            sync_cooldown_ms: default_sync_cooldown_ms(),
        }
    }
}

impl PlaybackSettings {
    pub fn sync_cooldown(&self) -> Duration {
        Duration::from_millis(self.sync_cooldown_ms)
    }
}

fn default_sync_cooldown_ms() -> u64 {
    150
}

/// Export pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    /// Default output resolution
    #[serde(default)]
    pub default_resolution: Resolution,

    /// Video encoder
    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Encoder speed preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant rate factor (0-51)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Audio encoder
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate (e.g. "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Directory holding bundled ffmpeg/ffprobe binaries
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,

    /// Parent directory for per-job scratch space (system temp if unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Minimum spacing between progress events (ms)
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            default_resolution: Resolution::default(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            bundle_dir: None,
            temp_dir: None,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl ExportSettings {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_progress_interval_ms() -> u64 {
    100
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager rooted at `settings_dir`
    pub fn new(settings_dir: PathBuf) -> Self {
        Self {
            settings_path: settings_dir.join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        // Ensure parent directory exists so the lock file can be created.
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::SettingsError(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| {
                CoreError::SettingsError(format!("Failed to open settings lock file: {}", e))
            })?;

        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
        } else {
            fs2::FileExt::lock_shared(&lock_file)
        };
        locked.map_err(|e| CoreError::SettingsError(format!("Failed to lock settings file: {}", e)))?;

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or unreadable
    pub fn load(&self) -> AppSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AppSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AppSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            let temp_path = self.settings_path.with_extension("json.tmp");
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }

            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            drop(file);

            if cfg!(windows) && self.settings_path.exists() {
                // rename does not replace an existing file on Windows
                fs::remove_file(&self.settings_path)?;
            }
            fs::rename(&temp_path, &self.settings_path).map_err(|e| {
                CoreError::SettingsError(format!("Failed to finalize settings file: {}", e))
            })?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(AppSettings::default())
        })
    }
}
