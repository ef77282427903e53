//! Playback Synchronizer
//!
//! Two-way binding between the store's playhead and a preview surface that
//! plays one source file at a time. Updates are tagged with their origin and
//! an update arriving shortly after one from the opposite side is treated as
//! an echo and dropped. Every source load carries a token so late ready/error
//! signals from a previous clip are ignored.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{
    settings::PlaybackSettings,
    timeline::{Clip, TimelineStore, Workspace},
    ClipId, CoreResult, SourceRef, TimeSec,
};

/// Which side produced an update
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateOrigin {
    FromStore,
    FromPreview,
}

/// Identifies one source load on the preview surface
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoadToken(pub u64);

/// The live preview the synchronizer drives
pub trait PreviewSurface {
    /// Starts loading a source. Completion is reported back through
    /// [`PlaybackSynchronizer::on_ready`] / [`PlaybackSynchronizer::on_error`]
    /// with the same token.
    fn load(&mut self, source: &SourceRef, token: LoadToken);
    /// Seeks the loaded source to a source-local time
    fn seek(&mut self, local_time: TimeSec);
    /// Shows a blank preview
    fn clear(&mut self);
}

/// Clip the preview should show: the selected clip if it still exists,
/// otherwise the clip under the playhead on the lowest track.
pub fn resolve_active_clip(workspace: &Workspace) -> Option<&Clip> {
    if let Some(selected) = workspace
        .selected_clip_id
        .as_deref()
        .and_then(|id| workspace.clip(id))
    {
        return Some(selected);
    }
    workspace
        .clips
        .iter()
        .filter(|c| c.contains(workspace.playhead))
        .min_by_key(|c| c.track)
}

/// Source-local time for a playhead position, frozen at the trim bounds
pub fn local_time(clip: &Clip, playhead: TimeSec) -> TimeSec {
    (clip.trim_start + (playhead - clip.timeline_start)).clamp(clip.trim_start, clip.trim_end)
}

/// Timeline time for a source-local position within the clip
pub fn timeline_time(clip: &Clip, local: TimeSec) -> TimeSec {
    let local = local.clamp(clip.trim_start, clip.trim_end);
    clip.timeline_start + (local - clip.trim_start)
}

/// What a synchronizer call did
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncAction {
    Unchanged,
    /// No active clip; preview cleared
    Unbound,
    #[serde(rename_all = "camelCase")]
    Loading { clip_id: ClipId, token: LoadToken },
    #[serde(rename_all = "camelCase")]
    Seeked { local_time: TimeSec },
    /// Seek stored until the surface reports ready
    #[serde(rename_all = "camelCase")]
    Parked { local_time: TimeSec },
    /// Echo of the opposite side, dropped
    Suppressed { origin: UpdateOrigin },
    /// Signal for a load that is no longer current
    Stale,
    #[serde(rename_all = "camelCase")]
    Ready { seeked: Option<TimeSec> },
    PlayheadMoved { playhead: TimeSec },
    LoadFailed { message: String },
}

#[derive(Debug, Clone)]
struct Binding {
    clip_id: ClipId,
    source_ref: SourceRef,
    token: LoadToken,
    ready: bool,
    pending_seek: Option<TimeSec>,
    last_seek: Option<TimeSec>,
}

fn within_cooldown(last: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    last.is_some_and(|t| now.saturating_duration_since(t) < cooldown)
}

/// Drives a [`PreviewSurface`] from store state and feeds preview time back
pub struct PlaybackSynchronizer<S: PreviewSurface> {
    surface: S,
    cooldown: Duration,
    binding: Option<Binding>,
    next_token: u64,
    last_store_update: Option<Instant>,
    last_preview_update: Option<Instant>,
    observed_version: Option<u64>,
}

impl<S: PreviewSurface> PlaybackSynchronizer<S> {
    pub fn new(surface: S, cooldown: Duration) -> Self {
        Self {
            surface,
            cooldown,
            binding: None,
            next_token: 0,
            last_store_update: None,
            last_preview_update: None,
            observed_version: None,
        }
    }

    pub fn from_settings(surface: S, settings: &PlaybackSettings) -> Self {
        Self::new(surface, settings.sync_cooldown())
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Clip currently bound to the preview
    pub fn bound_clip_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.clip_id.as_str())
    }

    /// Token of the current load
    pub fn current_token(&self) -> Option<LoadToken> {
        self.binding.as_ref().map(|b| b.token)
    }

    pub fn is_ready(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.ready)
    }

    /// Store -> preview. Call after commits and on every frame: unchanged
    /// store versions are skipped, and a store update that lands inside the
    /// cooldown stays pending until the first call after the window closes.
    pub fn observe_store(&mut self, store: &TimelineStore, now: Instant) -> SyncAction {
        let version = store.version();
        if self.observed_version == Some(version) {
            return SyncAction::Unchanged;
        }

        let workspace = store.workspace();
        let Some(clip) = resolve_active_clip(workspace) else {
            self.observed_version = Some(version);
            if let Some(previous) = self.binding.take() {
                debug!("Preview unbound from clip {}", previous.clip_id);
                self.surface.clear();
                return SyncAction::Unbound;
            }
            return SyncAction::Unchanged;
        };
        let local = local_time(clip, workspace.playhead);

        let rebind = self
            .binding
            .as_ref()
            .is_none_or(|b| b.clip_id != clip.id || b.source_ref != clip.source_ref);
        if rebind {
            self.observed_version = Some(version);
            self.next_token += 1;
            let token = LoadToken(self.next_token);
            self.binding = Some(Binding {
                clip_id: clip.id.clone(),
                source_ref: clip.source_ref.clone(),
                token,
                ready: false,
                pending_seek: Some(local),
                last_seek: None,
            });
            debug!("Preview loading {} for clip {} ({:?})", clip.source_ref, clip.id, token);
            self.surface.load(&clip.source_ref, token);
            self.last_store_update = Some(now);
            return SyncAction::Loading {
                clip_id: clip.id.clone(),
                token,
            };
        }

        if within_cooldown(self.last_preview_update, now, self.cooldown) {
            // Left unobserved so the next call after the window applies it.
            debug!("Store update v{} within preview cooldown, deferred", version);
            return SyncAction::Suppressed {
                origin: UpdateOrigin::FromStore,
            };
        }

        self.observed_version = Some(version);
        let Some(binding) = self.binding.as_mut() else {
            return SyncAction::Unchanged;
        };
        if !binding.ready {
            binding.pending_seek = Some(local);
            return SyncAction::Parked { local_time: local };
        }
        if binding.last_seek == Some(local) {
            return SyncAction::Unchanged;
        }
        binding.last_seek = Some(local);
        self.surface.seek(local);
        self.last_store_update = Some(now);
        SyncAction::Seeked { local_time: local }
    }

    /// True while a store update is waiting for the cooldown to pass
    pub fn has_pending_store_update(&self, store: &TimelineStore) -> bool {
        self.binding.is_some() && self.observed_version != Some(store.version())
    }

    /// Preview -> store. Called with the surface's reported position.
    pub fn on_preview_time(
        &mut self,
        store: &mut TimelineStore,
        token: LoadToken,
        local: TimeSec,
        now: Instant,
    ) -> CoreResult<SyncAction> {
        let Some(binding) = self.binding.as_ref() else {
            return Ok(SyncAction::Stale);
        };
        if binding.token != token {
            debug!("Discarding time update for stale load {:?}", token);
            return Ok(SyncAction::Stale);
        }
        if within_cooldown(self.last_store_update, now, self.cooldown) {
            return Ok(SyncAction::Suppressed {
                origin: UpdateOrigin::FromPreview,
            });
        }
        // Deleted since the last observation; the next observe_store unbinds.
        let Some(clip) = store.clip(&binding.clip_id) else {
            return Ok(SyncAction::Stale);
        };
        // A store change the preview has not been shown yet wins over the
        // position the preview reports.
        if self.observed_version != Some(store.version()) {
            debug!("Preview time dropped; store update v{} pending", store.version());
            return Ok(SyncAction::Suppressed {
                origin: UpdateOrigin::FromPreview,
            });
        }

        let local = local.clamp(clip.trim_start, clip.trim_end);
        let playhead = timeline_time(clip, local);
        let receipt = store.set_playhead(playhead)?;

        self.observed_version = Some(receipt.version);
        self.last_preview_update = Some(now);
        if let Some(binding) = self.binding.as_mut() {
            binding.last_seek = Some(local);
        }
        Ok(SyncAction::PlayheadMoved { playhead })
    }

    /// The surface finished loading `token`; applies any parked seek
    pub fn on_ready(&mut self, token: LoadToken) -> SyncAction {
        match self.binding.as_mut() {
            Some(binding) if binding.token == token => {
                binding.ready = true;
                let seeked = binding.pending_seek.take();
                if let Some(local) = seeked {
                    binding.last_seek = Some(local);
                    self.surface.seek(local);
                }
                SyncAction::Ready { seeked }
            }
            _ => {
                debug!("Ignoring ready signal for stale load {:?}", token);
                SyncAction::Stale
            }
        }
    }

    /// The surface failed to load `token`
    pub fn on_error(&mut self, token: LoadToken, message: impl Into<String>) -> SyncAction {
        let message = message.into();
        match self.binding.as_ref() {
            Some(binding) if binding.token == token => {
                warn!("Preview failed to load clip {}: {}", binding.clip_id, message);
                self.binding = None;
                // Force the next observation to retry the load.
                self.observed_version = None;
                self.surface.clear();
                SyncAction::LoadFailed { message }
            }
            _ => {
                debug!("Ignoring error for stale load {:?}: {}", token, message);
                SyncAction::Stale
            }
        }
    }
}
