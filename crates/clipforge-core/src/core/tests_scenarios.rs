//! End-to-end scenarios across the store, editor, playback and export layers.
//!
//! Export scenarios run against a fake `ffmpeg` shell script that speaks the
//! `-progress` protocol and writes `fake media <seconds>` into its output, so
//! durations survive the concat pass and can be checked without a real
//! transcoder.

use std::time::{Duration, Instant};

use crate::core::{
    editor::{DragController, DragLayout, DragOutcome, DragPreview, PointerDown, PointerPos},
    playback::{local_time, PlaybackSynchronizer, PreviewSurface, LoadToken, SyncAction},
    timeline::{Clip, TimelineStore, Workspace},
    CoreError, SourceRef, TimeSec,
};

fn store_with(track_count: usize, clips: Vec<Clip>) -> TimelineStore {
    let workspace = Workspace {
        track_count,
        ..Workspace::default()
    };
    let mut store = TimelineStore::from_workspace(workspace).unwrap();
    for clip in clips {
        store.add_clip(clip).unwrap();
    }
    store
}

// =============================================================================
// Editing
// =============================================================================

#[test]
fn scenario_a_move_onto_occupied_range_is_rejected() {
    let mut store = store_with(
        2,
        vec![
            Clip::new("x.mp4", 0.0, 0.0, 10.0, 0).with_id("x"),
            Clip::new("y.mp4", 5.0, 0.0, 10.0, 1).with_id("y"),
        ],
    );
    let before = store.workspace().to_json().unwrap();

    let err = store.move_clip("x", 5.0, 1).unwrap_err();
    assert!(matches!(err, CoreError::ClipOverlap { .. }));
    let x = store.clip("x").unwrap();
    assert_eq!((x.timeline_start, x.timeline_end, x.track), (0.0, 10.0, 0));
    assert_eq!(store.workspace().to_json().unwrap(), before);
}

#[test]
fn scenario_a_drag_onto_occupied_track_reverts() {
    let mut store = store_with(
        2,
        vec![
            Clip::new("x.mp4", 0.0, 0.0, 10.0, 0).with_id("x"),
            Clip::new("y.mp4", 5.0, 0.0, 10.0, 1).with_id("y"),
        ],
    );
    let mut ctrl = DragController::new(DragLayout::default());

    // middle of x on track 0 (zoom 50 px/s, 100 px label column, 30 px ruler)
    let down = ctrl.pointer_down(&mut store, PointerPos::new(350.0, 70.0)).unwrap();
    assert!(matches!(down, PointerDown::Started { .. }));
    let before = store.workspace().to_json().unwrap();
    let version = store.version();

    // straight down onto track 1, where y occupies [5, 15)
    ctrl.pointer_move(PointerPos::new(350.0, 150.0));
    let preview = ctrl.on_frame().unwrap();
    assert!(matches!(preview, DragPreview::Clip { track: 1, .. }));

    match ctrl.pointer_up(&mut store, PointerPos::new(350.0, 150.0)) {
        DragOutcome::Rejected { warning, revert_to } => {
            assert!(!warning.is_empty());
            assert!(matches!(
                revert_to,
                DragPreview::Clip { track: 0, timeline_start, .. } if timeline_start == 0.0
            ));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(store.workspace().to_json().unwrap(), before);
    assert_eq!(store.version(), version);
    assert!(ctrl.session().is_none());
}

#[test]
fn workspace_round_trip_restores_identical_state() {
    let mut store = store_with(
        2,
        vec![
            Clip::new("a.mp4", 0.0, 1.0, 4.0, 0).with_id("a"),
            Clip::new("b.mp4", 3.0, 0.0, 2.0, 1).with_id("b"),
        ],
    );
    store.set_playhead(2.5).unwrap();
    store.set_zoom(80.0).unwrap();
    store.select(Some("b")).unwrap();

    let json = store.workspace().to_json().unwrap();
    let mut restored = TimelineStore::new();
    restored.restore(Workspace::from_json(&json).unwrap()).unwrap();

    assert_eq!(restored.workspace(), store.workspace());
}

// =============================================================================
// Playback
// =============================================================================

#[derive(Default)]
struct SeekLog {
    seeks: Vec<TimeSec>,
}

impl PreviewSurface for SeekLog {
    fn load(&mut self, _source: &SourceRef, _token: LoadToken) {}
    fn seek(&mut self, local_time: TimeSec) {
        self.seeks.push(local_time);
    }
    fn clear(&mut self) {}
}

#[test]
fn scenario_b_playhead_past_clip_end_freezes_on_last_frame() {
    let clip = Clip::new("a.mp4", 0.0, 0.0, 10.0, 0).with_id("a");
    assert_eq!(local_time(&clip, 12.0), 10.0);

    let mut store = store_with(1, vec![clip]);
    store.select(Some("a")).unwrap();
    store.set_playhead(12.0).unwrap();

    let mut sync = PlaybackSynchronizer::new(SeekLog::default(), Duration::from_millis(150));
    let SyncAction::Loading { token, .. } = sync.observe_store(&store, Instant::now()) else {
        panic!("expected the selected clip to load");
    };
    assert_eq!(sync.on_ready(token), SyncAction::Ready { seeked: Some(10.0) });
    assert_eq!(sync.surface().seeks, vec![10.0]);
}

// =============================================================================
// Export (fake transcoder)
// =============================================================================

#[cfg(unix)]
mod export {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::core::{
        ffmpeg::{executable_name, platform_binary_name, FFmpegLocator},
        jobs::{JobStatus, SegmentSpec},
        render::{
            ChannelEventSink, EncodeProfile, ExportError, ExportPipeline, ExportRequest,
            PathSourceResolver, PipelineConfig, PipelineEvent,
        },
        timeline::Clip,
        Resolution,
    };

    const FAKE_FFMPEG: &str = r#"#!/bin/sh
here=$(dirname "$0")
if [ "$1" = "-version" ]; then
  echo "ffmpeg version 6.0-fake Copyright (c) test"
  exit 0
fi
echo "$*" >> "$here/invocations.log"
if [ -f "$here/hang" ]; then
  exec sleep 30
fi
if [ -f "$here/fail" ]; then
  echo "Input #0, mov,mp4,m4a" >&2
  echo "Error while decoding stream #0:0: Invalid data found when processing input" >&2
  exit 1
fi
dur=1
list=""
prev=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-t" ]; then dur="$arg"; fi
  if [ "$prev" = "-i" ] && [ "$1" = "-f" ]; then list="$arg"; fi
  prev="$arg"
  out="$arg"
done
if [ -n "$list" ]; then
  dur=0
  while read -r kw path; do
    path=${path#\'}
    path=${path%\'}
    d=$(cut -d' ' -f3 "$path")
    dur=$(awk "BEGIN { print $dur + $d }")
  done < "$list"
fi
half=$(awk "BEGIN { printf \"%d\", $dur * 500000 }")
full=$(awk "BEGIN { printf \"%d\", $dur * 1000000 }")
pause=0
if [ -f "$here/slow" ]; then pause=0.15; fi
echo "frame=0"
echo "out_time_us=0"
echo "progress=continue"
if [ -f "$here/burst" ]; then
  i=0
  while [ $i -lt 200 ]; do
    i=$((i + 1))
    echo "out_time_us=$((full * i / 201))"
    echo "progress=continue"
  done
fi
sleep $pause
echo "out_time_us=$half"
echo "progress=continue"
sleep $pause
echo "out_time_us=$full"
echo "progress=end"
echo "fake media $dur" > "$out"
"#;

    enum Install {
        /// `ffmpeg-<triple>` in the bundle dir
        Bundled,
        /// plain `ffmpeg` in a system search dir, bundle dir empty
        SystemOnly,
    }

    struct ExportEnv {
        _root: TempDir,
        bin: PathBuf,
        bundle: PathBuf,
        media: PathBuf,
        temp_root: PathBuf,
        out_dir: PathBuf,
        locator: FFmpegLocator,
    }

    fn install_script(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::write(path, FAKE_FFMPEG).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        // A freshly written script can briefly fail with ETXTBSY while other
        // test threads fork; wait until it executes cleanly.
        for _ in 0..50 {
            if std::process::Command::new(path).arg("-version").output().is_ok() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("fake ffmpeg at {} never became executable", path.display());
    }

    impl ExportEnv {
        fn new(install: Install) -> Self {
            let root = TempDir::new().unwrap();
            let bin = root.path().join("bin");
            let bundle = root.path().join("bundle");
            let media = root.path().join("media");
            let temp_root = root.path().join("scratch");
            let out_dir = root.path().join("out");
            for dir in [&bin, &bundle, &media, &temp_root, &out_dir] {
                std::fs::create_dir_all(dir).unwrap();
            }

            let locator = match install {
                Install::Bundled => {
                    install_script(&bundle.join(platform_binary_name("ffmpeg")));
                    FFmpegLocator::new()
                        .with_bundle_dir(&bundle)
                        .with_search_paths(vec![])
                }
                Install::SystemOnly => {
                    install_script(&bin.join(executable_name("ffmpeg")));
                    FFmpegLocator::new()
                        .with_bundle_dir(&bundle)
                        .with_search_paths(vec![bin.clone()])
                }
            };

            Self {
                _root: root,
                bin,
                bundle,
                media,
                temp_root,
                out_dir,
                locator,
            }
        }

        fn script_dir(&self) -> &Path {
            if self.bundle.join(platform_binary_name("ffmpeg")).exists() {
                &self.bundle
            } else {
                &self.bin
            }
        }

        fn set_mode(&self, mode: &str) {
            std::fs::write(self.script_dir().join(mode), b"").unwrap();
        }

        fn invocations(&self) -> Vec<String> {
            std::fs::read_to_string(self.script_dir().join("invocations.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn source(&self, name: &str) -> PathBuf {
            let path = self.media.join(name);
            std::fs::write(&path, b"source media").unwrap();
            path
        }

        fn output(&self, name: &str) -> PathBuf {
            self.out_dir.join(name)
        }

        fn pipeline(&self) -> (ExportPipeline, UnboundedReceiver<PipelineEvent>) {
            let config = PipelineConfig {
                locator: self.locator.clone(),
                temp_root: Some(self.temp_root.clone()),
                profile: EncodeProfile::default(),
                progress_interval: Duration::ZERO,
                ..PipelineConfig::default()
            };
            let (sink, rx) = ChannelEventSink::channel();
            (ExportPipeline::new(config, Arc::new(sink)), rx)
        }

        fn temp_entries(&self) -> usize {
            std::fs::read_dir(&self.temp_root).unwrap().count()
        }

        async fn wait_for_temp_dir(&self) {
            for _ in 0..250 {
                if self.temp_entries() > 0 && !self.invocations().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            panic!("job never started");
        }
    }

    fn drain(rx: &mut UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn progress_of(events: &[PipelineEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn fake_duration(path: &Path) -> f64 {
        let content = std::fs::read_to_string(path).unwrap();
        content
            .split_whitespace()
            .last()
            .and_then(|d| d.parse().ok())
            .unwrap()
    }

    async fn wait(handle: crate::core::render::JobHandle) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(15), handle.wait())
            .await
            .expect("job should finish")
    }

    #[tokio::test]
    async fn scenario_c_three_clip_export() {
        let env = ExportEnv::new(Install::Bundled);
        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            env.source(name);
        }
        env.set_mode("slow");
        let store = super::store_with(
            2,
            vec![
                Clip::new("a.mp4", 0.0, 0.0, 5.0, 0),
                Clip::new("b.mp4", 5.0, 0.0, 3.0, 0),
                Clip::new("c.mp4", 8.0, 0.0, 4.0, 0),
            ],
        );
        let request = ExportRequest::from_workspace(
            store.workspace(),
            &PathSourceResolver::with_base_dir(&env.media),
            Resolution::P720,
            env.output("final.mp4"),
        )
        .unwrap();

        let (pipeline, mut rx) = env.pipeline();
        let handle = pipeline.submit(request).unwrap();
        let id = handle.id().to_string();
        let status = wait(handle).await;
        assert!(matches!(status, JobStatus::Succeeded { .. }), "{:?}", status);

        let events = drain(&mut rx);
        let progress = progress_of(&events);
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        assert_eq!(progress.last(), Some(&100.0));
        assert!(progress.iter().any(|p| *p > 0.0 && *p < 90.0));
        assert!(events.iter().all(|e| !matches!(e, PipelineEvent::Warning { .. })));
        assert!(matches!(events.last(), Some(PipelineEvent::JobComplete { .. })));

        assert!((fake_duration(&env.output("final.mp4")) - 12.0).abs() < 0.01);
        // three segment passes plus the concat pass
        let invocations = env.invocations();
        assert_eq!(invocations.len(), 4);
        assert!(invocations[3].starts_with("-f concat -safe 0 -i"));
        assert_eq!(env.temp_entries(), 0);

        let job = pipeline.job(&id).unwrap();
        assert_eq!(job.progress_percent, 100.0);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn single_clip_export_runs_one_pass() {
        let env = ExportEnv::new(Install::Bundled);
        let source = env.source("a.mp4");
        let (pipeline, mut rx) = env.pipeline();

        let handle = pipeline
            .submit(ExportRequest::new(
                vec![SegmentSpec::new(&source, 1.0, 3.5)],
                Resolution::P1080,
                env.output("single.mp4"),
            ))
            .unwrap();
        assert!(matches!(wait(handle).await, JobStatus::Succeeded { .. }));

        assert_eq!(env.invocations().len(), 1);
        assert!((fake_duration(&env.output("single.mp4")) - 2.5).abs() < 0.01);
        let progress = progress_of(&drain(&mut rx));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn progress_is_limited_to_ten_events_per_second() {
        let env = ExportEnv::new(Install::Bundled);
        let a = env.source("a.mp4");
        let b = env.source("b.mp4");
        env.set_mode("burst");
        // configured with no interval at all
        let (pipeline, mut rx) = env.pipeline();

        let started = std::time::Instant::now();
        let handle = pipeline
            .submit(ExportRequest::new(
                vec![SegmentSpec::new(&a, 0.0, 4.0), SegmentSpec::new(&b, 0.0, 4.0)],
                Resolution::P720,
                env.output("burst.mp4"),
            ))
            .unwrap();
        assert!(matches!(wait(handle).await, JobStatus::Succeeded { .. }));
        let elapsed = started.elapsed().as_secs_f64();

        let progress = progress_of(&drain(&mut rx));
        // three passes of 200+ blocks each would otherwise all be emitted
        let allowed = (elapsed * 10.0).floor() as usize + 2;
        assert!(
            progress.len() <= allowed,
            "{} progress events in {:.2}s",
            progress.len(),
            elapsed
        );
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100.0));
    }

    #[tokio::test]
    async fn scenario_d_system_fallback_warns_once_per_job() {
        let env = ExportEnv::new(Install::SystemOnly);
        let a = env.source("a.mp4");
        let b = env.source("b.mp4");
        let (pipeline, mut rx) = env.pipeline();

        for output in ["one.mp4", "two.mp4"] {
            let handle = pipeline
                .submit(ExportRequest::new(
                    vec![SegmentSpec::new(&a, 0.0, 2.0), SegmentSpec::new(&b, 0.0, 1.0)],
                    Resolution::P480,
                    env.output(output),
                ))
                .unwrap();
            let id = handle.id().to_string();
            assert!(matches!(wait(handle).await, JobStatus::Succeeded { .. }));

            let events = drain(&mut rx);
            let warnings: Vec<_> = events
                .iter()
                .filter(|e| matches!(e, PipelineEvent::Warning { .. }))
                .collect();
            assert_eq!(warnings.len(), 1);
            assert_eq!(warnings[0].job_id(), Some(id.as_str()));
            assert!(matches!(events.last(), Some(PipelineEvent::JobComplete { .. })));
        }
    }

    #[tokio::test]
    async fn scenario_e_cancel_mid_run_removes_temp_dir() {
        let env = ExportEnv::new(Install::Bundled);
        let a = env.source("a.mp4");
        let b = env.source("b.mp4");
        env.set_mode("hang");
        let (pipeline, mut rx) = env.pipeline();

        let handle = pipeline
            .submit(ExportRequest::new(
                vec![SegmentSpec::new(&a, 0.0, 2.0), SegmentSpec::new(&b, 0.0, 2.0)],
                Resolution::P720,
                env.output("cancelled.mp4"),
            ))
            .unwrap();
        let id = handle.id().to_string();

        env.wait_for_temp_dir().await;
        assert!(pipeline.job(&id).unwrap().is_running());
        assert!(pipeline.cancel(&id));

        assert_eq!(wait(handle).await, JobStatus::Cancelled);
        assert_eq!(env.temp_entries(), 0);
        assert!(!env.output("cancelled.mp4").exists());
        assert_eq!(pipeline.job(&id).unwrap().status, JobStatus::Cancelled);

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(PipelineEvent::JobCancelled { .. })));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn busy_output_path_is_rejected() {
        let env = ExportEnv::new(Install::Bundled);
        let a = env.source("a.mp4");
        env.set_mode("hang");
        let (pipeline, _rx) = env.pipeline();
        let request = ExportRequest::new(
            vec![SegmentSpec::new(&a, 0.0, 2.0)],
            Resolution::P720,
            env.output("busy.mp4"),
        );

        let first = pipeline.submit(request.clone()).unwrap();
        match pipeline.submit(request.clone()) {
            Err(ExportError::OutputBusy { job_id, .. }) => assert_eq!(job_id, first.id()),
            Err(e) => panic!("expected OutputBusy, got {}", e),
            Ok(_) => panic!("expected OutputBusy"),
        }

        first.cancel();
        assert_eq!(wait(first).await, JobStatus::Cancelled);

        // released once the first job is terminal
        let again = pipeline.submit(request).unwrap();
        again.cancel();
        assert_eq!(wait(again).await, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn transcoder_failure_reports_stderr_and_cleans_up() {
        let env = ExportEnv::new(Install::Bundled);
        let a = env.source("a.mp4");
        let b = env.source("b.mp4");
        env.set_mode("fail");
        let (pipeline, mut rx) = env.pipeline();

        let handle = pipeline
            .submit(ExportRequest::new(
                vec![SegmentSpec::new(&a, 0.0, 2.0), SegmentSpec::new(&b, 0.0, 2.0)],
                Resolution::P720,
                env.output("failed.mp4"),
            ))
            .unwrap();
        match wait(handle).await {
            JobStatus::Failed { reason } => assert!(reason.contains("Invalid data found"), "{}", reason),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(env.temp_entries(), 0);

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(PipelineEvent::JobFailed { .. })));
    }

    #[tokio::test]
    async fn standalone_trim_and_thumbnail() {
        let env = ExportEnv::new(Install::Bundled);
        let a = env.source("a.mp4");
        let (pipeline, _rx) = env.pipeline();

        let trimmed = env.output("trimmed.mp4");
        pipeline.trim_copy(&a, 1.0, 4.0, &trimmed).await.unwrap();
        assert!((fake_duration(&trimmed) - 3.0).abs() < 0.01);
        assert!(env.invocations()[0].contains("-c copy"));

        let thumb = env.output("thumbs").join("a.jpg");
        let at = pipeline.thumbnail(&a, &thumb).await.unwrap();
        assert_eq!(at, 1.0);
        assert!(thumb.exists());

        assert!(matches!(
            pipeline.trim_copy(&a, 4.0, 1.0, &trimmed).await,
            Err(ExportError::InvalidRequest(_))
        ));
    }
}

// =============================================================================
// Real transcoder
// =============================================================================

/// Needs `ffmpeg` and `ffprobe` on PATH: `cargo test -- --ignored`
#[tokio::test]
#[ignore]
async fn export_duration_is_idempotent_with_real_ffmpeg() {
    use std::sync::Arc;

    use crate::core::{
        ffmpeg::FFmpegLocator,
        jobs::{JobStatus, SegmentSpec},
        process::tool_command,
        render::{ExportPipeline, ExportRequest, PipelineConfig, TracingEventSink},
        Resolution,
    };

    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("source.mp4");
    let resolved = FFmpegLocator::new().resolve().unwrap();
    let status = tool_command(&resolved.info.ffmpeg_path)
        .args([
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=4:size=320x240:rate=25",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:duration=4",
            "-shortest",
            "-y",
        ])
        .arg(&source)
        .status()
        .await
        .unwrap();
    assert!(status.success());

    let pipeline = ExportPipeline::new(PipelineConfig::default(), Arc::new(TracingEventSink));
    let mut durations = Vec::new();
    for name in ["first.mp4", "second.mp4"] {
        let output = dir.path().join(name);
        let handle = pipeline
            .submit(ExportRequest::new(
                vec![
                    SegmentSpec::new(&source, 0.0, 1.5),
                    SegmentSpec::new(&source, 2.0, 3.0),
                ],
                Resolution::P480,
                &output,
            ))
            .unwrap();
        assert!(matches!(handle.wait().await, JobStatus::Succeeded { .. }));
        durations.push(pipeline.probe(&output).await.unwrap().duration_sec);
    }

    assert!((durations[0] - durations[1]).abs() < 0.05, "{:?}", durations);
    assert!((durations[0] - 2.5).abs() < 0.25, "{:?}", durations);
}
