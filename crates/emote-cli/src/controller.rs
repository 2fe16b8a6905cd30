//! Capture controller: frame source lifecycle and the detection poll loop.
//!
//! One controller serves both input variants (live camera and still image).
//! The loop awaits each inference before the next tick, so at most one
//! inference is in flight and missed ticks are dropped rather than queued.
//!
//! The frame source lives in its own slot, apart from the presentation
//! state. The poll task checks the source out for the duration of a
//! dequeue, so status reads, snapshots and `stop()` never wait on the
//! camera.

use crate::config::Config;
use crate::engine::{EngineError, EngineHandle};
use emote_core::snapshot::{self, SnapshotError};
use emote_core::{
    DetectOptions, Detection, DisplayState, EmotionPresenter, InputMode, ModelGate, ModelState,
    OverlayRenderer,
};
use emote_hw::{CaptureBackend, CaptureError, Frame, FrameSource, Resolution, StillImage};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How long `stop()` waits for an in-flight dequeue to hand the source back.
const STOP_GRACE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),
    #[error("model load: {0}")]
    ModelLoad(#[source] EngineError),
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("capture is not running")]
    NotRunning,
}

impl ControllerError {
    /// Message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            ControllerError::Capture(CaptureError::PermissionDenied(_)) => {
                "Camera access denied".to_string()
            }
            ControllerError::Capture(CaptureError::DeviceNotFound(path)) => {
                format!("No camera found at {path}")
            }
            ControllerError::Capture(CaptureError::DeviceBusy(_)) => {
                "Camera is in use by another application".to_string()
            }
            ControllerError::Capture(CaptureError::ImageDecode(e)) => {
                format!("Could not read image: {e}")
            }
            ControllerError::Capture(e) => format!("Camera error: {e}"),
            ControllerError::ModelLoad(e) => format!("Failed to load models: {e}"),
            ControllerError::Snapshot(e) => format!("Snapshot failed: {e}"),
            ControllerError::NotRunning => "Capture is not running".to_string(),
        }
    }
}

/// Which input to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Camera,
    Image(PathBuf),
}

impl InputSource {
    fn mode(&self) -> InputMode {
        match self {
            InputSource::Camera => InputMode::Camera,
            InputSource::Image(_) => InputMode::StillImage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerStatus {
    NotRunning,
    Running { mode: InputMode },
    /// Last start attempt failed, or the poll loop died; `reason` is user-facing.
    Failed { reason: String },
}

/// Poll loop counters for the current run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStats {
    /// Ticks whose frame went through inference and was committed.
    pub analysed: u64,
    /// Ticks skipped because the source was not ready.
    pub skipped: u64,
    pub capture_failures: u64,
    pub inference_failures: u64,
    pub last_error: Option<String>,
}

/// Presentation state shared between the controller and its poll task.
struct Session {
    mode: Option<InputMode>,
    source_dims: Option<(u32, u32)>,
    overlay: OverlayRenderer,
    last_frame: Option<Frame>,
    stats: PollStats,
    /// Set when the poll loop ended without being stopped.
    halted: Option<String>,
}

/// The active frame source.
struct SourceSlot {
    /// `None` while stopped, and while the poll task has it checked out.
    source: Option<Box<dyn FrameSource>>,
    checked_out: bool,
    /// Hardware tracks held by the installed source, checked out or not.
    tracks: usize,
}

struct Shared {
    /// Bumped under the session lock on every start/stop; a poll task only
    /// touches state for its own epoch.
    epoch: AtomicU64,
    session: Mutex<Session>,
    slot: Mutex<SourceSlot>,
    /// Signalled whenever a checked-out source comes back.
    returned: Condvar,
    display: watch::Sender<DisplayState>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self) -> MutexGuard<'_, SourceSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Block until no dequeue holds a source.
    fn wait_returned(&self) {
        let slot = self.slot();
        let _slot = self
            .returned
            .wait_while(slot, |s| s.checked_out)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

pub struct CaptureController {
    config: Config,
    engine: EngineHandle,
    backend: Arc<dyn CaptureBackend>,
    models: Arc<ModelGate>,
    shared: Arc<Shared>,
    poll: Option<JoinHandle<()>>,
    status: ControllerStatus,
}

impl CaptureController {
    pub fn new(config: Config, engine: EngineHandle, backend: Arc<dyn CaptureBackend>) -> Self {
        let (display, _) = watch::channel(DisplayState::cleared());
        Self {
            config,
            engine,
            backend,
            models: Arc::new(ModelGate::new()),
            shared: Arc::new(Shared {
                epoch: AtomicU64::new(0),
                session: Mutex::new(Session {
                    mode: None,
                    source_dims: None,
                    overlay: OverlayRenderer::new(),
                    last_frame: None,
                    stats: PollStats::default(),
                    halted: None,
                }),
                slot: Mutex::new(SourceSlot {
                    source: None,
                    checked_out: false,
                    tracks: 0,
                }),
                returned: Condvar::new(),
                display,
            }),
            poll: None,
            status: ControllerStatus::NotRunning,
        }
    }

    /// Start analysing `input`, tearing down any active source first.
    ///
    /// On failure the controller is left not running with its status set
    /// to [`ControllerStatus::Failed`].
    pub async fn start(&mut self, input: InputSource) -> Result<(), ControllerError> {
        if self.is_running() {
            tracing::info!(?input, "switching input, stopping current source");
        }
        self.stop();

        let engine = self.engine.clone();
        let model_dir = self.config.model_dir.clone();
        if let Err(e) = self
            .models
            .ensure_loaded(|| async move { engine.load(model_dir).await })
            .await
        {
            return Err(self.fail(ControllerError::ModelLoad(e)));
        }

        // A source retired by stop() may still be finishing its dequeue;
        // the device must be closed before it is opened again.
        let shared = self.shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shared.wait_returned()).await {
            tracing::warn!(error = %e, "waiting for previous source failed");
        }

        let mode = input.mode();
        let source = match self.open_source(input).await {
            Ok(source) => source,
            Err(e) => return Err(self.fail(e.into())),
        };

        let epoch = {
            let mut session = self.shared.session();
            let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            let dims = source.dimensions();
            // Metadata ready: align the overlay before the first tick.
            if let Some((width, height)) = dims {
                session.overlay.sync_to(width, height);
            }
            session.overlay.clear();
            session.mode = Some(mode);
            session.source_dims = dims;
            session.last_frame = None;
            session.stats = PollStats::default();
            session.halted = None;

            let mut slot = self.shared.slot();
            slot.tracks = source.active_tracks();
            slot.source = Some(source);
            drop(slot);

            self.shared.display.send_replace(DisplayState::cleared());
            epoch
        };

        let ctx = PollContext {
            shared: self.shared.clone(),
            engine: self.engine.clone(),
            options: DetectOptions {
                score_threshold: self.config.score_threshold,
            },
            presenter: EmotionPresenter::new(self.config.face_selection, self.config.no_face_label),
            interval: self.config.poll_interval(),
            epoch,
            mode,
        };
        self.poll = Some(tokio::spawn(poll_loop(ctx)));
        self.status = ControllerStatus::Running { mode };

        tracing::info!(?mode, interval_ms = self.config.poll_interval().as_millis() as u64, "capture started");
        Ok(())
    }

    /// Stop polling, release the source's hardware tracks, clear overlay and label.
    ///
    /// Does nothing when not running. If a dequeue is still blocked after
    /// a short grace period, the source is released as soon as it returns.
    pub fn stop(&mut self) {
        let Some(poll) = self.poll.take() else {
            return;
        };
        poll.abort();

        {
            let mut session = self.shared.session();
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            session.mode = None;
            session.source_dims = None;
            session.last_frame = None;
            session.halted = None;
            session.overlay.clear();
            self.shared.display.send_replace(DisplayState::cleared());
        }

        let slot = self.shared.slot();
        let (mut slot, _) = self
            .shared
            .returned
            .wait_timeout_while(slot, STOP_GRACE, |s| s.checked_out)
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(mut source) = slot.source.take() {
            source.stop();
            slot.tracks = 0;
        } else if slot.checked_out {
            tracing::warn!(grace = ?STOP_GRACE, "dequeue still blocked, source released when it returns");
        }
        drop(slot);

        self.status = ControllerStatus::NotRunning;
        tracing::info!("capture stopped");
    }

    /// Write `emotion-snapshot.png` with the last frame and the current overlay.
    pub async fn snapshot(&self) -> Result<PathBuf, ControllerError> {
        if !self.is_running() {
            return Err(ControllerError::NotRunning);
        }

        let (frame, overlay) = {
            let session = self.shared.session();
            let frame = session.last_frame.clone().ok_or(SnapshotError::NoFrame)?;
            (frame, session.overlay.surface().clone())
        };

        let dir = self.config.snapshot_dir.clone();
        let path = tokio::task::spawn_blocking(move || snapshot::export(&frame.image, &overlay, &dir))
            .await
            .map_err(|e| SnapshotError::Write {
                path: self.config.snapshot_dir.display().to_string(),
                source: std::io::Error::other(e),
            })??;
        Ok(path)
    }

    pub fn is_running(&self) -> bool {
        self.poll.as_ref().is_some_and(|poll| !poll.is_finished())
    }

    pub fn status(&self) -> ControllerStatus {
        if self.poll.as_ref().is_some_and(JoinHandle::is_finished) {
            let reason = self
                .shared
                .session()
                .halted
                .clone()
                .unwrap_or_else(|| "Capture stopped unexpectedly".to_string());
            return ControllerStatus::Failed { reason };
        }
        self.status.clone()
    }

    pub fn model_state(&self) -> ModelState {
        self.models.state()
    }

    pub fn stats(&self) -> PollStats {
        self.shared.session().stats.clone()
    }

    /// Receiver for display updates; only changes are published.
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.shared.display.subscribe()
    }

    pub fn display(&self) -> DisplayState {
        self.shared.display.borrow().clone()
    }

    pub fn overlay_dimensions(&self) -> (u32, u32) {
        self.shared.session().overlay.dimensions()
    }

    pub fn overlay_is_clear(&self) -> bool {
        self.shared.session().overlay.is_clear()
    }

    pub fn source_dimensions(&self) -> Option<(u32, u32)> {
        self.shared.session().source_dims
    }

    pub fn active_tracks(&self) -> usize {
        self.shared.slot().tracks
    }

    async fn open_source(&self, input: InputSource) -> Result<Box<dyn FrameSource>, CaptureError> {
        let opened = match input {
            InputSource::Camera => {
                let backend = self.backend.clone();
                let hint = Resolution {
                    width: self.config.capture_width,
                    height: self.config.capture_height,
                };
                tokio::task::spawn_blocking(move || backend.open(hint)).await
            }
            InputSource::Image(path) => tokio::task::spawn_blocking(move || {
                StillImage::open(&path).map(|s| Box::new(s) as Box<dyn FrameSource>)
            })
            .await,
        };
        opened.map_err(|e| CaptureError::CaptureFailed(format!("open task failed: {e}")))?
    }

    fn fail(&mut self, error: ControllerError) -> ControllerError {
        let reason = error.user_message();
        tracing::error!(error = %error, reason = %reason, "start failed");
        self.status = ControllerStatus::Failed { reason };
        error
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollContext {
    shared: Arc<Shared>,
    engine: EngineHandle,
    options: DetectOptions,
    presenter: EmotionPresenter,
    interval: Duration,
    epoch: u64,
    mode: InputMode,
}

enum Captured {
    Frame(Frame),
    NotReady,
    Failed(CaptureError),
    Superseded,
}

async fn poll_loop(ctx: PollContext) {
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let shared = ctx.shared.clone();
        let epoch = ctx.epoch;
        let captured = match tokio::task::spawn_blocking(move || capture(&shared, epoch)).await {
            Ok(c) => c,
            Err(e) => {
                ctx.halt(format!("Capture stopped unexpectedly: {e}"));
                return;
            }
        };

        let frame = match captured {
            Captured::Frame(frame) => frame,
            Captured::NotReady => {
                ctx.record(|s| s.skipped += 1);
                continue;
            }
            Captured::Failed(e) => {
                tracing::warn!(error = %e, "frame capture failed");
                ctx.record(|s| {
                    s.capture_failures += 1;
                    s.last_error = Some(e.to_string());
                });
                continue;
            }
            Captured::Superseded => {
                ctx.halt("Frame source is gone".to_string());
                return;
            }
        };

        let detections = match ctx.engine.detect(frame.image.clone(), ctx.options).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "inference failed");
                ctx.record(|s| {
                    s.inference_failures += 1;
                    s.last_error = Some(e.to_string());
                });
                continue;
            }
        };

        if !ctx.commit(frame, &detections) {
            return;
        }
    }
}

/// A source taken out of the slot for one dequeue. Handing it back on drop
/// also covers a panicking `next_frame`.
struct CheckedOut<'a> {
    shared: &'a Shared,
    epoch: u64,
    source: Option<Box<dyn FrameSource>>,
}

impl Drop for CheckedOut<'_> {
    fn drop(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let mut slot = self.shared.slot();
        slot.checked_out = false;
        if self.shared.current_epoch() == self.epoch && slot.source.is_none() {
            slot.source = Some(source);
        } else {
            // Stopped while dequeuing: release here.
            source.stop();
            if slot.source.is_none() {
                slot.tracks = 0;
            }
            tracing::info!("source released after a late dequeue");
        }
        self.shared.returned.notify_all();
    }
}

fn capture(shared: &Shared, epoch: u64) -> Captured {
    let mut checked_out = {
        let mut slot = shared.slot();
        if shared.current_epoch() != epoch {
            return Captured::Superseded;
        }
        let Some(source) = slot.source.take() else {
            return Captured::Superseded;
        };
        slot.checked_out = true;
        CheckedOut { shared, epoch, source: Some(source) }
    };

    let Some(source) = checked_out.source.as_mut() else {
        return Captured::Superseded;
    };
    match source.next_frame() {
        Ok(Some(frame)) => Captured::Frame(frame),
        Ok(None) => Captured::NotReady,
        Err(e) => Captured::Failed(e),
    }
}

impl PollContext {
    fn record(&self, update: impl FnOnce(&mut PollStats)) {
        let mut session = self.shared.session();
        if self.shared.current_epoch() == self.epoch {
            update(&mut session.stats);
        }
    }

    /// The loop is exiting on its own: release the source and clear the view.
    fn halt(&self, reason: String) {
        let mut session = self.shared.session();
        if self.shared.current_epoch() != self.epoch {
            return;
        }
        tracing::error!(reason = %reason, "poll loop halted");

        session.overlay.clear();
        session.last_frame = None;
        session.stats.last_error = Some(reason.clone());
        session.halted = Some(reason);

        let mut slot = self.shared.slot();
        if let Some(mut source) = slot.source.take() {
            source.stop();
        }
        slot.tracks = 0;
        drop(slot);

        self.shared.display.send_replace(DisplayState::cleared());
    }

    /// Redraw and republish for one analysed frame. Returns false if the
    /// controller moved on (stopped or restarted) while inference ran.
    fn commit(&self, frame: Frame, detections: &[Detection]) -> bool {
        let mut session = self.shared.session();
        if self.shared.current_epoch() != self.epoch {
            return false;
        }

        let (width, height) = session.source_dims.unwrap_or_else(|| frame.dimensions());
        session.overlay.sync_to(width, height);
        session.overlay.render(detections);

        let state = self.presenter.present(detections, self.mode);
        tracing::debug!(
            seq = frame.sequence,
            faces = detections.len(),
            label = %state.label,
            "tick"
        );

        session.last_frame = Some(frame);
        session.stats.analysed += 1;

        // Published under the lock so a concurrent stop() cannot be overtaken.
        self.shared.display.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        true
    }
}
