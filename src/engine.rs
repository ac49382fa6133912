use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::image_source::ImageSource;
use crate::providers::Provider;
use crate::reconcile::{EvictionWindow, reconcile};
use crate::regions::{Capture, TextRegion};
use crate::settings::{EngineSettings, ScanTuning, Settings};
use crate::translations::ScanOptions;
use crate::translator::{ScanError, ScanOutput, Translator};
use crate::viewport::{ScrollEvent, TrackerConfig, ViewportTracker};

const SCROLL_CHANNEL_CAPACITY: usize = 64;

/// Identifies one dispatched scan and the source it was dispatched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanTicket {
    pub scan_id: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    Scroll,
    Manual,
    SourceLoaded,
}

/// What happened to a trigger. Only `Started` issues a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Dispatch {
    Started(ScanTicket),
    Disabled,
    Busy,
    NoImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Applied { added: usize, total: usize },
    Failed(String),
    Skipped,
    Discarded,
}

#[derive(Debug, Clone)]
struct Notice {
    message: String,
    raised_at: Instant,
}

struct InFlight {
    ticket: ScanTicket,
    abort: AbortHandle,
}

struct EngineState {
    settings: EngineSettings,
    tuning: ScanTuning,
    window: EvictionWindow,
    source: ImageSource,
    generation: u64,
    next_scan_id: u64,
    regions: Arc<[TextRegion]>,
    tracker: ViewportTracker,
    in_flight: Option<InFlight>,
    notice: Option<Notice>,
}

struct EngineInner<P: Provider> {
    translator: Translator<P>,
    state: Mutex<EngineState>,
    processing: watch::Sender<bool>,
}

/// What a renderer needs to paint the overlay.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub source: &'static str,
    pub processing: bool,
    pub notice: Option<String>,
    pub last_scan_offset: Option<f64>,
    pub settings: EngineSettings,
    pub regions: Vec<TextRegion>,
}

/// Owns all mutable overlay state. Cloning shares the same engine.
pub struct Engine<P: Provider> {
    inner: Arc<EngineInner<P>>,
}

impl<P: Provider> Clone for Engine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Provider> Engine<P> {
    pub fn new(translator: Translator<P>, settings: Settings) -> Self {
        let Settings {
            engine: engine_settings,
            scan: tuning,
        } = settings;
        let state = EngineState {
            settings: engine_settings,
            window: EvictionWindow::from(&tuning),
            tracker: ViewportTracker::new(TrackerConfig::from(&tuning)),
            tuning,
            source: ImageSource::None,
            generation: 0,
            next_scan_id: 1,
            regions: Arc::from(Vec::new()),
            in_flight: None,
            notice: None,
        };
        let (processing, _) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                translator,
                state: Mutex::new(state),
                processing,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> EngineSettings {
        self.lock().settings.clone()
    }

    pub fn update_settings(&self, settings: EngineSettings) -> Result<()> {
        settings.validate()?;
        let mut state = self.lock();
        if state.settings.enabled != settings.enabled {
            info!(
                "translation engine {}",
                if settings.enabled { "enabled" } else { "disabled" }
            );
        }
        state.settings = settings;
        Ok(())
    }

    pub fn regions(&self) -> Arc<[TextRegion]> {
        self.lock().regions.clone()
    }

    pub fn is_processing(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn snapshot(&self, now: Instant) -> EngineSnapshot {
        let state = self.lock();
        let notice = state
            .notice
            .as_ref()
            .filter(|notice| {
                now.saturating_duration_since(notice.raised_at) < state.tuning.notice_ttl
            })
            .map(|notice| notice.message.clone());
        EngineSnapshot {
            source: state.source.kind(),
            processing: state.in_flight.is_some(),
            notice,
            last_scan_offset: state.tracker.last_scan_offset(),
            settings: state.settings.clone(),
            regions: state.regions.to_vec(),
        }
    }

    pub fn dismiss_notice(&self) {
        self.lock().notice = None;
    }

    /// Replaces the page. Regions and the scan marker belong to the old page
    /// and are dropped; an in-flight scan for it is aborted. A new inline image
    /// is scanned immediately from the top.
    pub fn load_source(
        &self,
        source: ImageSource,
        viewport_height: Option<f64>,
    ) -> Option<Dispatch> {
        let mut state = self.lock();
        state.generation += 1;
        if let Some(in_flight) = state.in_flight.take() {
            debug!("aborting scan {} for previous source", in_flight.ticket.scan_id);
            in_flight.abort.abort();
            self.inner.processing.send_replace(false);
        }
        state.regions = Arc::from(Vec::new());
        state.tracker.reset();
        state.notice = None;
        state.source = source;
        info!("loaded {} source (generation {})", state.source.kind(), state.generation);

        state.source.inline()?;
        let height = viewport_height
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(state.tuning.initial_viewport_height);
        let capture = Capture::new(0.0, height);
        let dispatch = self.dispatch_locked(&mut state, capture, ScanTrigger::SourceLoaded);
        if matches!(dispatch, Dispatch::Started(_)) {
            state.tracker.mark_scanned(0.0);
        }
        Some(dispatch)
    }

    pub fn observe_scroll(&self, event: ScrollEvent, now: Instant) {
        self.lock().tracker.observe(event, now);
    }

    /// Promotes a settled scroll position to a scan when it moved far enough.
    pub fn settle(&self, now: Instant) -> Option<Dispatch> {
        let mut state = self.lock();
        let candidate = state.tracker.take_candidate(now)?;
        if !state.settings.enabled || !state.settings.auto_scan {
            debug!("ignoring settled scroll at {:.0}: auto scan is off", candidate.offset);
            return None;
        }
        let capture = state.tracker.check_distance(candidate)?;
        Some(self.dispatch_locked(&mut state, capture, ScanTrigger::Scroll))
    }

    /// Scans the given position now, skipping debounce and distance checks.
    pub fn scan_now(&self, event: ScrollEvent) -> Dispatch {
        let mut state = self.lock();
        let dispatch = self.dispatch_locked(&mut state, event.capture(), ScanTrigger::Manual);
        if matches!(dispatch, Dispatch::Started(_)) {
            state.tracker.mark_scanned(event.offset);
        }
        dispatch
    }

    fn dispatch_locked(
        &self,
        state: &mut EngineState,
        capture: Capture,
        trigger: ScanTrigger,
    ) -> Dispatch {
        if !state.settings.enabled {
            debug!("dropping {:?} scan: engine disabled", trigger);
            return Dispatch::Disabled;
        }
        if let Some(in_flight) = &state.in_flight {
            debug!(
                "dropping {:?} scan: scan {} still in flight",
                trigger, in_flight.ticket.scan_id
            );
            return Dispatch::Busy;
        }
        let Some(image) = state.source.inline().cloned() else {
            debug!("skipping {:?} scan: no inline image", trigger);
            return Dispatch::NoImage;
        };

        let ticket = ScanTicket {
            scan_id: state.next_scan_id,
            generation: state.generation,
        };
        state.next_scan_id += 1;
        let options = ScanOptions::new(
            state.settings.target_language.clone(),
            state.settings.source_language.clone(),
        );
        info!(
            "dispatching scan {} ({:?}) at offset {:.0}, viewport {:.0}",
            ticket.scan_id, trigger, capture.scroll_offset, capture.viewport_height
        );

        let engine = self.clone();
        let task = tokio::spawn(async move {
            let result = engine
                .inner
                .translator
                .translate_image(image, &options)
                .await;
            engine.complete(ticket, capture, result);
        });
        state.in_flight = Some(InFlight {
            ticket,
            abort: task.abort_handle(),
        });
        self.inner.processing.send_replace(true);
        Dispatch::Started(ticket)
    }

    pub(crate) fn complete(
        &self,
        ticket: ScanTicket,
        capture: Capture,
        result: Result<ScanOutput, ScanError>,
    ) -> ScanOutcome {
        let mut state = self.lock();
        let current = state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.ticket == ticket);
        if !current || ticket.generation != state.generation {
            debug!("discarding result of stale scan {}", ticket.scan_id);
            return ScanOutcome::Discarded;
        }
        state.in_flight = None;
        self.inner.processing.send_replace(false);

        match result {
            Ok(output) => {
                let added = output.regions.len();
                let next = reconcile(&state.regions, output.regions, &capture, &state.window);
                let total = next.len();
                state.regions = Arc::from(next);
                info!("scan {} applied: {} new, {} visible", ticket.scan_id, added, total);
                ScanOutcome::Applied { added, total }
            }
            Err(err) if !err.is_user_visible() => {
                debug!("scan {} skipped: {}", ticket.scan_id, err);
                ScanOutcome::Skipped
            }
            Err(err) => {
                let message = err.to_string();
                warn!("scan {} failed: {}", ticket.scan_id, message);
                state.notice = Some(Notice {
                    message: message.clone(),
                    raised_at: Instant::now(),
                });
                ScanOutcome::Failed(message)
            }
        }
    }

    /// Resolves once no scan is in flight.
    pub async fn wait_idle(&self) {
        let mut processing = self.inner.processing.subscribe();
        let _ = processing.wait_for(|busy| !*busy).await;
    }

    /// Runs the debounce loop until every sender is dropped.
    pub async fn run_scroll_loop(self, mut events: mpsc::Receiver<ScrollEvent>) {
        loop {
            let deadline = self.lock().tracker.deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.observe_scroll(event, Instant::now()),
                    None => break,
                },
                _ = sleep_until_deadline(deadline) => {
                    self.settle(Instant::now());
                }
            }
        }
        debug!("scroll loop stopped");
    }

    pub fn spawn_scroll_loop(&self) -> (mpsc::Sender<ScrollEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(SCROLL_CHANNEL_CAPACITY);
        let task = tokio::spawn(self.clone().run_scroll_loop(rx));
        (tx, task)
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
