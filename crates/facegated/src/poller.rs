//! Continuous verification poller.
//!
//! A single long-lived task drives capture at a fixed cadence. Each
//! verification runs on its own task guarded by a busy flag: ticks that
//! would overlap an in-flight verification are dropped, never queued, so
//! at most one verification executes at a time. Repeated failures trigger
//! frame-source reinitialization instead of terminating the loop.

use crate::state::SharedState;
use facegate_core::{service, ImageData, VerificationOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Consecutive capture failures before the frame source is reinitialized.
const CAPTURE_REINIT_THRESHOLD: u32 = 5;
/// Consecutive failures of any kind before reinitializing.
const LOOP_REINIT_THRESHOLD: u32 = 10;

struct PollerShared {
    running: AtomicBool,
    busy: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

/// Start/stop control for the poll loop.
pub struct PollerHandle {
    inner: Arc<PollerShared>,
}

impl PollerHandle {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(PollerShared {
                running: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                stop_tx,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawn the poll loop. Returns `false` when it was already running.
    pub fn start(&self, state: SharedState) -> bool {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.stop_tx.send_replace(false);
        let shared = self.inner.clone();
        let stop_rx = self.inner.stop_tx.subscribe();
        tokio::spawn(run(state, shared, stop_rx));
        true
    }

    /// Signal the poll loop to exit. Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.inner.stop_tx.send_replace(true);
        true
    }
}

async fn run(state: SharedState, shared: Arc<PollerShared>, stop_rx: watch::Receiver<bool>) {
    let interval = Duration::from_secs(state.config.poll_interval_secs);
    run_inner(state, shared, stop_rx, interval).await;
}

async fn run_inner(
    state: SharedState,
    shared: Arc<PollerShared>,
    mut stop_rx: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut consecutive_failures: u32 = 0;
    tracing::info!(interval_secs = interval.as_secs(), "continuous verification started");

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        if shared.busy.load(Ordering::SeqCst) {
            tracing::trace!("verification in flight, skipping tick");
            continue;
        }

        match state.engine.capture_frame().await {
            Err(error) => {
                consecutive_failures += 1;
                let threshold = if error.is_capture() {
                    CAPTURE_REINIT_THRESHOLD
                } else {
                    LOOP_REINIT_THRESHOLD
                };
                tracing::warn!(
                    %error,
                    failures = consecutive_failures,
                    "poll tick failed"
                );
                if consecutive_failures >= threshold {
                    tracing::warn!(
                        failures = consecutive_failures,
                        "reinitializing frame source"
                    );
                    if let Err(error) = state.engine.reinit_camera().await {
                        tracing::error!(%error, "frame source reinit failed");
                    }
                    consecutive_failures = 0;
                }
            }
            Ok(frame) => {
                consecutive_failures = 0;
                shared.busy.store(true, Ordering::SeqCst);
                let state = state.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    let image = ImageData::Gray {
                        pixels: frame.data,
                        width: frame.width,
                        height: frame.height,
                    };
                    let scan = state.engine.scan(image).await;
                    let catalog = state.catalog().await;
                    let outcome = match scan {
                        Err(error) => VerificationOutcome::failure(error.to_string()),
                        Ok(scan) => {
                            service::resolve_scan(Ok(scan), &catalog, state.config.match_threshold)
                        }
                    };
                    if outcome.verified {
                        state.record_verified(&outcome.user).await;
                    }
                    tracing::info!(
                        user = %outcome.user,
                        verified = outcome.verified,
                        "poll verification complete"
                    );
                    state.publisher.publish_outcome(&outcome).await;
                    shared.busy.store(false, Ordering::SeqCst);
                });
            }
        }
    }

    shared.running.store(false, Ordering::SeqCst);
    tracing::info!("continuous verification stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{EngineError, EngineHandle, EngineRequest};
    use crate::publisher::Publisher;
    use crate::state::AppState;
    use facegate_core::{Catalog, Embedding, FaceScan};
    use facegate_hw::{CameraError, Frame};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Counters recorded by the fake engine consumer.
    #[derive(Default)]
    struct EngineStats {
        captures: AtomicUsize,
        scans: AtomicUsize,
        concurrent_scans: AtomicUsize,
        max_concurrent_scans: AtomicUsize,
        reinits: AtomicUsize,
        captures_at_first_reinit: AtomicUsize,
    }

    /// Fake engine: captures succeed or fail per `capture_ok`, scans take
    /// `scan_delay` and return a face at distance 0.1 from the catalog.
    fn spawn_fake_engine(
        capture_ok: bool,
        scan_delay: Duration,
    ) -> (EngineHandle, Arc<EngineStats>) {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        let stats = Arc::new(EngineStats::default());
        let consumer_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                match req {
                    EngineRequest::CaptureFrame { reply } => {
                        consumer_stats.captures.fetch_add(1, Ordering::SeqCst);
                        let result = if capture_ok {
                            Ok(Frame {
                                data: vec![0u8; 16],
                                width: 4,
                                height: 4,
                                sequence: 0,
                            })
                        } else {
                            Err(EngineError::Camera(CameraError::CaptureFailed(
                                "fake capture failure".into(),
                            )))
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Scan { reply, .. } => {
                        let stats = consumer_stats.clone();
                        let now =
                            stats.concurrent_scans.fetch_add(1, Ordering::SeqCst) + 1;
                        stats.max_concurrent_scans.fetch_max(now, Ordering::SeqCst);
                        tokio::spawn(async move {
                            tokio::time::sleep(scan_delay).await;
                            stats.scans.fetch_add(1, Ordering::SeqCst);
                            stats.concurrent_scans.fetch_sub(1, Ordering::SeqCst);
                            let _ = reply.send(Ok(FaceScan::Face(Embedding {
                                values: vec![0.1],
                                model: "stub".into(),
                            })));
                        });
                    }
                    EngineRequest::ReinitCamera { reply } => {
                        if consumer_stats.reinits.fetch_add(1, Ordering::SeqCst) == 0 {
                            consumer_stats.captures_at_first_reinit.store(
                                consumer_stats.captures.load(Ordering::SeqCst),
                                Ordering::SeqCst,
                            );
                        }
                        let _ = reply.send(Ok(()));
                    }
                    EngineRequest::BuildCatalog { reply, .. } => {
                        let _ = reply.send(Ok(Catalog::default()));
                    }
                }
            }
        });

        (
            EngineHandle {
                tx,
                scan_timeout: Duration::from_secs(10),
            },
            stats,
        )
    }

    fn test_state(engine: EngineHandle, poll_interval_secs: u64) -> SharedState {
        let mut config = Config::from_env();
        config.poll_interval_secs = poll_interval_secs;
        config.match_threshold = 0.7;
        let publisher = Publisher::connect("127.0.0.1", 1, "facegate/test");
        let catalog = Catalog::from_entries(vec![facegate_core::CatalogEntry {
            identity: "alice".into(),
            references: vec![Embedding {
                values: vec![0.0],
                model: "stub".into(),
            }],
        }]);
        Arc::new(AppState::new(config, engine, publisher, catalog))
    }

    #[tokio::test]
    async fn slow_verification_never_overlaps() {
        // Scans take many tick intervals; the busy flag must drop ticks
        // rather than stacking verifications.
        let (engine, stats) = spawn_fake_engine(true, Duration::from_millis(120));
        let state = test_state(engine, 1);

        // Drive the loop faster than the public config allows (secs-only)
        // by invoking run_inner directly with a short ticker.
        let handle = state.poller.inner.clone();
        handle.running.store(true, Ordering::SeqCst);
        let stop_rx = handle.stop_tx.subscribe();
        let loop_state = state.clone();
        let loop_handle = handle.clone();
        let task = tokio::spawn(run_inner(
            loop_state,
            loop_handle,
            stop_rx,
            Duration::from_millis(10),
        ));

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.stop_tx.send_replace(true);
        let _ = task.await;

        assert!(stats.captures.load(Ordering::SeqCst) >= 2);
        assert_eq!(stats.max_concurrent_scans.load(Ordering::SeqCst), 1);
        // ~40 ticks happened; without skip logic this would approach 40.
        assert!(stats.scans.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn capture_failures_trigger_reinit_at_threshold() {
        let (engine, stats) = spawn_fake_engine(false, Duration::from_millis(1));
        let state = test_state(engine, 1);

        let handle = state.poller.inner.clone();
        handle.running.store(true, Ordering::SeqCst);
        let stop_rx = handle.stop_tx.subscribe();
        let loop_state = state.clone();
        let loop_handle = handle.clone();
        let task = tokio::spawn(run_inner(
            loop_state,
            loop_handle,
            stop_rx,
            Duration::from_millis(5),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop_tx.send_replace(true);
        let _ = task.await;

        assert!(stats.reinits.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            stats.captures_at_first_reinit.load(Ordering::SeqCst),
            CAPTURE_REINIT_THRESHOLD as usize
        );
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_reports_state() {
        let (engine, _stats) = spawn_fake_engine(true, Duration::from_millis(1));
        let state = test_state(engine, 1);

        assert!(state.poller.start(state.clone()));
        assert!(!state.poller.start(state.clone()));
        assert!(state.poller.stop());

        // The loop needs a moment to observe the stop signal.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.poller.is_running());
        assert!(!state.poller.stop());
    }
}
