// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Viewport-driven event fetching.
//!
//! Every camera settle (or forced refresh) leads to at most one fetch for the
//! events intersecting the current bounds:
//!
//! - Triggers are debounced, with a shorter window for the very first fetch
//!   so the map populates quickly, and a longer one afterwards so rapid
//!   panning doesn't cause fetch storms.
//! - If the map has no layout yet (zero-size container, invalid bounds) the
//!   fetch is deferred and retried, never issued with garbage bounds.
//! - A newly triggered fetch supersedes any in-flight one. Ordering is
//!   guarded by a monotonic sequence number ([`FetchGate`]) in addition to
//!   dropping the superseded future, so a stale response can never win even
//!   if cancellation is not delivered.
//! - On success the event set is replaced wholesale; on failure the previous
//!   set is retained and the loading flag clears. Fetch errors are logged,
//!   never surfaced as blocking user errors.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraController;
use crate::entities::{EventEntity, EventRecord};
use crate::geo::ViewportBounds;
use crate::status::SharedSystemStatus;

/// Boxed error for fetch failures.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future so `EventSource` stays object-safe.
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<EventEntity>, FetchError>> + Send>>;

/// The consumed event source: everything inside a geographic rectangle.
pub trait EventSource: Send + Sync {
    fn fetch_events_in_bounds(&self, bounds: ViewportBounds) -> FetchFuture;
}

/// REST-backed event source.
pub struct RestEventSource {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for RestEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestEventSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestEventSource {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl EventSource for RestEventSource {
    fn fetch_events_in_bounds(&self, bounds: ViewportBounds) -> FetchFuture {
        let client = self.client.clone();
        let url = format!("{}/events", self.base_url);
        Box::pin(async move {
            let records: Vec<EventRecord> = client
                .get(&url)
                .query(&[
                    ("south", bounds.south),
                    ("north", bounds.north),
                    ("west", bounds.west),
                    ("east", bounds.east),
                ])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            // Records with unusable coordinates are dropped here, once
            Ok(records
                .into_iter()
                .filter_map(EventRecord::into_entity)
                .collect())
        })
    }
}

/// Last-fetch-wins arbitration.
///
/// Each issued fetch takes a sequence number; a result may only commit when
/// it is both the most recently issued fetch and newer than anything already
/// committed. This holds even when the underlying transport cannot guarantee
/// abort delivery.
#[derive(Debug, Default)]
pub struct FetchGate {
    next_seq: u64,
    committed: Option<u64>,
}

impl FetchGate {
    /// Issue a sequence number for a new fetch.
    pub fn begin(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Attempt to commit a completed fetch. Returns `false` for stale results.
    pub fn try_commit(&mut self, seq: u64) -> bool {
        let latest = self.next_seq.checked_sub(1);
        if latest == Some(seq) && self.committed.is_none_or(|c| seq > c) {
            self.committed = Some(seq);
            true
        } else {
            false
        }
    }
}

/// Timing knobs for the sync loop.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Debounce before the first fetch after spawn.
    pub first_debounce: Duration,
    /// Debounce for every subsequent fetch.
    pub debounce: Duration,
    /// Retry delay while the map is not laid out yet.
    pub layout_retry: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            first_debounce: Duration::from_millis(500),
            debounce: Duration::from_millis(1000),
            layout_retry: Duration::from_millis(250),
        }
    }
}

/// Handle to the background sync task.
pub struct ViewportEventSync {
    events: Arc<Mutex<Vec<EventEntity>>>,
    generation: Arc<AtomicU64>,
    loading: Arc<AtomicBool>,
    trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ViewportEventSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportEventSync")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ViewportEventSync {
    /// Spawn the sync loop listening to camera settles.
    #[must_use]
    pub fn spawn(
        source: Arc<dyn EventSource>,
        camera: Arc<dyn CameraController>,
        status: SharedSystemStatus,
        config: SyncConfig,
    ) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let generation = Arc::new(AtomicU64::new(0));
        let loading = Arc::new(AtomicBool::new(false));
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tokio::spawn(sync_loop(SyncTask {
            source,
            camera,
            status,
            config,
            events: Arc::clone(&events),
            generation: Arc::clone(&generation),
            loading: Arc::clone(&loading),
            trigger_rx,
            cancel: cancel.clone(),
        }));

        Self {
            events,
            generation,
            loading,
            trigger_tx,
            cancel,
        }
    }

    /// Force a refetch outside the settle flow (e.g. pull-to-refresh).
    pub fn request_refresh(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Current event set (the last successfully fetched one).
    #[must_use]
    pub fn events(&self) -> Vec<EventEntity> {
        self.events
            .lock()
            .expect("Event set lock poisoned - unrecoverable state")
            .clone()
    }

    /// Bumped every time the event set is replaced; cheap change detection
    /// for downstream caches (clusterer rebuilds).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Stop the sync loop and cancel any in-flight fetch.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ViewportEventSync {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SyncTask {
    source: Arc<dyn EventSource>,
    camera: Arc<dyn CameraController>,
    status: SharedSystemStatus,
    config: SyncConfig,
    events: Arc<Mutex<Vec<EventEntity>>>,
    generation: Arc<AtomicU64>,
    loading: Arc<AtomicBool>,
    trigger_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

#[allow(clippy::too_many_lines, reason = "one linear state loop reads better unsplit")]
async fn sync_loop(mut task: SyncTask) {
    let mut settles = task.camera.subscribe_settle();
    let mut gate = FetchGate::default();
    let mut first = true;
    let mut pending = false;

    'outer: loop {
        // Wait for a trigger unless one was carried over from a supersede
        if !pending {
            tokio::select! {
                () = task.cancel.cancelled() => break 'outer,
                settle = settles.recv() => {
                    match settle {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break 'outer,
                    }
                }
                Some(()) = task.trigger_rx.recv() => {}
            }
        }
        pending = false;

        // Debounce: every further trigger restarts the quiet window
        let window = if first {
            task.config.first_debounce
        } else {
            task.config.debounce
        };
        loop {
            tokio::select! {
                () = task.cancel.cancelled() => break 'outer,
                () = sleep(window) => break,
                settle = settles.recv() => {
                    match settle {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break 'outer,
                    }
                }
                Some(()) = task.trigger_rx.recv() => {}
            }
        }

        // Resolve bounds; a map that isn't laid out yet is a retryable
        // precondition, not an error
        let bounds = loop {
            match task.camera.bounds() {
                Some(bounds) if bounds.is_valid() => break bounds,
                _ => {
                    debug!("Map not ready for event fetch; retrying");
                    tokio::select! {
                        () = task.cancel.cancelled() => break 'outer,
                        () = sleep(task.config.layout_retry) => {}
                    }
                }
            }
        };

        first = false;
        let seq = gate.begin();
        task.loading.store(true, Ordering::Release);

        let fetch = task.source.fetch_events_in_bounds(bounds);
        tokio::pin!(fetch);

        let outcome = loop {
            tokio::select! {
                () = task.cancel.cancelled() => break 'outer,
                result = &mut fetch => break Some(result),
                settle = settles.recv() => {
                    match settle {
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => break None,
                        Err(broadcast::error::RecvError::Closed) => break 'outer,
                    }
                }
                Some(()) = task.trigger_rx.recv() => break None,
            }
        };

        match outcome {
            // Superseded: the in-flight future is dropped here, and the
            // sequence gate additionally blocks its result from committing
            None => {
                debug!("Event fetch {} superseded", seq);
                pending = true;
            }
            Some(Ok(fetched)) => {
                if gate.try_commit(seq) {
                    let count = fetched.len();
                    *task
                        .events
                        .lock()
                        .expect("Event set lock poisoned - unrecoverable state") = fetched;
                    task.generation.fetch_add(1, Ordering::AcqRel);
                    if let Ok(mut status) = task.status.lock() {
                        status.record_fetch_success(count);
                    }
                    debug!("Event fetch {} committed ({} events)", seq, count);
                }
                task.loading.store(false, Ordering::Release);
            }
            Some(Err(e)) => {
                // Events are supplementary; keep the previous set
                warn!("Event fetch failed: {}", e);
                if let Ok(mut status) = task.status.lock() {
                    status.record_fetch_failure();
                }
                task.loading.store(false, Ordering::Release);
            }
        }
    }

    task.loading.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SimCamera;
    use crate::entities::Tier;
    use crate::geo::GeoPoint;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn event(id: &str) -> EventEntity {
        EventEntity {
            id: id.to_string(),
            title: String::new(),
            category: "food".to_string(),
            point: GeoPoint::new(9.65, -82.75).unwrap(),
            start_time: None,
            tier: Tier::Bronze,
            priority: 0,
        }
    }

    /// Scripted source: each call pops a (delay, result) pair; when the
    /// script runs dry it answers instantly with an empty set.
    struct ScriptedSource {
        script: Mutex<VecDeque<(Duration, Result<Vec<EventEntity>, String>)>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<(Duration, Result<Vec<EventEntity>, String>)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EventSource for ScriptedSource {
        fn fetch_events_in_bounds(&self, _bounds: ViewportBounds) -> FetchFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            Box::pin(async move {
                let (delay, result) = next.unwrap_or((Duration::ZERO, Ok(Vec::new())));
                sleep(delay).await;
                result.map_err(|e| -> FetchError { e.into() })
            })
        }
    }

    fn ready_camera() -> Arc<SimCamera> {
        let camera = Arc::new(SimCamera::new(GeoPoint::new(9.65, -82.75).unwrap(), 12.0));
        camera.set_viewport_size(1280, 720);
        camera
    }

    #[test]
    fn test_gate_discards_stale_results() {
        let mut gate = FetchGate::default();
        let a = gate.begin();
        let b = gate.begin();

        // B resolves first and wins; A resolving later must be discarded
        assert!(gate.try_commit(b));
        assert!(!gate.try_commit(a));
    }

    #[test]
    fn test_gate_rejects_replay() {
        let mut gate = FetchGate::default();
        let a = gate.begin();
        assert!(gate.try_commit(a));
        assert!(!gate.try_commit(a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_settles_coalesce_into_one_fetch() {
        let source = ScriptedSource::new(vec![(
            Duration::ZERO,
            Ok(vec![event("e-1"), event("e-2")]),
        )]);
        let camera = ready_camera();
        let sync = ViewportEventSync::spawn(
            source.clone(),
            camera.clone(),
            crate::status::shared(),
            SyncConfig::default(),
        );

        for _ in 0..3 {
            camera.jump_to(GeoPoint::new(9.66, -82.76).unwrap(), 12.0);
        }

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(source.calls(), 1);
        assert_eq!(sync.events().len(), 2);
        assert!(!sync.is_loading());
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_trigger_supersedes_in_flight_fetch() {
        // First fetch is slow; the second settle arrives while it is in
        // flight and must win
        let source = ScriptedSource::new(vec![
            (Duration::from_secs(30), Ok(vec![event("stale")])),
            (Duration::from_millis(10), Ok(vec![event("fresh-1"), event("fresh-2")])),
        ]);
        let camera = ready_camera();
        let sync = ViewportEventSync::spawn(
            source.clone(),
            camera.clone(),
            crate::status::shared(),
            SyncConfig::default(),
        );

        camera.jump_to(GeoPoint::new(9.66, -82.76).unwrap(), 12.0);
        // Let the debounce elapse and the slow fetch start
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), 1);

        camera.jump_to(GeoPoint::new(9.67, -82.77).unwrap(), 12.0);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(source.calls(), 2);
        let ids: Vec<_> = sync.events().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["fresh-1", "fresh-2"]);
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retains_previous_set() {
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Ok(vec![event("keep")])),
            (Duration::ZERO, Err("backend unavailable".to_string())),
        ]);
        let camera = ready_camera();
        let status = crate::status::shared();
        let sync = ViewportEventSync::spawn(
            source.clone(),
            camera.clone(),
            Arc::clone(&status),
            SyncConfig::default(),
        );

        camera.jump_to(GeoPoint::new(9.66, -82.76).unwrap(), 12.0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sync.events().len(), 1);

        camera.jump_to(GeoPoint::new(9.67, -82.77).unwrap(), 12.0);
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Previous set retained, loading cleared, failure counted
        assert_eq!(sync.events()[0].id, "keep");
        assert!(!sync.is_loading());
        assert_eq!(status.lock().unwrap().fetch_failure_count, 1);
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_defers_fetch_until_map_laid_out() {
        // Two entries: the resize settle right after layout refetches once more
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Ok(vec![event("e-1")])),
            (Duration::ZERO, Ok(vec![event("e-1")])),
        ]);
        let camera = Arc::new(SimCamera::new(GeoPoint::new(9.65, -82.75).unwrap(), 12.0));
        let sync = ViewportEventSync::spawn(
            source.clone(),
            camera.clone(),
            crate::status::shared(),
            SyncConfig::default(),
        );

        sync.request_refresh();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(source.calls(), 0);

        camera.set_viewport_size(1280, 720);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(source.calls() >= 1);
        assert_eq!(sync.events().len(), 1);
        sync.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_fetch() {
        let source = ScriptedSource::new(vec![(Duration::from_secs(3600), Ok(vec![event("never")]))]);
        let camera = ready_camera();
        let sync = ViewportEventSync::spawn(
            source.clone(),
            camera.clone(),
            crate::status::shared(),
            SyncConfig::default(),
        );

        camera.jump_to(GeoPoint::new(9.66, -82.76).unwrap(), 12.0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.calls(), 1);

        sync.shutdown();
        tokio::time::sleep(Duration::from_secs(7200)).await;

        assert!(sync.events().is_empty());
        assert!(!sync.is_loading());
    }
}
