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

//! Engine composition.
//!
//! [`TacticalEngine`] owns every subsystem and every timer: the idle/mode
//! evaluation tick, the patrol cycle, and the frame loop that advances
//! interpolation (spawned lazily and self-terminating once nothing is
//! mid-flight). The host drives it through action methods and reads
//! [`RenderSnapshot`]s; all derived collections are pure recomputations from
//! current state.
//!
//! Shutting the engine down cancels the in-flight viewport fetch, every
//! timer, the frame loop, and any active geolocation watch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraController;
use crate::cluster::{ClusterFeature, ClustererConfig, SpatialClusterer};
use crate::entities::{EventEntity, MerchantEntity, MissionEntity, MissionStatus};
use crate::geo::GeoPoint;
use crate::geolocate::{GeolocationTracker, LocationProvider};
use crate::hotzone::{self, HotZone, IdleMonitor};
use crate::interpolate::{DisplayedEntity, PositionInterpolator, DEFAULT_DURATION_MS};
use crate::markers::{EntityMarkerReconciler, MarkerSink};
use crate::patrol::{self, PatrolScheduler, PatrolTarget};
use crate::status::SharedSystemStatus;
use crate::tactical::{
    CameraDirective, EntityRef, FeedbackCue, ModeInputs, TacticalMode, TacticalModeController,
    SELECT_FLY_DURATION,
};
use crate::viewport::{EventSource, SyncConfig, ViewportEventSync};

/// Engine timing and analysis knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cluster: ClustererConfig,
    pub sync: SyncConfig,
    /// Hot-zone grid cell size in degrees.
    pub grid_size_degrees: f64,
    /// Seconds without interaction before the map counts as idle.
    pub idle_threshold_secs: i64,
    /// How often idle state and mode transitions are re-evaluated.
    pub idle_check_interval: Duration,
    /// Static patrol fallback targets.
    pub patrol_pois: Vec<PatrolTarget>,
    /// Frame loop tick while interpolations are in flight.
    pub frame_interval: Duration,
    /// Interpolation animation length per fix.
    pub interpolation_duration_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster: ClustererConfig::default(),
            sync: SyncConfig::default(),
            grid_size_degrees: hotzone::DEFAULT_GRID_SIZE_DEGREES,
            idle_threshold_secs: 30,
            idle_check_interval: Duration::from_secs(5),
            patrol_pois: Vec::new(),
            frame_interval: Duration::from_millis(33),
            interpolation_duration_ms: DEFAULT_DURATION_MS,
        }
    }
}

/// Everything the host needs to paint one frame.
#[derive(Debug, Clone)]
pub struct RenderSnapshot {
    pub clusters: Vec<ClusterFeature>,
    pub hot_zones: Vec<HotZone>,
    pub urgent_events: Vec<EventEntity>,
    pub moving_entities: Vec<DisplayedEntity>,
    pub mode: TacticalMode,
    pub is_patrolling: bool,
    pub selected_entity: Option<EntityRef>,
    pub selected_mission_id: Option<String>,
    pub user_position: Option<GeoPoint>,
    pub loading: bool,
}

/// Monotonic wall clock anchored at engine start.
///
/// Timers run on the tokio clock; deriving "now" from it keeps every
/// time-dependent computation consistent with those timers (including under
/// `tokio::time::pause` in tests).
#[derive(Debug, Clone, Copy)]
struct EngineClock {
    epoch: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl EngineClock {
    fn new() -> Self {
        Self {
            epoch: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.epoch
            + chrono::Duration::from_std(self.started.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

struct EngineCore {
    controller: TacticalModeController,
    patrol: PatrolScheduler,
    interpolator: PositionInterpolator,
    idle: IdleMonitor,
    merchants: Vec<MerchantEntity>,
    missions: Vec<MissionEntity>,
    reconciler: EntityMarkerReconciler,
    clusterer: SpatialClusterer,
    /// (event generation, filter revision) the clusterer was last built for.
    built_for: Option<(u64, u64)>,
    filter_revision: u64,
    frame_loop_running: bool,
}

/// The tactical map orchestration engine.
pub struct TacticalEngine {
    core: Arc<Mutex<EngineCore>>,
    camera: Arc<dyn CameraController>,
    sync: ViewportEventSync,
    geolocation: Arc<GeolocationTracker>,
    sink: Arc<Mutex<Box<dyn MarkerSink>>>,
    status: SharedSystemStatus,
    config: EngineConfig,
    clock: EngineClock,
    frame_tx: broadcast::Sender<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TacticalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TacticalEngine").finish_non_exhaustive()
    }
}

impl TacticalEngine {
    /// Wire up all subsystems and start the background timers.
    #[must_use]
    pub fn spawn(
        config: EngineConfig,
        camera: Arc<dyn CameraController>,
        source: Arc<dyn EventSource>,
        location: Arc<dyn LocationProvider>,
        sink: Box<dyn MarkerSink>,
        status: SharedSystemStatus,
    ) -> Arc<Self> {
        let clock = EngineClock::new();
        let sync = ViewportEventSync::spawn(
            source,
            Arc::clone(&camera),
            Arc::clone(&status),
            config.sync,
        );
        let geolocation = Arc::new(GeolocationTracker::new(
            location,
            Arc::clone(&camera),
            Arc::clone(&status),
        ));
        let (frame_tx, _) = broadcast::channel(4);

        let core = Arc::new(Mutex::new(EngineCore {
            controller: TacticalModeController::new(),
            patrol: PatrolScheduler::new(),
            interpolator: PositionInterpolator::new(config.interpolation_duration_ms),
            idle: IdleMonitor::new(config.idle_threshold_secs, clock.now()),
            merchants: Vec::new(),
            missions: Vec::new(),
            reconciler: EntityMarkerReconciler::default(),
            clusterer: SpatialClusterer::new(config.cluster),
            built_for: None,
            filter_revision: 0,
            frame_loop_running: false,
        }));

        let engine = Arc::new(Self {
            core,
            camera,
            sync,
            geolocation,
            sink: Arc::new(Mutex::new(sink)),
            status,
            config,
            clock,
            frame_tx,
            cancel: CancellationToken::new(),
        });

        engine.spawn_evaluation_task();
        engine.spawn_patrol_task();
        engine
    }

    // ----- host-facing reads -------------------------------------------------

    /// Compute the current renderable state. Pure recomputation; derived
    /// collections are never incrementally mutated.
    #[must_use]
    pub fn snapshot(&self) -> RenderSnapshot {
        let now = self.clock.now();
        let events = self.filtered_events();
        let generation = self.sync.generation();

        let mut core = self.lock_core();

        let key = (generation, core.filter_revision);
        if core.built_for != Some(key) {
            core.clusterer.build(events.clone());
            core.built_for = Some(key);
        }

        let clusters = match self.camera.bounds() {
            Some(bounds) => {
                let zoom = self.camera.zoom().round().clamp(0.0, 22.0) as u8;
                core.clusterer.query(bounds, zoom)
            }
            None => Vec::new(),
        };

        RenderSnapshot {
            clusters,
            hot_zones: hotzone::detect(&events, self.config.grid_size_degrees),
            urgent_events: hotzone::urgent_events(&events, now),
            moving_entities: core.interpolator.sample(now),
            mode: core.controller.state().mode,
            is_patrolling: core.controller.state().is_patrolling,
            selected_entity: core.controller.state().selected_entity.clone(),
            selected_mission_id: core.controller.state().selected_mission_id.clone(),
            user_position: self.geolocation.position(),
            loading: self.sync.is_loading(),
        }
    }

    /// Host repaint signal: fires on every frame-loop tick.
    #[must_use]
    pub fn subscribe_frames(&self) -> broadcast::Receiver<()> {
        self.frame_tx.subscribe()
    }

    /// Selection feedback cues; the host maps these to audio/haptics.
    #[must_use]
    pub fn subscribe_cues(&self) -> broadcast::Receiver<FeedbackCue> {
        self.lock_core().controller.subscribe_cues()
    }

    #[must_use]
    pub fn status(&self) -> SharedSystemStatus {
        Arc::clone(&self.status)
    }

    // ----- host-facing actions ----------------------------------------------

    /// Record a user interaction (pan, zoom, click). Resets the idle clock
    /// immediately. Programmatic camera moves must not be reported here.
    pub fn note_interaction(&self) {
        let now = self.clock.now();
        let mut core = self.lock_core();
        core.idle.note_interaction(now);
        let inputs = Self::inputs_for(&core, now);
        if core.controller.evaluate(inputs) {
            self.record_mode_change();
        }
    }

    /// Select a merchant or event; flies the camera and plays the cue.
    pub fn select_entity(&self, entity: EntityRef, point: GeoPoint) {
        let directive = {
            let mut core = self.lock_core();
            let directive = core.controller.select_entity(entity, point);
            self.record_mode_change();
            directive
        };
        self.fly(directive);
    }

    /// Select a mission by id; flies to its destination (or origin).
    pub fn select_mission(&self, mission_id: &str) {
        let directive = {
            let mut core = self.lock_core();
            let point = core
                .missions
                .iter()
                .find(|m| m.id == mission_id)
                .and_then(|m| m.destination.or(m.origin));
            let directive = core
                .controller
                .select_mission(mission_id.to_string(), point);
            self.record_mode_change();
            self.refresh_markers(&mut core);
            directive
        };
        if let Some(directive) = directive {
            self.fly(directive);
        }
    }

    /// Clear any selection; patrol resumes only when user intent allows.
    pub fn clear_selection(&self) {
        let now = self.clock.now();
        let activate = {
            let mut core = self.lock_core();
            let inputs = Self::inputs_for(&core, now);
            let changed = core.controller.clear_selection(inputs);
            if changed {
                self.record_mode_change();
            }
            self.refresh_markers(&mut core);
            changed && core.controller.state().is_patrolling
        };
        if activate {
            self.activate_patrol();
        }
    }

    /// Flip the persisted patrol intent.
    pub fn toggle_patrol(&self) {
        let now = self.clock.now();
        let activate = {
            let mut core = self.lock_core();
            let inputs = Self::inputs_for(&core, now);
            if core.controller.toggle_patrol(inputs) {
                self.record_mode_change();
            }
            core.controller.state().is_patrolling
        };
        if activate {
            self.activate_patrol();
        }
    }

    pub fn set_search_query(&self, query: &str) {
        let mut core = self.lock_core();
        core.controller.set_search_query(query.to_string());
        core.filter_revision += 1;
    }

    pub fn toggle_category(&self, category: &str) {
        let mut core = self.lock_core();
        core.controller.toggle_category(category);
        core.filter_revision += 1;
    }

    /// Acquire the user's location; see [`GeolocationTracker::locate`].
    pub fn locate_user(&self, continuous: bool) {
        let geolocation = Arc::clone(&self.geolocation);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = geolocation.locate(continuous) => {}
            }
        });
    }

    /// Replace the merchant snapshot (authoritative on receipt).
    pub fn set_merchants(&self, merchants: Vec<MerchantEntity>) {
        let mut core = self.lock_core();
        core.merchants = merchants;
        self.refresh_markers(&mut core);
    }

    /// Replace the mission snapshot (authoritative on receipt).
    pub fn set_missions(&self, missions: Vec<MissionEntity>) {
        let now = self.clock.now();
        let mut core = self.lock_core();
        core.missions = missions;
        let inputs = Self::inputs_for(&core, now);
        if core.controller.evaluate(inputs) {
            self.record_mode_change();
        }
        self.refresh_markers(&mut core);
    }

    /// Feed one moving-entity fix into the interpolator.
    pub fn ingest_fix(
        self: &Arc<Self>,
        entity_id: &str,
        point: GeoPoint,
        bearing: Option<f64>,
        status: Option<String>,
    ) {
        let now = self.clock.now();
        {
            let mut core = self.lock_core();
            core.interpolator.report(entity_id, point, bearing, status, now);
        }
        if let Ok(mut status) = self.status.lock() {
            status.record_fix();
        }
        self.ensure_frame_loop();
    }

    /// Zoom into a clicked cluster: fly to its center at the minimal zoom
    /// where it first splits.
    pub fn expand_cluster(&self, cluster_id: u64) {
        let resolved = {
            let core = self.lock_core();
            let Some(bounds) = self.camera.bounds() else {
                return;
            };
            let at_zoom = self.camera.zoom().round().clamp(0.0, 22.0) as u8;
            core.clusterer
                .query(bounds, at_zoom)
                .iter()
                .find_map(|feature| match feature {
                    ClusterFeature::Cluster { id, point, .. } if *id == cluster_id => {
                        Some((*point, core.clusterer.expansion_zoom(cluster_id, at_zoom)))
                    }
                    _ => None,
                })
        };
        if let Some((point, zoom)) = resolved {
            self.camera
                .fly_to(point, f64::from(zoom), SELECT_FLY_DURATION);
        }
    }

    /// Force an event refetch outside the settle flow.
    pub fn request_refresh(&self) {
        self.sync.request_refresh();
    }

    /// Tear everything down: in-flight fetch, timers, frame loop, watches.
    pub fn shutdown(&self) {
        debug!("Tactical engine shutting down");
        self.cancel.cancel();
        self.sync.shutdown();
        self.geolocation.teardown();
    }

    // ----- internals ---------------------------------------------------------

    fn lock_core(&self) -> std::sync::MutexGuard<'_, EngineCore> {
        self.core
            .lock()
            .expect("Engine core lock poisoned - unrecoverable state")
    }

    fn record_mode_change(&self) {
        if let Ok(mut status) = self.status.lock() {
            status.record_mode_change();
        }
    }

    fn fly(&self, directive: CameraDirective) {
        self.camera
            .fly_to(directive.target, directive.zoom, directive.duration);
    }

    fn inputs_for(core: &EngineCore, now: DateTime<Utc>) -> ModeInputs {
        let active = core
            .missions
            .iter()
            .filter(|m| m.status != MissionStatus::Delivered)
            .count();
        ModeInputs {
            should_auto_patrol: hotzone::should_auto_patrol(core.idle.is_idle(now), active),
            mission_count: active,
        }
    }

    /// Events after category and search filtering.
    fn filtered_events(&self) -> Vec<EventEntity> {
        let events = self.sync.events();
        let core = self.lock_core();
        let state = core.controller.state();
        let query = state.search_query.to_lowercase();
        events
            .into_iter()
            .filter(|e| {
                state.active_categories.is_empty()
                    || state.active_categories.contains(&e.category)
            })
            .filter(|e| query.is_empty() || e.title.to_lowercase().contains(&query))
            .collect()
    }

    fn refresh_markers(&self, core: &mut EngineCore) {
        let now = self.clock.now();
        let local_now = now.naive_local();

        let courier_positions: HashMap<String, GeoPoint> = core
            .interpolator
            .sample(now)
            .into_iter()
            .map(|e| (e.entity_id, e.point))
            .collect();
        let selected = core.controller.state().selected_mission_id.clone();

        let mut sink = self
            .sink
            .lock()
            .expect("Marker sink lock poisoned - unrecoverable state");
        let merchants = std::mem::take(&mut core.merchants);
        core.reconciler
            .sync_merchants(&merchants, local_now, sink.as_mut());
        core.merchants = merchants;

        let missions = std::mem::take(&mut core.missions);
        core.reconciler.sync_missions(
            &missions,
            &courier_positions,
            selected.as_deref(),
            sink.as_mut(),
        );
        core.missions = missions;
    }

    fn rebuild_patrol_targets(&self, core: &mut EngineCore, now: DateTime<Utc>) {
        let events = {
            // filtered_events locks core itself; compute from the sync set here
            let state = core.controller.state();
            let query = state.search_query.to_lowercase();
            self.sync
                .events()
                .into_iter()
                .filter(|e| {
                    state.active_categories.is_empty()
                        || state.active_categories.contains(&e.category)
                })
                .filter(|e| query.is_empty() || e.title.to_lowercase().contains(&query))
                .collect::<Vec<_>>()
        };
        let zones = hotzone::detect(&events, self.config.grid_size_degrees);
        let urgent = hotzone::urgent_events(&events, now);
        core.patrol
            .set_targets(patrol::build_targets(&zones, &urgent, &self.config.patrol_pois));
    }

    /// Fly to the current patrol target immediately (patrol activation does
    /// not wait for the first interval tick).
    fn activate_patrol(&self) {
        let now = self.clock.now();
        let target = {
            let mut core = self.lock_core();
            self.rebuild_patrol_targets(&mut core, now);
            core.patrol.current().cloned()
        };
        if let Some(target) = target {
            self.camera
                .fly_to(target.point, patrol::PATROL_ZOOM, patrol::PATROL_FLY_DURATION);
        }
    }

    fn spawn_evaluation_task(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.idle_check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let now = engine.clock.now();
                let entered_patrol = {
                    let mut core = engine.lock_core();
                    let inputs = Self::inputs_for(&core, now);
                    let was_patrolling = core.controller.state().is_patrolling;
                    let changed = core.controller.evaluate(inputs);
                    if changed {
                        engine.record_mode_change();
                    }
                    if core.controller.state().is_patrolling {
                        // Keep the route current as zones/urgency shift
                        engine.rebuild_patrol_targets(&mut core, now);
                    }
                    changed && !was_patrolling && core.controller.state().is_patrolling
                };
                if entered_patrol {
                    engine.activate_patrol();
                }
            }
        });
    }

    fn spawn_patrol_task(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(patrol::PATROL_CYCLE);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let target = {
                    let mut core = engine.lock_core();
                    if !core.controller.state().is_patrolling {
                        continue;
                    }
                    core.patrol.advance().cloned()
                };
                if let Some(target) = target {
                    debug!("Patrol advancing to {}", target.label);
                    engine.camera.fly_to(
                        target.point,
                        patrol::PATROL_ZOOM,
                        patrol::PATROL_FLY_DURATION,
                    );
                }
            }
        });
    }

    /// Start the frame loop if it isn't running. The loop reschedules itself
    /// only while interpolation targets are in flight and exits otherwise.
    fn ensure_frame_loop(self: &Arc<Self>) {
        {
            let mut core = self.lock_core();
            if core.frame_loop_running || !core.interpolator.in_flight() {
                return;
            }
            core.frame_loop_running = true;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.frame_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let now = engine.clock.now();
                let still_flying = {
                    let mut core = engine.lock_core();
                    core.interpolator.sample(now);
                    // Live courier movement drags mission paths along
                    engine.refresh_markers(&mut core);
                    if core.interpolator.in_flight() {
                        true
                    } else {
                        core.frame_loop_running = false;
                        false
                    }
                };
                let _ = engine.frame_tx.send(());
                if !still_flying {
                    break;
                }
            }

            // Ensure the flag clears even on cancellation
            engine.lock_core().frame_loop_running = false;
        });
    }
}

impl Drop for TacticalEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
