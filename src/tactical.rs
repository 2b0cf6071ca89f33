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

//! The tactical mode state machine.
//!
//! Arbitrates between user intent and autonomous camera behavior. All
//! transition policy lives here, in one auditable place, instead of ad hoc
//! boolean flags scattered across timers:
//!
//! - `Idle -> Patrol` automatically when the map has gone idle with no active
//!   missions, unless the user has explicitly disabled patrol.
//! - `Patrol/Idle -> Mission` when a mission is selected, or when activity
//!   resumes while missions exist.
//! - `any -> Focus` when the user selects an entity; patrol is suspended for
//!   the duration of focus.
//! - Leaving Focus/Mission resumes patrol only if the user's last explicit
//!   toggle was "on". The intent flag is persisted separately from idleness:
//!   an explicit "stop patrol" sticks even if the map goes idle again.
//!
//! State is mutated only through the controller's action functions.

use std::collections::HashSet;
use std::time::Duration;

use log::info;
use tokio::sync::broadcast;

use crate::geo::GeoPoint;

/// Camera flight length when focusing a selection.
pub const SELECT_FLY_DURATION: Duration = Duration::from_millis(1500);
/// Zoom applied when focusing a selection.
pub const SELECT_ZOOM: f64 = 15.0;

/// Top-level map mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TacticalMode {
    #[default]
    Idle,
    Patrol,
    Mission,
    Focus,
}

/// A selectable non-mission entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Merchant(String),
    Event(String),
}

/// Short feedback cue played on selection; the host maps this to audio/haptics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackCue {
    Selection,
}

/// A camera movement requested by a state transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraDirective {
    pub target: GeoPoint,
    pub zoom: f64,
    pub duration: Duration,
}

/// Inputs for periodic re-evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ModeInputs {
    /// Idle long enough and nothing being delivered.
    pub should_auto_patrol: bool,
    /// Missions currently present in the snapshot.
    pub mission_count: usize,
}

/// The per-map tactical state. Read-only outside the controller.
#[derive(Debug, Clone, Default)]
pub struct TacticalState {
    pub mode: TacticalMode,
    pub is_patrolling: bool,
    /// Persisted user intent; survives idleness changes.
    pub patrol_enabled: bool,
    pub selected_entity: Option<EntityRef>,
    pub selected_mission_id: Option<String>,
    pub active_categories: HashSet<String>,
    pub search_query: String,
}

/// Owns [`TacticalState`] and applies every transition.
#[derive(Debug)]
pub struct TacticalModeController {
    state: TacticalState,
    cue_tx: broadcast::Sender<FeedbackCue>,
}

impl Default for TacticalModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl TacticalModeController {
    #[must_use]
    pub fn new() -> Self {
        let (cue_tx, _) = broadcast::channel(16);
        Self {
            state: TacticalState {
                patrol_enabled: true,
                ..TacticalState::default()
            },
            cue_tx,
        }
    }

    #[must_use]
    pub fn state(&self) -> &TacticalState {
        &self.state
    }

    /// Subscribe to selection feedback cues.
    #[must_use]
    pub fn subscribe_cues(&self) -> broadcast::Receiver<FeedbackCue> {
        self.cue_tx.subscribe()
    }

    fn enter(&mut self, mode: TacticalMode) -> bool {
        if self.state.mode == mode {
            return false;
        }
        info!("Tactical mode {:?} -> {:?}", self.state.mode, mode);
        self.state.mode = mode;
        self.state.is_patrolling = mode == TacticalMode::Patrol;
        true
    }

    /// User selected a merchant or event: enter Focus and fly to it.
    pub fn select_entity(&mut self, entity: EntityRef, point: GeoPoint) -> CameraDirective {
        self.state.selected_entity = Some(entity);
        self.state.selected_mission_id = None;
        self.enter(TacticalMode::Focus);
        let _ = self.cue_tx.send(FeedbackCue::Selection);
        CameraDirective {
            target: point,
            zoom: SELECT_ZOOM,
            duration: SELECT_FLY_DURATION,
        }
    }

    /// User selected a mission: enter Mission and fly to it when it has a
    /// usable coordinate.
    pub fn select_mission(&mut self, mission_id: String, point: Option<GeoPoint>) -> Option<CameraDirective> {
        self.state.selected_mission_id = Some(mission_id);
        self.state.selected_entity = None;
        self.enter(TacticalMode::Mission);
        let _ = self.cue_tx.send(FeedbackCue::Selection);
        point.map(|target| CameraDirective {
            target,
            zoom: SELECT_ZOOM,
            duration: SELECT_FLY_DURATION,
        })
    }

    /// Deselect everything and fall back to whatever the situation derives.
    pub fn clear_selection(&mut self, inputs: ModeInputs) -> bool {
        self.state.selected_entity = None;
        self.state.selected_mission_id = None;
        self.evaluate(inputs)
    }

    /// Flip the persisted patrol intent. Enabling engages patrol right away;
    /// disabling sticks until the user re-enables it, idleness notwithstanding.
    pub fn toggle_patrol(&mut self, inputs: ModeInputs) -> bool {
        self.state.patrol_enabled = !self.state.patrol_enabled;
        info!(
            "Patrol {} by user",
            if self.state.patrol_enabled { "enabled" } else { "disabled" }
        );
        if self.state.patrol_enabled {
            self.state.selected_entity = None;
            self.state.selected_mission_id = None;
            self.enter(TacticalMode::Patrol)
        } else {
            self.evaluate(inputs)
        }
    }

    pub fn set_search_query(&mut self, query: String) {
        self.state.search_query = query;
    }

    /// Toggle a category filter on or off.
    pub fn toggle_category(&mut self, category: &str) {
        if !self.state.active_categories.remove(category) {
            self.state.active_categories.insert(category.to_string());
        }
    }

    /// Re-derive the mode from current inputs. Returns whether it changed.
    ///
    /// Priority: an explicit selection always wins (Focus, then Mission);
    /// otherwise patrol when auto conditions hold and the user hasn't
    /// disabled it; otherwise Mission while missions exist and the user is
    /// active; otherwise Idle.
    pub fn evaluate(&mut self, inputs: ModeInputs) -> bool {
        let next = if self.state.selected_entity.is_some() {
            TacticalMode::Focus
        } else if self.state.selected_mission_id.is_some() {
            TacticalMode::Mission
        } else if inputs.should_auto_patrol && self.state.patrol_enabled {
            TacticalMode::Patrol
        } else if inputs.mission_count > 0 {
            TacticalMode::Mission
        } else {
            TacticalMode::Idle
        };
        self.enter(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_inputs() -> ModeInputs {
        ModeInputs {
            should_auto_patrol: true,
            mission_count: 0,
        }
    }

    fn active_inputs(missions: usize) -> ModeInputs {
        ModeInputs {
            should_auto_patrol: false,
            mission_count: missions,
        }
    }

    fn point() -> GeoPoint {
        GeoPoint::new(9.65, -82.75).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let controller = TacticalModeController::new();
        assert_eq!(controller.state().mode, TacticalMode::Idle);
        assert!(controller.state().patrol_enabled);
        assert!(!controller.state().is_patrolling);
    }

    #[test]
    fn test_idle_to_patrol_when_auto_conditions_hold() {
        let mut controller = TacticalModeController::new();
        assert!(controller.evaluate(idle_inputs()));
        assert_eq!(controller.state().mode, TacticalMode::Patrol);
        assert!(controller.state().is_patrolling);
    }

    #[test]
    fn test_activity_with_missions_enters_mission_mode() {
        let mut controller = TacticalModeController::new();
        controller.evaluate(idle_inputs());

        // User comes back while deliveries exist
        controller.evaluate(active_inputs(2));
        assert_eq!(controller.state().mode, TacticalMode::Mission);
        assert!(!controller.state().is_patrolling);
    }

    #[test]
    fn test_selection_enters_focus_with_flight() {
        let mut controller = TacticalModeController::new();
        controller.evaluate(idle_inputs());
        let mut cues = controller.subscribe_cues();

        let directive =
            controller.select_entity(EntityRef::Merchant("m-1".to_string()), point());

        assert_eq!(controller.state().mode, TacticalMode::Focus);
        assert!(!controller.state().is_patrolling);
        assert_eq!(directive.duration, SELECT_FLY_DURATION);
        assert_eq!(directive.target, point());
        assert_eq!(cues.try_recv().unwrap(), FeedbackCue::Selection);
    }

    #[test]
    fn test_deselection_resumes_patrol_when_intent_is_on() {
        let mut controller = TacticalModeController::new();
        controller.select_entity(EntityRef::Event("e-1".to_string()), point());

        controller.clear_selection(idle_inputs());
        assert_eq!(controller.state().mode, TacticalMode::Patrol);
    }

    #[test]
    fn test_explicit_patrol_disable_sticks_through_idleness() {
        let mut controller = TacticalModeController::new();
        controller.evaluate(idle_inputs());
        assert!(controller.state().is_patrolling);

        // User explicitly stops patrol
        controller.toggle_patrol(idle_inputs());
        assert!(!controller.state().patrol_enabled);
        assert_ne!(controller.state().mode, TacticalMode::Patrol);

        // Map goes idle again: patrol must NOT re-engage on its own
        controller.evaluate(idle_inputs());
        assert_ne!(controller.state().mode, TacticalMode::Patrol);

        // Until the user re-enables it
        controller.toggle_patrol(idle_inputs());
        assert_eq!(controller.state().mode, TacticalMode::Patrol);
    }

    #[test]
    fn test_mission_selection_without_point_skips_flight() {
        let mut controller = TacticalModeController::new();
        let directive = controller.select_mission("o-1".to_string(), None);
        assert!(directive.is_none());
        assert_eq!(controller.state().mode, TacticalMode::Mission);
    }

    #[test]
    fn test_category_toggle() {
        let mut controller = TacticalModeController::new();
        controller.toggle_category("food");
        assert!(controller.state().active_categories.contains("food"));
        controller.toggle_category("food");
        assert!(!controller.state().active_categories.contains("food"));
    }
}
