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

//! Autonomous camera patrol.
//!
//! While patrol is active the engine cycles the camera across a prioritized
//! target list on a fixed interval: hot zones first, then urgent events,
//! falling back to the static points of interest from config when nothing is
//! dynamically interesting. Target-list changes keep cycling progress; the
//! index is taken modulo the new length rather than reset.

use std::time::Duration;

use crate::entities::EventEntity;
use crate::geo::GeoPoint;
use crate::hotzone::HotZone;

/// Interval between patrol camera moves.
pub const PATROL_CYCLE: Duration = Duration::from_secs(12);
/// Flight animation length for each patrol move.
pub const PATROL_FLY_DURATION: Duration = Duration::from_secs(5);
/// Zoom applied when patrolling to a target.
pub const PATROL_ZOOM: f64 = 14.0;

/// One stop on the patrol route.
#[derive(Debug, Clone, PartialEq)]
pub struct PatrolTarget {
    pub point: GeoPoint,
    pub label: String,
}

/// Build the prioritized target list for the current situation.
#[must_use]
pub fn build_targets(
    hot_zones: &[HotZone],
    urgent: &[EventEntity],
    fallback: &[PatrolTarget],
) -> Vec<PatrolTarget> {
    let mut targets: Vec<PatrolTarget> = hot_zones
        .iter()
        .map(|zone| PatrolTarget {
            point: zone.center,
            label: format!("Hot zone ({} events)", zone.count),
        })
        .collect();

    targets.extend(urgent.iter().map(|event| PatrolTarget {
        point: event.point,
        label: event.title.clone(),
    }));

    if targets.is_empty() {
        targets.extend_from_slice(fallback);
    }

    targets
}

/// Cycles through a target list, wrapping after the last entry.
#[derive(Debug, Default)]
pub struct PatrolScheduler {
    targets: Vec<PatrolTarget>,
    index: usize,
}

impl PatrolScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the target list, keeping cycling progress in-bounds.
    pub fn set_targets(&mut self, targets: Vec<PatrolTarget>) {
        self.targets = targets;
        if self.targets.is_empty() {
            self.index = 0;
        } else {
            self.index %= self.targets.len();
        }
    }

    /// The target the camera is (or should be) on right now. Activating
    /// patrol flies here immediately rather than waiting for the first tick.
    #[must_use]
    pub fn current(&self) -> Option<&PatrolTarget> {
        self.targets.get(self.index)
    }

    /// Step to the next target, wrapping to the start after the last.
    pub fn advance(&mut self) -> Option<&PatrolTarget> {
        if self.targets.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.targets.len();
        self.targets.get(self.index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tier;

    fn point(lat: f64) -> GeoPoint {
        GeoPoint::new(lat, -82.75).unwrap()
    }

    fn poi(label: &str, lat: f64) -> PatrolTarget {
        PatrolTarget {
            point: point(lat),
            label: label.to_string(),
        }
    }

    fn urgent_event(title: &str, lat: f64) -> EventEntity {
        EventEntity {
            id: title.to_string(),
            title: title.to_string(),
            category: "food".to_string(),
            point: point(lat),
            start_time: None,
            tier: Tier::Bronze,
            priority: 0,
        }
    }

    #[test]
    fn test_targets_prioritize_zones_then_urgent() {
        let zones = vec![HotZone {
            center: point(9.61),
            count: 4,
            radius_meters: 500.0,
        }];
        let urgent = vec![urgent_event("Flash Sale", 9.62)];
        let fallback = vec![poi("Plaza", 9.63)];

        let targets = build_targets(&zones, &urgent, &fallback);
        assert_eq!(targets.len(), 2);
        assert!(targets[0].label.starts_with("Hot zone"));
        assert_eq!(targets[1].label, "Flash Sale");
    }

    #[test]
    fn test_fallback_to_static_pois() {
        let fallback = vec![poi("Plaza", 9.63), poi("Harbor", 9.64)];
        let targets = build_targets(&[], &[], &fallback);
        assert_eq!(targets, fallback);
    }

    #[test]
    fn test_cycle_wraps() {
        let mut patrol = PatrolScheduler::new();
        patrol.set_targets(vec![poi("a", 9.61), poi("b", 9.62), poi("c", 9.63)]);

        assert_eq!(patrol.current().unwrap().label, "a");
        assert_eq!(patrol.advance().unwrap().label, "b");
        assert_eq!(patrol.advance().unwrap().label, "c");
        assert_eq!(patrol.advance().unwrap().label, "a");
    }

    #[test]
    fn test_shrinking_target_list_keeps_progress_in_bounds() {
        let mut patrol = PatrolScheduler::new();
        patrol.set_targets(vec![poi("a", 9.61), poi("b", 9.62), poi("c", 9.63)]);
        patrol.advance();
        patrol.advance(); // index 2

        patrol.set_targets(vec![poi("x", 9.64), poi("y", 9.65)]);
        // 2 % 2 == 0: progress wraps instead of resetting arbitrarily
        assert_eq!(patrol.current().unwrap().label, "x");
    }

    #[test]
    fn test_empty_list() {
        let mut patrol = PatrolScheduler::new();
        assert!(patrol.current().is_none());
        assert!(patrol.advance().is_none());
    }
}
