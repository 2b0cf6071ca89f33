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

//! Continuous position interpolation for moving entities.
//!
//! Raw telemetry fixes arrive at multi-second intervals; rendering them
//! directly makes markers teleport. Each fix instead starts an
//! [`InterpolationTarget`] whose `from` point is the *currently displayed*
//! position, so a fix arriving mid-animation never causes a visual jump.
//! Once a target's elapsed time reaches its duration, the displayed point
//! snaps exactly to the reported point and the target is retired, which
//! prevents permanent drift.
//!
//! The interpolator itself is time-parameterized and never sleeps; the
//! engine's frame loop calls [`PositionInterpolator::sample`] each tick and
//! stops rescheduling itself once [`PositionInterpolator::in_flight`] turns
//! false.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::geo::GeoPoint;

/// Expected inter-report interval; one animation spans one reporting gap.
pub const DEFAULT_DURATION_MS: i64 = 2000;

/// One in-flight animation between two fixes.
#[derive(Debug, Clone)]
pub struct InterpolationTarget {
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl InterpolationTarget {
    fn fraction(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.started_at).num_milliseconds() as f64;
        (elapsed / self.duration_ms as f64).clamp(0.0, 1.0)
    }

    fn displayed(&self, now: DateTime<Utc>) -> GeoPoint {
        let t = self.fraction(now);
        if t >= 1.0 {
            return self.to;
        }
        GeoPoint {
            lat: self.from.lat + (self.to.lat - self.from.lat) * t,
            lng: self.from.lng + (self.to.lng - self.from.lng) * t,
        }
    }
}

/// A renderable moving entity with its smoothed position.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedEntity {
    pub entity_id: String,
    pub point: GeoPoint,
    pub bearing: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug)]
struct Motion {
    displayed: GeoPoint,
    bearing: Option<f64>,
    status: Option<String>,
    target: Option<InterpolationTarget>,
}

/// Smooths discrete position reports into continuous motion.
#[derive(Debug)]
pub struct PositionInterpolator {
    duration_ms: i64,
    entities: HashMap<String, Motion>,
}

impl Default for PositionInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_MS)
    }
}

impl PositionInterpolator {
    #[must_use]
    pub fn new(duration_ms: i64) -> Self {
        Self {
            duration_ms: duration_ms.max(1),
            entities: HashMap::new(),
        }
    }

    /// Register a new fix for an entity.
    ///
    /// The first fix for an entity places it immediately (no slide in from
    /// nowhere). Subsequent fixes animate from the currently displayed point.
    pub fn report(
        &mut self,
        entity_id: &str,
        point: GeoPoint,
        bearing: Option<f64>,
        status: Option<String>,
        now: DateTime<Utc>,
    ) {
        match self.entities.get_mut(entity_id) {
            None => {
                self.entities.insert(
                    entity_id.to_string(),
                    Motion {
                        displayed: point,
                        bearing,
                        status,
                        target: None,
                    },
                );
            }
            Some(motion) => {
                // Continuity: the new animation starts wherever the entity is
                // drawn right now, not at the previous raw report.
                let from = motion
                    .target
                    .as_ref()
                    .map_or(motion.displayed, |t| t.displayed(now));
                motion.displayed = from;
                motion.target = Some(InterpolationTarget {
                    from,
                    to: point,
                    started_at: now,
                    duration_ms: self.duration_ms,
                });
                if bearing.is_some() {
                    motion.bearing = bearing;
                }
                if status.is_some() {
                    motion.status = status;
                }
            }
        }
    }

    /// Compute every entity's displayed position at `now`, retiring finished
    /// targets (with an exact snap to the reported point).
    pub fn sample(&mut self, now: DateTime<Utc>) -> Vec<DisplayedEntity> {
        let mut out = Vec::with_capacity(self.entities.len());

        for (entity_id, motion) in &mut self.entities {
            if let Some(target) = &motion.target {
                if target.fraction(now) >= 1.0 {
                    motion.displayed = target.to;
                    motion.target = None;
                } else {
                    motion.displayed = target.displayed(now);
                }
            }
            out.push(DisplayedEntity {
                entity_id: entity_id.clone(),
                point: motion.displayed,
                bearing: motion.bearing,
                status: motion.status.clone(),
            });
        }

        out.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        out
    }

    /// Current displayed position without mutating state.
    #[must_use]
    pub fn position_of(&self, entity_id: &str, now: DateTime<Utc>) -> Option<GeoPoint> {
        let motion = self.entities.get(entity_id)?;
        Some(
            motion
                .target
                .as_ref()
                .map_or(motion.displayed, |t| t.displayed(now)),
        )
    }

    /// Whether any animation is still running. The frame loop keeps
    /// rescheduling only while this is true.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.entities.values().any(|m| m.target.is_some())
    }

    /// Drop entities no longer present in the feed.
    pub fn retain<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.entities.retain(|id, _| keep(id));
    }

    pub fn remove(&mut self, entity_id: &str) {
        self.entities.remove(entity_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        "2025-06-02T12:00:00Z".parse().unwrap()
    }

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).unwrap()
    }

    #[test]
    fn test_first_fix_places_immediately() {
        let mut interp = PositionInterpolator::default();
        interp.report("d-1", point(9.65, -82.75), None, None, t0());

        assert!(!interp.in_flight());
        assert_eq!(interp.position_of("d-1", t0()), Some(point(9.65, -82.75)));
    }

    #[test]
    fn test_midpoint_halfway_through() {
        let mut interp = PositionInterpolator::default();
        interp.report("d-1", point(9.65, -82.75), None, None, t0());

        let t1 = t0() + Duration::seconds(1);
        interp.report("d-1", point(9.651, -82.751), None, None, t1);

        // 1000 ms into a 2000 ms animation: arithmetic midpoint
        let displayed = interp.position_of("d-1", t1 + Duration::milliseconds(1000)).unwrap();
        assert!((displayed.lat - 9.6505).abs() < 1e-9);
        assert!((displayed.lng - (-82.7505)).abs() < 1e-9);
    }

    #[test]
    fn test_no_jump_when_fix_arrives_mid_animation() {
        let mut interp = PositionInterpolator::default();
        interp.report("d-1", point(9.65, -82.75), None, None, t0());
        interp.report("d-1", point(9.66, -82.76), None, None, t0());

        let mid = t0() + Duration::milliseconds(500);
        let before = interp.position_of("d-1", mid).unwrap();

        // New fix at the 500 ms mark: animation must restart from `before`
        interp.report("d-1", point(9.67, -82.77), None, None, mid);
        let after = interp.position_of("d-1", mid).unwrap();

        assert!((before.lat - after.lat).abs() < 1e-12);
        assert!((before.lng - after.lng).abs() < 1e-12);
    }

    #[test]
    fn test_snaps_exactly_on_completion() {
        let mut interp = PositionInterpolator::default();
        interp.report("d-1", point(9.65, -82.75), None, None, t0());
        interp.report("d-1", point(9.651, -82.751), None, None, t0());

        assert!(interp.in_flight());

        let done = t0() + Duration::milliseconds(2500);
        let sampled = interp.sample(done);
        assert_eq!(sampled[0].point, point(9.651, -82.751));

        // Target retired: the loop may stop scheduling itself
        assert!(!interp.in_flight());
    }

    #[test]
    fn test_retain_drops_departed_entities() {
        let mut interp = PositionInterpolator::default();
        interp.report("d-1", point(9.65, -82.75), None, None, t0());
        interp.report("d-2", point(9.66, -82.76), None, None, t0());

        interp.retain(|id| id == "d-2");
        assert_eq!(interp.len(), 1);
        assert!(interp.position_of("d-1", t0()).is_none());
    }
}
