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

//! Event-density analysis and idle detection.
//!
//! Hot zones come from a single O(n) grid-bucket pass over the currently
//! visible events. Urgency is a function of wall-clock time and must be
//! re-evaluated as time passes, not just when the data changes; the engine
//! recomputes it on every fetch cycle and on the periodic tick.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::entities::EventEntity;
use crate::geo::{haversine_distance_m, GeoPoint};

/// Minimum events in one grid cell to qualify as a hot zone.
const HOT_ZONE_MIN_EVENTS: usize = 3;

/// Forward window within which an event counts as urgent.
const URGENCY_WINDOW_HOURS: i64 = 2;

/// Default grid cell size in degrees (~1.1 km of latitude).
pub const DEFAULT_GRID_SIZE_DEGREES: f64 = 0.01;

/// A geographic area with an above-threshold density of events.
#[derive(Debug, Clone, PartialEq)]
pub struct HotZone {
    pub center: GeoPoint,
    pub count: usize,
    pub radius_meters: f64,
}

/// Grid-bucket density scan. Each event lands in the cell
/// `(floor(lat/g), floor(lng/g))`; cells with at least three events become
/// hot zones centered on the cell midpoint. Result is ordered densest first.
#[must_use]
pub fn detect(events: &[EventEntity], grid_size_degrees: f64) -> Vec<HotZone> {
    if grid_size_degrees <= 0.0 {
        return Vec::new();
    }

    let mut cells: HashMap<(i64, i64), usize> = HashMap::new();
    for event in events {
        let key = (
            (event.point.lat / grid_size_degrees).floor() as i64,
            (event.point.lng / grid_size_degrees).floor() as i64,
        );
        *cells.entry(key).or_insert(0) += 1;
    }

    let mut zones: Vec<HotZone> = cells
        .into_iter()
        .filter(|&(_, count)| count >= HOT_ZONE_MIN_EVENTS)
        .filter_map(|((ky, kx), count)| {
            let center = GeoPoint::new(
                (ky as f64 + 0.5) * grid_size_degrees,
                (kx as f64 + 0.5) * grid_size_degrees,
            )?;
            let corner = GeoPoint {
                lat: center.lat + grid_size_degrees / 2.0,
                lng: center.lng + grid_size_degrees / 2.0,
            };
            Some(HotZone {
                center,
                count,
                radius_meters: haversine_distance_m(center, corner),
            })
        })
        .collect();

    // Densest first; ties broken by position for a stable ordering
    zones.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.center.lat.total_cmp(&b.center.lat))
            .then_with(|| a.center.lng.total_cmp(&b.center.lng))
    });
    zones
}

/// Events whose start time falls within the 2-hour forward window of `now`.
#[must_use]
pub fn urgent_events(events: &[EventEntity], now: DateTime<Utc>) -> Vec<EventEntity> {
    let horizon = now + Duration::hours(URGENCY_WINDOW_HOURS);
    events
        .iter()
        .filter(|e| {
            e.start_time
                .is_some_and(|start| start >= now && start <= horizon)
        })
        .cloned()
        .collect()
}

/// Tracks the time since the last user interaction.
///
/// Checked on a periodic timer; reset immediately on any pan/zoom/click.
#[derive(Debug)]
pub struct IdleMonitor {
    last_interaction: DateTime<Utc>,
    threshold: Duration,
}

impl IdleMonitor {
    #[must_use]
    pub fn new(threshold_secs: i64, now: DateTime<Utc>) -> Self {
        Self {
            last_interaction: now,
            threshold: Duration::seconds(threshold_secs),
        }
    }

    /// Record a user interaction, resetting the idle clock.
    pub fn note_interaction(&mut self, now: DateTime<Utc>) {
        self.last_interaction = now;
    }

    #[must_use]
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        now - self.last_interaction >= self.threshold
    }
}

/// Patrol is only auto-engaged when the user is idle and nothing is being
/// delivered.
#[must_use]
pub fn should_auto_patrol(is_idle: bool, active_mission_count: usize) -> bool {
    is_idle && active_mission_count == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tier;

    fn event(id: &str, lat: f64, lng: f64, start_time: Option<DateTime<Utc>>) -> EventEntity {
        EventEntity {
            id: id.to_string(),
            title: String::new(),
            category: "food".to_string(),
            point: GeoPoint::new(lat, lng).unwrap(),
            start_time,
            tier: Tier::Bronze,
            priority: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-06-02T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_two_events_never_a_hot_zone() {
        let events = vec![
            event("e-1", 9.651, -82.751, None),
            event("e-2", 9.652, -82.752, None),
        ];
        assert!(detect(&events, 0.01).is_empty());
    }

    #[test]
    fn test_three_events_form_a_hot_zone() {
        let events = vec![
            event("e-1", 9.651, -82.759, None),
            event("e-2", 9.652, -82.758, None),
            event("e-3", 9.653, -82.757, None),
        ];
        let zones = detect(&events, 0.01);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].count, 3);
        // Center is the cell midpoint
        assert!((zones[0].center.lat - 9.655).abs() < 1e-9);
        assert!((zones[0].center.lng - (-82.755)).abs() < 1e-9);
        assert!(zones[0].radius_meters > 0.0);
    }

    #[test]
    fn test_events_in_separate_cells_do_not_combine() {
        let events = vec![
            event("e-1", 9.651, -82.751, None),
            event("e-2", 9.652, -82.752, None),
            event("e-3", 9.663, -82.763, None), // next cell over
        ];
        assert!(detect(&events, 0.01).is_empty());
    }

    #[test]
    fn test_zones_ordered_densest_first() {
        let mut events = Vec::new();
        for i in 0..3 {
            events.push(event(&format!("a-{i}"), 9.651 + 0.0001 * f64::from(i), -82.751, None));
        }
        for i in 0..5 {
            events.push(event(&format!("b-{i}"), 9.671 + 0.0001 * f64::from(i), -82.771, None));
        }
        let zones = detect(&events, 0.01);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].count, 5);
        assert_eq!(zones[1].count, 3);
    }

    #[test]
    fn test_urgent_window() {
        let events = vec![
            event("past", 9.65, -82.75, Some(now() - Duration::minutes(10))),
            event("soon", 9.65, -82.75, Some(now() + Duration::minutes(90))),
            event("later", 9.65, -82.75, Some(now() + Duration::hours(3))),
            event("untimed", 9.65, -82.75, None),
        ];
        let urgent = urgent_events(&events, now());
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].id, "soon");
    }

    #[test]
    fn test_urgency_changes_as_time_passes() {
        let events = vec![event("e-1", 9.65, -82.75, Some(now() + Duration::hours(3)))];
        assert!(urgent_events(&events, now()).is_empty());
        // Same data, later clock: now urgent
        assert_eq!(urgent_events(&events, now() + Duration::hours(2)).len(), 1);
    }

    #[test]
    fn test_idle_monitor() {
        let mut idle = IdleMonitor::new(30, now());
        assert!(!idle.is_idle(now() + Duration::seconds(29)));
        assert!(idle.is_idle(now() + Duration::seconds(30)));

        idle.note_interaction(now() + Duration::seconds(30));
        assert!(!idle.is_idle(now() + Duration::seconds(59)));
    }

    #[test]
    fn test_should_auto_patrol() {
        assert!(should_auto_patrol(true, 0));
        assert!(!should_auto_patrol(true, 1));
        assert!(!should_auto_patrol(false, 0));
    }
}
