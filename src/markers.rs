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

//! Marker and path reconciliation for merchants and missions.
//!
//! These layers are drawn by an imperative graphics layer outside the
//! declarative tree, so updates are expressed as explicit add/update/remove
//! sets: given the previous markers and the current snapshot, compute a
//! [`MarkerDiff`] and hand it to the [`MarkerSink`]. The computation is pure
//! and testable without any rendering binding.
//!
//! Entities whose coordinates failed validation never get this far; ingestion
//! normalizes them to `None` and the builders skip them, so nothing can
//! render at the null-island artifact position.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::entities::{MerchantEntity, MissionEntity, MissionStatus};
use crate::geo::GeoPoint;

/// Visual style, derived purely from entity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    MerchantAvailable,
    /// Desaturated and non-interactive for ordering.
    MerchantUnavailable,
    MissionReady,
    MissionEnRoute,
    MissionPending,
    MissionDelivered,
}

/// One marker in an imperative layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    pub point: GeoPoint,
    pub style: MarkerStyle,
    pub label: String,
    pub interactive: bool,
}

/// One rendered path (mission route segment).
#[derive(Debug, Clone, PartialEq)]
pub struct PathSpec {
    pub id: String,
    pub from: GeoPoint,
    pub to: GeoPoint,
}

/// Add/update/remove sets for one layer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MarkerDiff {
    pub add: Vec<Marker>,
    pub update: Vec<Marker>,
    pub remove: Vec<String>,
}

impl MarkerDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// The two imperative layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerLayer {
    Merchants,
    Missions,
}

/// The imperative graphics layer the engine draws through.
pub trait MarkerSink: Send {
    /// Apply a marker diff to a layer.
    fn apply(&mut self, layer: MarkerLayer, diff: &MarkerDiff);

    /// Replace the path set of a layer wholesale.
    fn replace_paths(&mut self, layer: MarkerLayer, paths: &[PathSpec]);
}

/// Diff two marker sets by id.
#[must_use]
pub fn reconcile(previous: &[Marker], current: &[Marker]) -> MarkerDiff {
    let prev_by_id: HashMap<&str, &Marker> =
        previous.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut diff = MarkerDiff::default();

    for marker in current {
        match prev_by_id.get(marker.id.as_str()) {
            None => diff.add.push(marker.clone()),
            Some(prev) if *prev != marker => diff.update.push(marker.clone()),
            Some(_) => {}
        }
    }

    let current_ids: HashMap<&str, ()> = current.iter().map(|m| (m.id.as_str(), ())).collect();
    for marker in previous {
        if !current_ids.contains_key(marker.id.as_str()) {
            diff.remove.push(marker.id.clone());
        }
    }

    diff
}

/// Build the merchant marker set from a snapshot.
///
/// Color and interactivity derive from the availability rule; merchants
/// without a usable coordinate are skipped entirely.
#[must_use]
pub fn merchant_markers(merchants: &[MerchantEntity], local_now: NaiveDateTime) -> Vec<Marker> {
    merchants
        .iter()
        .filter_map(|merchant| {
            let point = merchant.point?;
            let available = merchant.is_available(local_now);
            Some(Marker {
                id: merchant.id.clone(),
                point,
                style: if available {
                    MarkerStyle::MerchantAvailable
                } else {
                    MarkerStyle::MerchantUnavailable
                },
                label: merchant.name.clone(),
                interactive: available,
            })
        })
        .collect()
}

fn mission_style(status: MissionStatus) -> MarkerStyle {
    match status {
        MissionStatus::Ready => MarkerStyle::MissionReady,
        MissionStatus::OnWay => MarkerStyle::MissionEnRoute,
        MissionStatus::Pending => MarkerStyle::MissionPending,
        MissionStatus::Delivered => MarkerStyle::MissionDelivered,
    }
}

/// Path endpoint policy, by mission state:
///
/// - selected and actively en route: live courier position to destination
///   (falling back to the origin when no live fix has arrived yet)
/// - ready: collapsed at the origin; no path is drawn beyond pickup
/// - anything else: no path
#[must_use]
pub fn mission_path(
    mission: &MissionEntity,
    live_courier: Option<GeoPoint>,
    selected: bool,
) -> Option<PathSpec> {
    match mission.status {
        MissionStatus::OnWay if selected => {
            let to = mission.destination?;
            let from = live_courier.or(mission.origin)?;
            Some(PathSpec {
                id: mission.id.clone(),
                from,
                to,
            })
        }
        MissionStatus::Ready => {
            let origin = mission.origin?;
            Some(PathSpec {
                id: mission.id.clone(),
                from: origin,
                to: origin,
            })
        }
        _ => None,
    }
}

/// Build mission markers and paths from a snapshot.
///
/// `courier_positions` maps courier ids to their smoothed live positions.
#[must_use]
pub fn mission_markers(
    missions: &[MissionEntity],
    courier_positions: &HashMap<String, GeoPoint>,
    selected_mission: Option<&str>,
) -> (Vec<Marker>, Vec<PathSpec>) {
    let mut markers = Vec::new();
    let mut paths = Vec::new();

    for mission in missions {
        if let Some(point) = mission.destination {
            markers.push(Marker {
                id: mission.id.clone(),
                point,
                style: mission_style(mission.status),
                label: mission.id.clone(),
                interactive: true,
            });
        }

        let live = mission
            .courier_id
            .as_deref()
            .and_then(|id| courier_positions.get(id).copied());
        let selected = selected_mission == Some(mission.id.as_str());
        if let Some(path) = mission_path(mission, live, selected) {
            paths.push(path);
        }
    }

    (markers, paths)
}

/// Stateful wrapper that remembers the previously applied marker sets and
/// pushes diffs into the sink.
#[derive(Debug, Default)]
pub struct EntityMarkerReconciler {
    merchants: Vec<Marker>,
    missions: Vec<Marker>,
}

impl EntityMarkerReconciler {
    /// Reconcile the merchant layer against a fresh snapshot.
    pub fn sync_merchants(
        &mut self,
        merchants: &[MerchantEntity],
        local_now: NaiveDateTime,
        sink: &mut dyn MarkerSink,
    ) {
        let current = merchant_markers(merchants, local_now);
        let diff = reconcile(&self.merchants, &current);
        if !diff.is_empty() {
            sink.apply(MarkerLayer::Merchants, &diff);
        }
        self.merchants = current;
    }

    /// Reconcile the mission layer (markers and paths) against a fresh
    /// snapshot.
    pub fn sync_missions(
        &mut self,
        missions: &[MissionEntity],
        courier_positions: &HashMap<String, GeoPoint>,
        selected_mission: Option<&str>,
        sink: &mut dyn MarkerSink,
    ) {
        let (current, paths) = mission_markers(missions, courier_positions, selected_mission);
        let diff = reconcile(&self.missions, &current);
        if !diff.is_empty() {
            sink.apply(MarkerLayer::Missions, &diff);
        }
        sink.replace_paths(MarkerLayer::Missions, &paths);
        self.missions = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{OperationalSettings, WeeklyHours};
    use chrono::NaiveDate;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).unwrap()
    }

    fn marker(id: &str, lat: f64) -> Marker {
        Marker {
            id: id.to_string(),
            point: point(lat, -82.75),
            style: MarkerStyle::MerchantAvailable,
            label: id.to_string(),
            interactive: true,
        }
    }

    fn mission(id: &str, status: MissionStatus, courier: Option<&str>) -> MissionEntity {
        MissionEntity {
            id: id.to_string(),
            status,
            origin: Some(point(9.64, -82.74)),
            destination: Some(point(9.66, -82.76)),
            courier_id: courier.map(String::from),
        }
    }

    #[test]
    fn test_reconcile_add_update_remove() {
        let previous = vec![marker("a", 9.65), marker("b", 9.66)];
        let mut moved = marker("b", 9.67);
        moved.style = MarkerStyle::MerchantUnavailable;
        let current = vec![moved.clone(), marker("c", 9.68)];

        let diff = reconcile(&previous, &current);
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.add[0].id, "c");
        assert_eq!(diff.update.len(), 1);
        assert_eq!(diff.update[0], moved);
        assert_eq!(diff.remove, vec!["a".to_string()]);
    }

    #[test]
    fn test_reconcile_no_change_is_empty() {
        let set = vec![marker("a", 9.65)];
        assert!(reconcile(&set, &set).is_empty());
    }

    #[test]
    fn test_merchant_without_point_is_skipped() {
        let merchants = vec![MerchantEntity {
            id: "m-1".to_string(),
            name: "Ghost Kitchen".to_string(),
            point: None,
            is_active: true,
            weekly_hours: WeeklyHours::default(),
            operational: OperationalSettings::default(),
        }];
        let now = NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert!(merchant_markers(&merchants, now).is_empty());
    }

    #[test]
    fn test_unavailable_merchant_is_not_interactive() {
        let merchants = vec![MerchantEntity {
            id: "m-1".to_string(),
            name: "Closed Cafe".to_string(),
            point: Some(point(9.65, -82.75)),
            is_active: false,
            weekly_hours: WeeklyHours::default(),
            operational: OperationalSettings::default(),
        }];
        let now = NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let markers = merchant_markers(&merchants, now);
        assert_eq!(markers[0].style, MarkerStyle::MerchantUnavailable);
        assert!(!markers[0].interactive);
    }

    #[test]
    fn test_selected_en_route_path_runs_live_to_destination() {
        let m = mission("o-1", MissionStatus::OnWay, Some("d-42"));
        let live = point(9.6505, -82.7502);

        let path = mission_path(&m, Some(live), true).unwrap();
        assert_eq!(path.from, live);
        assert_eq!(path.to, m.destination.unwrap());
    }

    #[test]
    fn test_en_route_without_live_fix_falls_back_to_origin() {
        let m = mission("o-1", MissionStatus::OnWay, Some("d-42"));
        let path = mission_path(&m, None, true).unwrap();
        assert_eq!(path.from, m.origin.unwrap());
    }

    #[test]
    fn test_unselected_en_route_has_no_path() {
        let m = mission("o-1", MissionStatus::OnWay, Some("d-42"));
        assert!(mission_path(&m, None, false).is_none());
    }

    #[test]
    fn test_ready_path_stops_at_pickup() {
        let m = mission("o-1", MissionStatus::Ready, None);
        let path = mission_path(&m, None, false).unwrap();
        // No leg toward the destination before pickup
        assert_eq!(path.from, m.origin.unwrap());
        assert_eq!(path.to, m.origin.unwrap());
    }

    #[test]
    fn test_delivered_has_no_path() {
        let m = mission("o-1", MissionStatus::Delivered, None);
        assert!(mission_path(&m, None, true).is_none());
    }

    #[test]
    fn test_mission_without_destination_renders_nothing() {
        let mut m = mission("o-1", MissionStatus::OnWay, None);
        m.destination = None;
        let (markers, paths) =
            mission_markers(&[m], &HashMap::new(), Some("o-1"));
        assert!(markers.is_empty());
        assert!(paths.is_empty());
    }
}
