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

//! Radius-based greedy point clustering for event markers.
//!
//! Events are projected into Web Mercator pixel space at the queried zoom and
//! grouped with a grid-bucket sweep: each unassigned point absorbs every
//! unassigned neighbor within the pixel radius. Above `max_cluster_zoom`
//! every point renders individually. Rebuilding on each event-set change is
//! O(n log n)-ish and fine because event sets are viewport-bounded (hundreds,
//! not millions).
//!
//! Queries are pure functions of (event set, bounds, zoom); identical inputs
//! produce an identical cluster/leaf partition.

use std::collections::HashMap;

use crate::entities::EventEntity;
use crate::geo::{GeoPoint, ViewportBounds, WebMercator};

const TILE_SIZE: f64 = 256.0;

/// Configuration for the clusterer.
#[derive(Debug, Clone, Copy)]
pub struct ClustererConfig {
    /// Clustering radius in screen pixels.
    pub radius_px: f64,
    /// At or above this zoom, every event renders as an individual marker.
    pub max_cluster_zoom: u8,
    /// Upper clamp for expansion zoom, so clicking a cluster of
    /// near-duplicate points never over-zooms.
    pub max_expansion_zoom: u8,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            radius_px: 40.0,
            max_cluster_zoom: 16,
            max_expansion_zoom: 18,
        }
    }
}

/// One renderable feature: an aggregated cluster or an individual event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterFeature {
    Cluster {
        /// Stable within one build: the smallest member index.
        id: u64,
        point: GeoPoint,
        count: usize,
    },
    Leaf(EventEntity),
}

impl ClusterFeature {
    #[must_use]
    pub fn point(&self) -> GeoPoint {
        match self {
            Self::Cluster { point, .. } => *point,
            Self::Leaf(event) => event.point,
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Cluster { count, .. } => *count,
            Self::Leaf(_) => 1,
        }
    }
}

/// Spatial clustering index over the current event set.
#[derive(Debug, Default)]
pub struct SpatialClusterer {
    config: ClustererConfig,
    events: Vec<EventEntity>,
}

impl SpatialClusterer {
    #[must_use]
    pub fn new(config: ClustererConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
        }
    }

    /// Replace the indexed event set. Coordinates are already validated by
    /// construction of [`EventEntity`], so nothing is filtered here.
    pub fn build(&mut self, events: Vec<EventEntity>) {
        self.events = events;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Query the cluster/leaf partition for a viewport at a zoom level.
    ///
    /// A cluster is included when any of its members falls inside the bounds,
    /// so clusters centered just outside the edge still render.
    #[must_use]
    pub fn query(&self, bounds: ViewportBounds, zoom: u8) -> Vec<ClusterFeature> {
        if zoom >= self.config.max_cluster_zoom {
            return self
                .events
                .iter()
                .filter(|e| bounds.contains(e.point))
                .cloned()
                .map(ClusterFeature::Leaf)
                .collect();
        }

        let groups = self.group_at(zoom);
        let mut features = Vec::new();

        for group in groups {
            let visible = group
                .members
                .iter()
                .any(|&i| bounds.contains(self.events[i].point));
            if !visible {
                continue;
            }

            if group.members.len() == 1 {
                features.push(ClusterFeature::Leaf(self.events[group.members[0]].clone()));
            } else {
                features.push(ClusterFeature::Cluster {
                    id: group.id,
                    point: group.centroid,
                    count: group.members.len(),
                });
            }
        }

        features
    }

    /// The minimal zoom at which a cluster first splits, used to drive
    /// "zoom into cluster on click". Clamped to `max_expansion_zoom`.
    #[must_use]
    pub fn expansion_zoom(&self, cluster_id: u64, at_zoom: u8) -> u8 {
        let members = self
            .group_at(at_zoom)
            .into_iter()
            .find(|g| g.id == cluster_id)
            .map(|g| g.members)
            .unwrap_or_default();

        if members.len() < 2 {
            return at_zoom.min(self.config.max_expansion_zoom);
        }

        for zoom in (at_zoom + 1)..=self.config.max_expansion_zoom {
            if zoom >= self.config.max_cluster_zoom {
                return zoom;
            }
            let groups = self.group_at(zoom);
            let containing = groups
                .iter()
                .find(|g| g.members.contains(&members[0]))
                .map(|g| &g.members);
            if containing != Some(&members) {
                return zoom;
            }
        }

        self.config.max_expansion_zoom
    }

    /// Grid-bucket greedy grouping at a zoom level. Deterministic: points are
    /// processed in index order, so repeated calls partition identically.
    fn group_at(&self, zoom: u8) -> Vec<Group> {
        let radius = self.config.radius_px;
        let projected: Vec<(f64, f64)> = self
            .events
            .iter()
            .map(|e| {
                (
                    WebMercator::lng_to_x(e.point.lng, zoom) * TILE_SIZE,
                    WebMercator::lat_to_y(e.point.lat, zoom) * TILE_SIZE,
                )
            })
            .collect();

        // Bucket points into radius-sized grid cells for neighbor lookup
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, &(x, y)) in projected.iter().enumerate() {
            let key = ((x / radius).floor() as i64, (y / radius).floor() as i64);
            cells.entry(key).or_default().push(i);
        }

        let mut assigned = vec![false; self.events.len()];
        let mut groups = Vec::new();

        for i in 0..self.events.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;

            let (x, y) = projected[i];
            let cx = (x / radius).floor() as i64;
            let cy = (y / radius).floor() as i64;

            let mut members = vec![i];
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(bucket) = cells.get(&(cx + dx, cy + dy)) else {
                        continue;
                    };
                    for &j in bucket {
                        if assigned[j] {
                            continue;
                        }
                        let (jx, jy) = projected[j];
                        let dist = ((jx - x).powi(2) + (jy - y).powi(2)).sqrt();
                        if dist <= radius {
                            assigned[j] = true;
                            members.push(j);
                        }
                    }
                }
            }

            members.sort_unstable();
            let centroid = self.centroid(&members, &projected, zoom);
            groups.push(Group {
                id: members[0] as u64,
                members,
                centroid,
            });
        }

        groups
    }

    fn centroid(&self, members: &[usize], projected: &[(f64, f64)], zoom: u8) -> GeoPoint {
        let n = members.len() as f64;
        let (sx, sy) = members.iter().fold((0.0, 0.0), |(sx, sy), &i| {
            (sx + projected[i].0, sy + projected[i].1)
        });
        let lat = WebMercator::y_to_lat(sy / n / TILE_SIZE, zoom);
        let lng = WebMercator::x_to_lng(sx / n / TILE_SIZE, zoom);
        GeoPoint::new(lat, lng).unwrap_or(self.events[members[0]].point)
    }
}

struct Group {
    id: u64,
    members: Vec<usize>,
    centroid: GeoPoint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tier;

    fn event(id: &str, lat: f64, lng: f64) -> EventEntity {
        EventEntity {
            id: id.to_string(),
            title: String::new(),
            category: "food".to_string(),
            point: GeoPoint::new(lat, lng).unwrap(),
            start_time: None,
            tier: Tier::Bronze,
            priority: 0,
        }
    }

    fn bounds() -> ViewportBounds {
        ViewportBounds {
            west: -82.80,
            south: 9.60,
            east: -82.70,
            north: 9.70,
        }
    }

    /// Five events within ~200 m of each other near (9.65, -82.75).
    fn tight_events() -> Vec<EventEntity> {
        vec![
            event("e-1", 9.6500, -82.7500),
            event("e-2", 9.6505, -82.7505),
            event("e-3", 9.6510, -82.7495),
            event("e-4", 9.6495, -82.7510),
            event("e-5", 9.6502, -82.7498),
        ]
    }

    #[test]
    fn test_cluster_of_five_at_low_zoom() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        clusterer.build(tight_events());

        let features = clusterer.query(bounds(), 12);
        assert_eq!(features.len(), 1);
        assert!(matches!(
            &features[0],
            ClusterFeature::Cluster { count: 5, .. }
        ));
    }

    #[test]
    fn test_five_leaves_at_high_zoom() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        clusterer.build(tight_events());

        let features = clusterer.query(bounds(), 17);
        assert_eq!(features.len(), 5);
        assert!(features
            .iter()
            .all(|f| matches!(f, ClusterFeature::Leaf(_))));
    }

    #[test]
    fn test_query_idempotent() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        clusterer.build(tight_events());

        let a = clusterer.query(bounds(), 12);
        let b = clusterer.query(bounds(), 12);
        assert_eq!(a, b);
    }

    #[test]
    fn test_distant_points_stay_separate() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        clusterer.build(vec![
            event("e-1", 9.61, -82.79),
            event("e-2", 9.69, -82.71),
        ]);

        let features = clusterer.query(bounds(), 12);
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_expansion_zoom_splits_cluster() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        // ~1.1 km apart: one cluster at zoom 12, separate by zoom 13
        clusterer.build(vec![
            event("e-1", 9.650, -82.750),
            event("e-2", 9.650, -82.740),
        ]);

        let features = clusterer.query(bounds(), 11);
        let ClusterFeature::Cluster { id, .. } = &features[0] else {
            panic!("expected a cluster at zoom 11");
        };

        let split_zoom = clusterer.expansion_zoom(*id, 11);
        assert!(split_zoom > 11);
        assert!(split_zoom <= 18);

        let after = clusterer.query(bounds(), split_zoom);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_expansion_zoom_clamped_for_near_duplicates() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        // Effectively co-located points never split; clamp applies
        clusterer.build(vec![
            event("e-1", 9.65000000, -82.75000000),
            event("e-2", 9.65000001, -82.75000001),
        ]);

        let features = clusterer.query(bounds(), 12);
        let ClusterFeature::Cluster { id, .. } = &features[0] else {
            panic!("expected a cluster at zoom 12");
        };

        assert_eq!(clusterer.expansion_zoom(*id, 12), 16);
    }

    #[test]
    fn test_out_of_bounds_excluded() {
        let mut clusterer = SpatialClusterer::new(ClustererConfig::default());
        clusterer.build(vec![event("e-1", 20.0, 10.0)]);
        assert!(clusterer.query(bounds(), 12).is_empty());
    }
}
