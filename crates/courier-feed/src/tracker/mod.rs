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

//! Moving-entity tracking and state management.
//!
//! This module maintains courier/drone state from telemetry messages and emits
//! change events. It provides fix validation, history tracking, and stale-entity
//! cleanup.
//!
//! Fix validation includes:
//! - Coordinate range checks; out-of-range fixes are dropped, not clamped
//! - Null-island filtering: backends default missing coordinates to `(0,0)`,
//!   which must never reach a consumer as a real position
//! - Teleport rejection for fixes that jump implausibly far between reports,
//!   with consecutive-rejection recovery to handle genuine data gaps

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::protocol::FeedMessage;

// Constants for fix validation and tracking
const JUMP_DETECTION_TIME_WINDOW_SECONDS: i64 = 20;
const JUMP_DETECTION_THRESHOLD_KM: f64 = 2.0; // Ground vehicles don't cover 2 km in 20 s
const MAX_CONSECUTIVE_REJECTIONS: u32 = 3;
const POSITION_CHANGE_THRESHOLD_DEGREES: f64 = 0.0001; // ~10 meters at mid-latitudes

/// Calculate distance between two lat/lng points using the Haversine formula (in kilometers).
#[must_use]
pub fn haversine_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let r = 6371.0; // Earth's radius in kilometers

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    r * c
}

/// Check that a fix carries plausible coordinates.
///
/// Backends default unknown positions to exactly `(0,0)`; those records mean
/// "absent", never "Null Island".
#[must_use]
pub fn is_plausible_fix(lat: f64, lng: f64) -> bool {
    if !lat.is_finite() || !lng.is_finite() {
        return false;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return false;
    }
    !(lat == 0.0 && lng == 0.0)
}

/// A single position sample with timestamp and bearing.
#[derive(Debug, Clone)]
pub struct FixPoint {
    pub lat: f64,
    pub lng: f64,
    pub bearing: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Moving-entity data.
#[derive(Debug, Clone)]
pub struct MovingEntity {
    /// Stable entity identifier from the feed.
    pub entity_id: String,
    /// Human-readable label, when the feed has announced one.
    pub label: Option<String>,
    /// Current latitude in degrees.
    pub latitude: Option<f64>,
    /// Current longitude in degrees.
    pub longitude: Option<f64>,
    /// Bearing in degrees (0-360, north = 0).
    pub bearing: Option<f64>,
    /// Last reported delivery status (raw feed value, e.g. "ON_WAY").
    pub status: Option<String>,
    /// Timestamp of last received message.
    pub last_seen: DateTime<Utc>,
    /// Position history for trail rendering.
    pub position_history: Vec<FixPoint>,
    /// Counter for consecutive fix rejections (internal use).
    consecutive_rejections: u32,
}

impl MovingEntity {
    fn new(entity_id: String) -> Self {
        Self {
            entity_id,
            label: None,
            latitude: None,
            longitude: None,
            bearing: None,
            status: None,
            last_seen: Utc::now(),
            position_history: Vec::new(),
            consecutive_rejections: 0,
        }
    }

    /// Calculate distance in kilometers from a given point to this entity.
    #[must_use]
    pub fn distance_from_km(&self, from_lat: f64, from_lng: f64) -> Option<f64> {
        if let (Some(lat), Some(lng)) = (self.latitude, self.longitude) {
            Some(haversine_distance_km(from_lat, from_lng, lat, lng))
        } else {
            None
        }
    }

    /// Apply a position fix with validation.
    fn update_position(&mut self, lat: f64, lng: f64, bearing: Option<f64>) -> bool {
        if !is_plausible_fix(lat, lng) {
            debug!(
                "Dropped implausible fix for {}: ({}, {})",
                self.entity_id, lat, lng
            );
            return false;
        }

        // Teleport check against the previous fix (only if that fix is recent;
        // after a connectivity gap any distance is believable)
        if let (Some(last_lat), Some(last_lng)) = (self.latitude, self.longitude) {
            let time_since_last_update = (Utc::now() - self.last_seen).num_seconds();

            if time_since_last_update <= JUMP_DETECTION_TIME_WINDOW_SECONDS {
                let distance_from_last = haversine_distance_km(last_lat, last_lng, lat, lng);
                if distance_from_last > JUMP_DETECTION_THRESHOLD_KM {
                    if self.consecutive_rejections >= MAX_CONSECUTIVE_REJECTIONS {
                        info!(
                            "Accepting fix for {} after {} consecutive rejections (jumped {:.2} km)",
                            self.entity_id, self.consecutive_rejections, distance_from_last
                        );
                        self.consecutive_rejections = 0;
                    } else {
                        self.consecutive_rejections += 1;
                        warn!(
                            "Rejected fix for {}: jumped {:.2} km (rejection {} of {})",
                            self.entity_id,
                            distance_from_last,
                            self.consecutive_rejections,
                            MAX_CONSECUTIVE_REJECTIONS
                        );
                        return false;
                    }
                }
            }
        }

        // Only add to history if position has changed meaningfully
        let should_add = if let (Some(last_lat), Some(last_lng)) = (self.latitude, self.longitude) {
            let distance = ((lat - last_lat).powi(2) + (lng - last_lng).powi(2)).sqrt();
            distance > POSITION_CHANGE_THRESHOLD_DEGREES
        } else {
            true
        };

        if should_add {
            self.position_history.push(FixPoint {
                lat,
                lng,
                bearing,
                timestamp: Utc::now(),
            });
        }

        self.latitude = Some(lat);
        self.longitude = Some(lng);
        if bearing.is_some() {
            self.bearing = bearing;
        }
        self.consecutive_rejections = 0;

        true
    }

    fn cleanup_old_history(&mut self, max_age_seconds: i64) {
        let now = Utc::now();
        self.position_history
            .retain(|point| (now - point.timestamp).num_seconds() < max_age_seconds);
    }
}

/// Events emitted by the tracker when entity state changes.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// A new entity was added to tracking.
    EntityAdded(String),
    /// An entity's position was updated.
    PositionUpdated(String),
    /// An entity was removed due to timeout.
    EntityRemoved(String),
}

/// Configuration for the fix tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Entity timeout in seconds.
    pub entity_timeout_secs: i64,
    /// Position history retention in seconds.
    pub position_history_secs: i64,
    /// Broadcast channel capacity for events.
    pub event_channel_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            entity_timeout_secs: 120,
            position_history_secs: 300,
            event_channel_capacity: 256,
        }
    }
}

/// Fix tracker that maintains moving-entity state and emits events.
pub struct FixTracker {
    entities: HashMap<String, MovingEntity>,
    entity_timeout_secs: i64,
    position_history_secs: i64,
    event_tx: broadcast::Sender<TrackerEvent>,
}

impl std::fmt::Debug for FixTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixTracker")
            .field("entity_count", &self.entities.len())
            .field("entity_timeout_secs", &self.entity_timeout_secs)
            .finish()
    }
}

impl FixTracker {
    /// Create a new tracker with the given configuration.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Self {
            entities: HashMap::new(),
            entity_timeout_secs: config.entity_timeout_secs,
            position_history_secs: config.position_history_secs,
            event_tx,
        }
    }

    /// Process an incoming feed message.
    pub fn process_message(&mut self, msg: FeedMessage) {
        let entity_id = msg.entity_id().to_string();
        let is_new = !self.entities.contains_key(&entity_id);

        let entity = self
            .entities
            .entry(entity_id.clone())
            .or_insert_with(|| MovingEntity::new(entity_id.clone()));

        if is_new {
            let _ = self
                .event_tx
                .send(TrackerEvent::EntityAdded(entity_id.clone()));
        }

        match msg {
            FeedMessage::Identification { label, .. } => {
                entity.label = Some(label);
                entity.last_seen = Utc::now();
            }
            FeedMessage::Position {
                latitude,
                longitude,
                bearing,
                status,
                ..
            } => {
                if let Some(status) = status {
                    entity.status = Some(status);
                }
                let updated = entity.update_position(latitude, longitude, bearing);
                entity.last_seen = Utc::now();
                if updated {
                    let _ = self.event_tx.send(TrackerEvent::PositionUpdated(entity_id));
                }
            }
            FeedMessage::Status { status, .. } => {
                entity.status = Some(status);
                entity.last_seen = Utc::now();
            }
        }
    }

    /// Get all tracked entities.
    #[must_use]
    pub fn entities(&self) -> Vec<&MovingEntity> {
        self.entities.values().collect()
    }

    /// Get a specific entity by id.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<&MovingEntity> {
        self.entities.get(entity_id)
    }

    /// Get the number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if there are no tracked entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Subscribe to tracker events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    /// Remove stale entities and clean up old position history.
    pub fn cleanup_stale(&mut self) {
        let now = Utc::now();

        for entity in self.entities.values_mut() {
            entity.cleanup_old_history(self.position_history_secs);
        }

        let removed: Vec<_> = self
            .entities
            .iter()
            .filter(|(_, e)| (now - e.last_seen).num_seconds() >= self.entity_timeout_secs)
            .map(|(entity_id, _)| entity_id.clone())
            .collect();

        for entity_id in removed {
            self.entities.remove(&entity_id);
            let _ = self.event_tx.send(TrackerEvent::EntityRemoved(entity_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(entity_id: &str, lat: f64, lng: f64) -> FeedMessage {
        FeedMessage::Position {
            entity_id: entity_id.to_string(),
            latitude: lat,
            longitude: lng,
            bearing: None,
            status: None,
        }
    }

    #[test]
    fn test_haversine_distance() {
        // San José, CR to Limón is approximately 130 km
        let distance = haversine_distance_km(9.9281, -84.0907, 9.9913, -83.0415);
        assert!((distance - 115.0).abs() < 15.0);
    }

    #[test]
    fn test_tracker_new_entity() {
        let mut tracker = FixTracker::new(TrackerConfig::default());

        tracker.process_message(FeedMessage::Identification {
            entity_id: "d-42".to_string(),
            label: "DRONE-42".to_string(),
        });

        assert_eq!(tracker.len(), 1);
        let entity = tracker.get("d-42").unwrap();
        assert_eq!(entity.label.as_deref(), Some("DRONE-42"));
    }

    #[test]
    fn test_tracker_position_update() {
        let mut tracker = FixTracker::new(TrackerConfig::default());

        tracker.process_message(position("d-42", 9.65, -82.75));

        let entity = tracker.get("d-42").unwrap();
        assert_eq!(entity.latitude, Some(9.65));
        assert_eq!(entity.longitude, Some(-82.75));
        assert_eq!(entity.position_history.len(), 1);
    }

    #[test]
    fn test_null_island_fix_dropped() {
        let mut tracker = FixTracker::new(TrackerConfig::default());

        tracker.process_message(position("d-42", 0.0, 0.0));

        let entity = tracker.get("d-42").unwrap();
        assert!(entity.latitude.is_none());
        assert!(entity.position_history.is_empty());
    }

    #[test]
    fn test_out_of_range_fix_dropped() {
        let mut tracker = FixTracker::new(TrackerConfig::default());

        tracker.process_message(position("d-42", 91.0, -82.75));
        tracker.process_message(position("d-42", 9.65, -181.0));

        let entity = tracker.get("d-42").unwrap();
        assert!(entity.latitude.is_none());
    }

    #[test]
    fn test_teleport_rejected_then_recovered() {
        let mut tracker = FixTracker::new(TrackerConfig::default());

        tracker.process_message(position("d-42", 9.65, -82.75));

        // ~100 km away within the jump window: rejected three times
        for _ in 0..3 {
            tracker.process_message(position("d-42", 10.5, -82.75));
            let entity = tracker.get("d-42").unwrap();
            assert_eq!(entity.latitude, Some(9.65));
        }

        // Fourth consecutive report of the same jump is accepted as real
        tracker.process_message(position("d-42", 10.5, -82.75));
        let entity = tracker.get("d-42").unwrap();
        assert_eq!(entity.latitude, Some(10.5));
    }

    #[test]
    fn test_status_update() {
        let mut tracker = FixTracker::new(TrackerConfig::default());

        tracker.process_message(FeedMessage::Status {
            entity_id: "c-7".to_string(),
            status: "ON_WAY".to_string(),
        });

        let entity = tracker.get("c-7").unwrap();
        assert_eq!(entity.status.as_deref(), Some("ON_WAY"));
        assert!(entity.latitude.is_none());
    }
}
