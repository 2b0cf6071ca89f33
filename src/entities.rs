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

//! Domain entities and snapshot ingestion.
//!
//! Backend payloads arrive with years of accumulated field aliases
//! (`lat`/`latitude`, `destinationLat`/`destLat`, `isActive`/`active`).
//! All of that is absorbed here, in the record types and their conversion
//! functions; the rest of the engine only deals in validated [`GeoPoint`]s
//! and canonical entities.

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use crate::geo::{opt_point, GeoPoint};

/// Promotional event tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    #[default]
    Bronze,
    Silver,
    Gold,
}

/// A promotional event inside the current viewport.
///
/// Ephemeral: the whole set is replaced wholesale on every viewport fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEntity {
    pub id: String,
    pub title: String,
    pub category: String,
    pub point: GeoPoint,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub tier: Tier,
    pub priority: u8,
}

/// Raw coordinate pair as it appears in backend payloads.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawPoint {
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "lon", alias = "longitude")]
    pub lng: Option<f64>,
}

impl RawPoint {
    #[must_use]
    pub fn normalize(self) -> Option<GeoPoint> {
        opt_point(self.lat, self.lng)
    }
}

/// Wire record for one event feature from the viewport query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub coordinates: RawPoint,
    #[serde(default)]
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub priority: u8,
}

impl EventRecord {
    /// Convert to a canonical entity. Records with invalid coordinates are
    /// excluded (returns `None`), not surfaced as errors.
    #[must_use]
    pub fn into_entity(self) -> Option<EventEntity> {
        let point = self.coordinates.normalize()?;
        Some(EventEntity {
            id: self.id,
            title: self.title,
            category: self.category,
            point,
            start_time: self.start_time,
            tier: self.tier,
            priority: self.priority.min(100),
        })
    }
}

/// One weekday's open/close window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OpenWindow {
    /// Whether a wall-clock time falls inside the window. Windows where
    /// `close < open` span midnight.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.open <= self.close {
            time >= self.open && time < self.close
        } else {
            time >= self.open || time < self.close
        }
    }
}

/// Per-weekday opening hours, indexed Monday..Sunday. `None` = closed all day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklyHours(pub [Option<OpenWindow>; 7]);

impl WeeklyHours {
    #[must_use]
    pub fn window_for(&self, day_from_monday: u32) -> Option<OpenWindow> {
        self.0.get(day_from_monday as usize).copied().flatten()
    }
}

/// Operational toggles a merchant can flip at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalSettings {
    #[serde(default, alias = "busy")]
    pub is_busy: bool,
}

/// A merchant as supplied by the host application snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MerchantEntity {
    pub id: String,
    pub name: String,
    pub point: Option<GeoPoint>,
    pub is_active: bool,
    pub weekly_hours: WeeklyHours,
    pub operational: OperationalSettings,
}

impl MerchantEntity {
    /// The availability rule: a merchant is available only if it is active
    /// AND the current local time falls inside that weekday's open/close
    /// window AND it is not flagged busy. Any one condition failing renders
    /// it unavailable.
    #[must_use]
    pub fn is_available(&self, local_now: NaiveDateTime) -> bool {
        if !self.is_active || self.operational.is_busy {
            return false;
        }
        let day = local_now.weekday().num_days_from_monday();
        let time = local_now.time();
        self.weekly_hours
            .window_for(day)
            .is_some_and(|w| w.contains(time))
    }
}

/// Wire record for one merchant snapshot row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "lon", alias = "longitude")]
    pub lng: Option<f64>,
    #[serde(default, alias = "active")]
    pub is_active: bool,
    /// Open/close times as "HH:MM" strings, Monday first. Short arrays leave
    /// the remaining days closed.
    #[serde(default)]
    pub weekly_hours: Vec<Option<(String, String)>>,
    #[serde(default, alias = "operational")]
    pub operational_settings: OperationalSettings,
}

impl MerchantRecord {
    #[must_use]
    pub fn into_entity(self) -> MerchantEntity {
        let mut hours = WeeklyHours::default();
        for (day, window) in self.weekly_hours.iter().take(7).enumerate() {
            hours.0[day] = window.as_ref().and_then(|(open, close)| {
                let open = NaiveTime::parse_from_str(open, "%H:%M").ok()?;
                let close = NaiveTime::parse_from_str(close, "%H:%M").ok()?;
                Some(OpenWindow { open, close })
            });
        }
        MerchantEntity {
            point: opt_point(self.lat, self.lng),
            id: self.id,
            name: self.name,
            is_active: self.is_active,
            weekly_hours: hours,
            operational: self.operational_settings,
        }
    }
}

/// Delivery mission lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    Ready,
    OnWay,
    Delivered,
    Pending,
}

/// A delivery mission as supplied by the host application snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionEntity {
    pub id: String,
    pub status: MissionStatus,
    pub origin: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
    pub courier_id: Option<String>,
}

/// Wire record for one mission snapshot row.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionRecord {
    pub id: String,
    pub status: MissionStatus,
    #[serde(default, alias = "merchantLat", alias = "pickupLat")]
    pub origin_lat: Option<f64>,
    #[serde(default, alias = "merchantLng", alias = "pickupLng")]
    pub origin_lng: Option<f64>,
    #[serde(default, alias = "destLat", alias = "dropoffLat")]
    pub destination_lat: Option<f64>,
    #[serde(default, alias = "destLng", alias = "dropoffLng")]
    pub destination_lng: Option<f64>,
    #[serde(default)]
    pub courier_id: Option<String>,
}

impl MissionRecord {
    #[must_use]
    pub fn into_entity(self) -> MissionEntity {
        MissionEntity {
            origin: opt_point(self.origin_lat, self.origin_lng),
            destination: opt_point(self.destination_lat, self.destination_lng),
            id: self.id,
            status: self.status,
            courier_id: self.courier_id,
        }
    }
}
