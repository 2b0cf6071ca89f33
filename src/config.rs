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

//! Application configuration management.
//!
//! This module handles persistent configuration storage using TOML format.
//! It supports multi-feed telemetry configurations, map defaults, static
//! patrol points of interest, and GPS location overrides.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default telemetry relay address
pub const DEFAULT_FEED_ADDRESS: &str = "localhost:9400";

/// Default event API base URL
pub const DEFAULT_EVENT_API: &str = "http://localhost:8080/api";

/// Telemetry feed configuration for a single relay connection
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedConfig {
    /// Unique identifier for this feed (stable across renames)
    pub id: String,

    /// User-friendly display name
    pub name: String,

    /// Relay address in host:port format
    pub address: String,

    /// Whether this feed should auto-connect on startup
    pub enabled: bool,
}

impl FeedConfig {
    /// Create a new feed configuration with a generated UUID
    pub fn new(name: String, address: String, enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            address,
            enabled,
        }
    }

    /// Create the default local feed
    pub fn default_local() -> Self {
        Self::new(
            "Default Local Relay".to_string(),
            DEFAULT_FEED_ADDRESS.to_string(),
            true,
        )
    }
}

/// A static patrol point of interest
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PoiConfig {
    pub label: String,
    pub lat: f64,
    pub lng: f64,
}

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// List of configured telemetry feeds
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedConfig>,

    /// Event API base URL
    #[serde(default = "default_event_api")]
    pub event_api_url: String,

    /// Default map center latitude
    #[serde(default = "default_center_lat")]
    pub default_center_lat: f64,

    /// Default map center longitude
    #[serde(default = "default_center_lng")]
    pub default_center_lng: f64,

    /// Default map zoom level
    #[serde(default = "default_zoom")]
    pub default_zoom: f64,

    /// Seconds without interaction before the map counts as idle
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: i64,

    /// Static patrol points of interest (used when nothing dynamic exists)
    #[serde(default)]
    pub patrol_pois: Vec<PoiConfig>,

    /// Override GPS latitude (for hosts without a location provider)
    #[serde(default)]
    pub override_gps_latitude: Option<f64>,

    /// Override GPS longitude (for hosts without a location provider)
    #[serde(default)]
    pub override_gps_longitude: Option<f64>,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_feeds() -> Vec<FeedConfig> {
    vec![FeedConfig::default_local()]
}

fn default_event_api() -> String {
    DEFAULT_EVENT_API.to_string()
}

fn default_center_lat() -> f64 {
    9.9281 // San José
}

fn default_center_lng() -> f64 {
    -84.0907
}

fn default_zoom() -> f64 {
    12.0
}

fn default_idle_threshold() -> i64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            feeds: default_feeds(),
            event_api_url: default_event_api(),
            default_center_lat: default_center_lat(),
            default_center_lng: default_center_lng(),
            default_zoom: default_zoom(),
            idle_threshold_secs: default_idle_threshold(),
            patrol_pois: Vec::new(),
            override_gps_latitude: None,
            override_gps_longitude: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating defaults on first run
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load("tacmap", "config")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store("tacmap", "config", self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path("tacmap", "config")
    }

    /// Get a feed by ID
    pub fn get_feed(&self, id: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.id == id)
    }

    /// Add a new feed
    pub fn add_feed(&mut self, feed: FeedConfig) {
        self.feeds.push(feed);
    }

    /// Remove a feed by ID
    pub fn remove_feed(&mut self, id: &str) -> bool {
        if let Some(pos) = self.feeds.iter().position(|f| f.id == id) {
            self.feeds.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let config = AppConfig::default();
        assert_eq!(config.config_version, 1);
        assert_eq!(config.feeds.len(), 1);
        assert!(config.feeds[0].enabled);
        assert_eq!(config.idle_threshold_secs, 30);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str("default_zoom = 10.0").unwrap();
        assert!((config.default_zoom - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.event_api_url, DEFAULT_EVENT_API);
        assert_eq!(config.feeds.len(), 1);
    }

    #[test]
    fn test_feed_management() {
        let mut config = AppConfig::default();
        let feed = FeedConfig::new("Drone Relay".to_string(), "10.0.0.2:9400".to_string(), true);
        let id = feed.id.clone();

        config.add_feed(feed);
        assert!(config.get_feed(&id).is_some());
        assert!(config.remove_feed(&id));
        assert!(config.get_feed(&id).is_none());
    }
}
