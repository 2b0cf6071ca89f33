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

//! Telemetry client library for connecting to and parsing courier/drone feeds.
//!
//! This library provides a modular, reusable architecture for receiving and
//! processing moving-entity telemetry. It supports multiple layers that can be
//! used independently or composed together:
//!
//! - **Protocol layer**: Message parsing (JSON-lines, with legacy field-alias
//!   normalization at the ingestion boundary)
//! - **Tracker layer**: Entity state management, fix validation, and history
//! - **Connection layer**: Async TCP with automatic reconnection and address
//!   hot-reload
//!
//! # Quick Start
//!
//! Use the [`Client`] type for full-stack operation:
//!
//! ```no_run
//! use courier_feed::{Client, ClientConfig, ConnectionConfig, TrackerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut client = Client::spawn(ClientConfig {
//!         connection: ConnectionConfig {
//!             address: "localhost:9400".to_string(),
//!             ..Default::default()
//!         },
//!         tracker: TrackerConfig::default(),
//!         ..Default::default()
//!     });
//!
//!     while client.process_next().await {
//!         for entity in client.entities() {
//!             println!("{}: {:?}", entity.entity_id, entity.status);
//!         }
//!     }
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use courier_feed::protocol::{JsonLinesParser, Protocol};
//!
//! let mut parser = JsonLinesParser::new();
//! let line = br#"{"entityId":"d-42","lat":9.65,"lng":-82.75}"#;
//! if let Ok(Some(msg)) = parser.parse(line) {
//!     println!("Got fix for entity: {}", msg.entity_id());
//! }
//! ```
//!
//! ## Tracker Layer Only
//!
//! ```
//! use courier_feed::tracker::{FixTracker, TrackerConfig};
//! use courier_feed::protocol::FeedMessage;
//!
//! let mut tracker = FixTracker::new(TrackerConfig::default());
//!
//! tracker.process_message(FeedMessage::Position {
//!     entity_id: "d-42".to_string(),
//!     latitude: 9.65,
//!     longitude: -82.75,
//!     bearing: Some(270.0),
//!     status: None,
//! });
//!
//! println!("Tracking {} entities", tracker.len());
//! ```

pub mod protocol;
pub mod tcp;
pub mod tracker;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::warn;
use tokio::sync::broadcast;

pub use protocol::{FeedMessage, JsonLinesParser, ParseError, Protocol};
pub use tcp::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState};
pub use tracker::{FixPoint, FixTracker, MovingEntity, TrackerConfig, TrackerEvent};

/// Configuration for the full-stack client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// Tracker configuration.
    pub tracker: TrackerConfig,
    /// Cleanup interval for stale entities.
    pub cleanup_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            tracker: TrackerConfig::default(),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Full-stack telemetry client that wires all layers together.
///
/// The client manages a TCP connection, parses incoming lines with the
/// JSON-lines protocol, and maintains entity state in a tracker.
pub struct Client {
    tracker: Arc<RwLock<FixTracker>>,
    connection: Connection,
    connection_state: Arc<RwLock<ConnectionState>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Spawn a new client with the given configuration.
    ///
    /// This starts background tasks for connection management and periodic
    /// stale-entity cleanup. Call [`Client::process_next`] in a loop to drive
    /// message parsing.
    #[must_use]
    pub fn spawn(config: ClientConfig) -> Self {
        let tracker = Arc::new(RwLock::new(FixTracker::new(config.tracker)));
        let connection = Connection::spawn(config.connection);
        let connection_state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let tracker_clone = Arc::clone(&tracker);
        let cleanup_interval = config.cleanup_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                if let Ok(mut tracker) = tracker_clone.write() {
                    tracker.cleanup_stale();
                }
            }
        });

        Self {
            tracker,
            connection,
            connection_state,
        }
    }

    /// Process the next event from the connection.
    ///
    /// Returns `false` once the connection has shut down:
    ///
    /// ```no_run
    /// # use courier_feed::{Client, ClientConfig};
    /// # async fn example() {
    /// let mut client = Client::spawn(ClientConfig::default());
    /// while client.process_next().await {}
    /// # }
    /// ```
    pub async fn process_next(&mut self) -> bool {
        let event = match self.connection.recv().await {
            Some(event) => event,
            None => return false,
        };

        match event {
            ConnectionEvent::StateChanged(state) => {
                if let Ok(mut s) = self.connection_state.write() {
                    *s = state;
                }
            }
            ConnectionEvent::LineReceived(line) => {
                let mut parser = JsonLinesParser::new();
                match parser.parse(line.as_bytes()) {
                    Ok(Some(msg)) => {
                        if let Ok(mut tracker) = self.tracker.write() {
                            tracker.process_message(msg);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Telemetry parse error: {}", e);
                    }
                }
            }
        }

        true
    }

    /// Get all tracked entities.
    #[must_use]
    pub fn entities(&self) -> Vec<MovingEntity> {
        self.tracker
            .read()
            .map(|t| t.entities().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a specific entity by id.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<MovingEntity> {
        self.tracker
            .read()
            .ok()
            .and_then(|t| t.get(entity_id).cloned())
    }

    /// Get the number of tracked entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.tracker.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Subscribe to tracker events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.tracker
            .read()
            .map(|t| t.subscribe())
            .unwrap_or_else(|_| {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            })
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
            .read()
            .map(|s| s.clone())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Change the relay address.
    ///
    /// The connection will disconnect and reconnect to the new address.
    pub fn set_address(&self, address: String) {
        self.connection.set_address(address);
    }

    /// Get the current relay address.
    #[must_use]
    pub fn current_address(&self) -> String {
        self.connection.current_address()
    }

    /// Shut down the client.
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}
