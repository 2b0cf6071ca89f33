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

//! Protocol layer for telemetry message parsing.
//!
//! This module provides a trait-based abstraction for extensible protocol support.
//! Currently implements the JSON-lines telemetry format emitted by the dispatch
//! backends, with room for binary framings later.
//!
//! Legacy coordinate and identifier field aliases (`lat`/`latitude`,
//! `lng`/`lon`/`longitude`, `entityId`/`courierId`/`droneId`/`id`) are
//! normalized here, at the ingestion boundary, so downstream layers only ever
//! see one canonical shape.

mod jsonl;

pub use jsonl::JsonLinesParser;

use thiserror::Error;

/// Errors that can occur during message parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Unified message type for all telemetry feed formats.
///
/// Represents the core moving-entity data that can be extracted from any
/// courier/drone feed, regardless of the underlying wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Entity identification message (display label).
    Identification {
        /// Stable entity identifier (e.g., "drone-7", "c-1042").
        entity_id: String,
        /// Human-readable label (e.g., "DRONE-7").
        label: String,
    },

    /// Entity position fix.
    Position {
        /// Stable entity identifier.
        entity_id: String,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Bearing in degrees (0-360, north = 0), when the feed reports one.
        bearing: Option<f64>,
        /// Delivery status carried alongside the fix, when present.
        status: Option<String>,
    },

    /// Status-only heartbeat (no position).
    Status {
        /// Stable entity identifier.
        entity_id: String,
        /// Delivery status (e.g., "READY", "ON_WAY", "DELIVERED").
        status: String,
    },
}

impl FeedMessage {
    /// Get the entity identifier from any message variant.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Identification { entity_id, .. }
            | Self::Position { entity_id, .. }
            | Self::Status { entity_id, .. } => entity_id,
        }
    }
}

/// Trait for protocol parsers.
///
/// Implement this trait to add support for new telemetry feed formats.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}
