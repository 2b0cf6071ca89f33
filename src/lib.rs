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

//! Tactical map orchestration engine for the dispatch platform.
//!
//! Keeps a live map synchronized with a changing set of geospatial entities
//! (merchants, delivery missions, promotional events, couriers/drones, the
//! viewer's own position) under soft-real-time constraints: viewport-driven
//! incremental fetching with cancellation, spatial clustering, density
//! analysis, continuous position interpolation, and an autonomous patrol
//! mode arbitrated by a state machine.
//!
//! The engine is headless. It consumes an [`viewport::EventSource`], a
//! telemetry fix stream (see the `courier-feed` crate), merchant/mission
//! snapshots, and a [`geolocate::LocationProvider`]; it exposes
//! [`engine::RenderSnapshot`]s, camera directives through an injected
//! [`camera::CameraController`], and marker diffs through a
//! [`markers::MarkerSink`]. Drawing and styling are the host's concern.

pub mod camera;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod entities;
pub mod geo;
pub mod geolocate;
pub mod hotzone;
pub mod interpolate;
pub mod markers;
pub mod patrol;
pub mod status;
pub mod tactical;
pub mod viewport;

pub use engine::{EngineConfig, RenderSnapshot, TacticalEngine};
pub use tactical::{EntityRef, TacticalMode};
