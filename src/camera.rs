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

//! Camera ownership.
//!
//! Every subsystem that moves or reads the camera goes through one injected
//! [`CameraController`] handle instead of sharing an ambient mutable map
//! reference. Settle notifications (pan/zoom coming to rest) fan out over a
//! broadcast channel.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::geo::{GeoPoint, ViewportBounds};

/// Emitted when a pan/zoom/fly comes to rest.
#[derive(Debug, Clone, Copy)]
pub struct CameraSettle {
    pub center: GeoPoint,
    pub zoom: f64,
}

/// The single owned interface to the map camera.
pub trait CameraController: Send + Sync {
    /// Animate the camera to a target over a duration.
    fn fly_to(&self, target: GeoPoint, zoom: f64, duration: Duration);

    /// Current camera center.
    fn center(&self) -> GeoPoint;

    /// Current zoom level.
    fn zoom(&self) -> f64;

    /// The visible geographic rectangle, or `None` while the map container
    /// has no layout (zero size). Callers must treat `None` as a retryable
    /// precondition.
    fn bounds(&self) -> Option<ViewportBounds>;

    /// Subscribe to settle notifications.
    fn subscribe_settle(&self) -> broadcast::Receiver<CameraSettle>;
}

// Unit-square Web Mercator, zoom-independent.
fn world_x(lng: f64) -> f64 {
    (lng + 180.0) / 360.0
}

fn world_y(lat: f64) -> f64 {
    let lat_rad = lat.clamp(-85.0511, 85.0511).to_radians();
    (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0
}

fn world_y_to_lat(y: f64) -> f64 {
    (std::f64::consts::PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees()
}

fn world_x_to_lng(x: f64) -> f64 {
    x * 360.0 - 180.0
}

#[derive(Debug)]
struct SimCameraState {
    center: GeoPoint,
    zoom: f64,
    viewport_px: (u32, u32),
}

/// Deterministic in-memory camera for tests and the headless binary.
///
/// Flights complete instantly; each completed move emits a settle event, which
/// is exactly the observable behavior downstream subsystems depend on.
#[derive(Debug)]
pub struct SimCamera {
    state: Mutex<SimCameraState>,
    settle_tx: broadcast::Sender<CameraSettle>,
}

impl SimCamera {
    #[must_use]
    pub fn new(center: GeoPoint, zoom: f64) -> Self {
        let (settle_tx, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(SimCameraState {
                center,
                zoom,
                viewport_px: (0, 0),
            }),
            settle_tx,
        }
    }

    /// Simulate the map container getting laid out (or resized).
    pub fn set_viewport_size(&self, width: u32, height: u32) {
        let settle = {
            let mut state = self
                .state
                .lock()
                .expect("Camera state lock poisoned - unrecoverable state");
            state.viewport_px = (width, height);
            CameraSettle {
                center: state.center,
                zoom: state.zoom,
            }
        };
        let _ = self.settle_tx.send(settle);
    }

    /// Simulate a user pan/zoom that has come to rest.
    pub fn jump_to(&self, center: GeoPoint, zoom: f64) {
        let settle = {
            let mut state = self
                .state
                .lock()
                .expect("Camera state lock poisoned - unrecoverable state");
            state.center = center;
            state.zoom = zoom;
            CameraSettle { center, zoom }
        };
        let _ = self.settle_tx.send(settle);
    }
}

impl CameraController for SimCamera {
    fn fly_to(&self, target: GeoPoint, zoom: f64, _duration: Duration) {
        self.jump_to(target, zoom);
    }

    fn center(&self) -> GeoPoint {
        self.state
            .lock()
            .expect("Camera state lock poisoned - unrecoverable state")
            .center
    }

    fn zoom(&self) -> f64 {
        self.state
            .lock()
            .expect("Camera state lock poisoned - unrecoverable state")
            .zoom
    }

    fn bounds(&self) -> Option<ViewportBounds> {
        let state = self
            .state
            .lock()
            .expect("Camera state lock poisoned - unrecoverable state");
        let (width, height) = state.viewport_px;
        if width == 0 || height == 0 {
            return None;
        }

        let world_px = 256.0 * 2_f64.powf(state.zoom);
        let half_w = f64::from(width) / 2.0 / world_px;
        let half_h = f64::from(height) / 2.0 / world_px;

        let cx = world_x(state.center.lng);
        let cy = world_y(state.center.lat);

        let bounds = ViewportBounds {
            west: world_x_to_lng((cx - half_w).max(0.0)),
            east: world_x_to_lng((cx + half_w).min(1.0)),
            north: world_y_to_lat((cy - half_h).max(0.0)),
            south: world_y_to_lat((cy + half_h).min(1.0)),
        };
        bounds.is_valid().then_some(bounds)
    }

    fn subscribe_settle(&self) -> broadcast::Receiver<CameraSettle> {
        self.settle_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_bounds_before_layout() {
        let camera = SimCamera::new(GeoPoint::new(9.65, -82.75).unwrap(), 12.0);
        assert!(camera.bounds().is_none());
    }

    #[test]
    fn test_bounds_contain_center_after_layout() {
        let camera = SimCamera::new(GeoPoint::new(9.65, -82.75).unwrap(), 12.0);
        camera.set_viewport_size(1280, 720);

        let bounds = camera.bounds().unwrap();
        assert!(bounds.is_valid());
        assert!(bounds.contains(camera.center()));
    }

    #[test]
    fn test_fly_to_emits_settle() {
        let camera = SimCamera::new(GeoPoint::new(9.65, -82.75).unwrap(), 12.0);
        let mut settles = camera.subscribe_settle();

        let target = GeoPoint::new(9.70, -82.70).unwrap();
        camera.fly_to(target, 15.0, Duration::from_millis(1500));

        assert_eq!(camera.center(), target);
        assert!((camera.zoom() - 15.0).abs() < f64::EPSILON);

        let settle = settles.try_recv().unwrap();
        assert_eq!(settle.center, target);
    }
}
