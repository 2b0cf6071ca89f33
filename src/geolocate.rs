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

//! User-location acquisition with permission handling.
//!
//! Location comes from a platform [`LocationProvider`]. Permission is checked
//! before every request; an explicit denial produces a user-facing notice and
//! never touches the provider, which avoids redundant permission prompts.
//!
//! One-shot mode flies the camera to the fix. Continuous mode updates the
//! stored position on every fix without re-centering; camera moves are
//! explicit user or mission-following actions only. At most one watch exists
//! at a time, and tearing the tracker down clears it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraController;
use crate::geo::GeoPoint;
use crate::status::{NoticeLevel, SharedSystemStatus};

/// Timeout for a one-shot position request.
const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(5);
/// Camera flight when centering on the user.
const LOCATE_FLY_DURATION: Duration = Duration::from_millis(1500);
const LOCATE_ZOOM: f64 = 15.0;

/// Boxed error for location failures.
pub type LocationError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future so `LocationProvider` stays object-safe.
pub type LocateFuture = Pin<Box<dyn Future<Output = Result<GeoPoint, LocationError>> + Send>>;

/// Platform permission state for location access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
    Unknown,
}

/// Handle to an active continuous watch. Dropping it clears the registration.
#[derive(Debug)]
pub struct WatchHandle {
    cancel: CancellationToken,
}

impl WatchHandle {
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The consumed platform location API.
pub trait LocationProvider: Send + Sync {
    /// Query permission state without triggering a prompt.
    fn permission(&self) -> PermissionState;

    /// Request a single fix, bounded by `timeout`.
    fn current_position(&self, timeout: Duration) -> LocateFuture;

    /// Start a continuous watch; fixes flow into `tx` until the returned
    /// handle is dropped.
    fn watch(&self, tx: mpsc::Sender<GeoPoint>) -> WatchHandle;
}

/// One-shot and continuous user-location acquisition.
pub struct GeolocationTracker {
    provider: Arc<dyn LocationProvider>,
    camera: Arc<dyn CameraController>,
    status: SharedSystemStatus,
    position: Arc<Mutex<Option<GeoPoint>>>,
    active_watch: Mutex<Option<WatchHandle>>,
}

impl std::fmt::Debug for GeolocationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeolocationTracker").finish_non_exhaustive()
    }
}

impl GeolocationTracker {
    #[must_use]
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        camera: Arc<dyn CameraController>,
        status: SharedSystemStatus,
    ) -> Self {
        Self {
            provider,
            camera,
            status,
            position: Arc::new(Mutex::new(None)),
            active_watch: Mutex::new(None),
        }
    }

    /// Last known user position.
    #[must_use]
    pub fn position(&self) -> Option<GeoPoint> {
        *self
            .position
            .lock()
            .expect("Position lock poisoned - unrecoverable state")
    }

    /// Acquire the user's location.
    ///
    /// With `continuous: false`, requests a single fix and flies the camera
    /// to it. With `continuous: true`, starts a watch that only updates the
    /// stored position. A prior watch is cleared before a new one starts.
    pub async fn locate(&self, continuous: bool) {
        if self.provider.permission() == PermissionState::Denied {
            warn!("Location permission denied; not requesting a fix");
            if let Ok(mut status) = self.status.lock() {
                status.push_notice(
                    NoticeLevel::Warning,
                    "Location permission denied. Enable location access to center the map on you.",
                );
            }
            return;
        }

        if continuous {
            self.start_watch();
        } else {
            self.locate_once().await;
        }
    }

    async fn locate_once(&self) {
        match self.provider.current_position(ONE_SHOT_TIMEOUT).await {
            Ok(fix) => {
                info!("User located at ({:.5}, {:.5})", fix.lat, fix.lng);
                *self
                    .position
                    .lock()
                    .expect("Position lock poisoned - unrecoverable state") = Some(fix);
                self.camera.fly_to(fix, LOCATE_ZOOM, LOCATE_FLY_DURATION);
            }
            Err(e) => {
                warn!("One-shot location failed: {}", e);
                if let Ok(mut status) = self.status.lock() {
                    status.push_notice(NoticeLevel::Warning, format!("Could not get your location: {e}"));
                }
            }
        }
    }

    fn start_watch(&self) {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = self.provider.watch(tx);

        let position = Arc::clone(&self.position);
        tokio::spawn(async move {
            // Store fixes only; the camera never follows a watch
            while let Some(fix) = rx.recv().await {
                if let Ok(mut position) = position.lock() {
                    *position = Some(fix);
                }
            }
        });

        // Replacing the handle drops (and thereby clears) the previous watch
        *self
            .active_watch
            .lock()
            .expect("Watch lock poisoned - unrecoverable state") = Some(handle);
    }

    /// Clear any active watch. Called on unmount.
    pub fn teardown(&self) {
        *self
            .active_watch
            .lock()
            .expect("Watch lock poisoned - unrecoverable state") = None;
    }
}

impl Drop for GeolocationTracker {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Fixed-position provider, used for the config GPS override and in tests.
#[derive(Debug)]
pub struct StaticLocationProvider {
    point: GeoPoint,
}

impl StaticLocationProvider {
    #[must_use]
    pub fn new(point: GeoPoint) -> Self {
        Self { point }
    }
}

impl LocationProvider for StaticLocationProvider {
    fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    fn current_position(&self, _timeout: Duration) -> LocateFuture {
        let point = self.point;
        Box::pin(async move { Ok(point) })
    }

    fn watch(&self, tx: mpsc::Sender<GeoPoint>) -> WatchHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let point = self.point;
        tokio::spawn(async move {
            let _ = tx.send(point).await;
            token.cancelled().await;
        });
        WatchHandle::new(cancel)
    }
}

/// IP-based geolocation fallback for hosts without a platform provider.
///
/// Tries ipapi.co first, then ip-api.com. Coarse, but good enough to land
/// the camera in the right city.
pub struct IpLocationProvider {
    client: reqwest::Client,
}

impl std::fmt::Debug for IpLocationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpLocationProvider").finish_non_exhaustive()
    }
}

impl Default for IpLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IpLocationProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn lookup(client: &reqwest::Client, url: &str, lat_key: &str, lng_key: &str) -> Option<GeoPoint> {
        let value: serde_json::Value = client.get(url).send().await.ok()?.json().await.ok()?;
        let lat = value.get(lat_key).and_then(serde_json::Value::as_f64)?;
        let lng = value.get(lng_key).and_then(serde_json::Value::as_f64)?;
        GeoPoint::new(lat, lng)
    }
}

impl LocationProvider for IpLocationProvider {
    fn permission(&self) -> PermissionState {
        // No OS prompt is involved in an IP lookup
        PermissionState::Granted
    }

    fn current_position(&self, timeout: Duration) -> LocateFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let lookup = async {
                if let Some(p) =
                    Self::lookup(&client, "https://ipapi.co/json/", "latitude", "longitude").await
                {
                    return Some(p);
                }
                Self::lookup(&client, "http://ip-api.com/json/", "lat", "lon").await
            };
            match tokio::time::timeout(timeout, lookup).await {
                Ok(Some(point)) => Ok(point),
                Ok(None) => Err("no geolocation service answered".into()),
                Err(_) => Err("geolocation request timed out".into()),
            }
        })
    }

    fn watch(&self, tx: mpsc::Sender<GeoPoint>) -> WatchHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Some(point) =
                Self::lookup(&client, "https://ipapi.co/json/", "latitude", "longitude").await
            {
                let _ = tx.send(point).await;
            }
            token.cancelled().await;
        });
        WatchHandle::new(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SimCamera;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProvider {
        permission: PermissionState,
        fix: GeoPoint,
        position_calls: AtomicUsize,
        watch_tokens: Mutex<Vec<CancellationToken>>,
    }

    impl MockProvider {
        fn new(permission: PermissionState) -> Arc<Self> {
            Arc::new(Self {
                permission,
                fix: GeoPoint::new(9.65, -82.75).unwrap(),
                position_calls: AtomicUsize::new(0),
                watch_tokens: Mutex::new(Vec::new()),
            })
        }
    }

    impl LocationProvider for MockProvider {
        fn permission(&self) -> PermissionState {
            self.permission
        }

        fn current_position(&self, _timeout: Duration) -> LocateFuture {
            self.position_calls.fetch_add(1, Ordering::SeqCst);
            let fix = self.fix;
            Box::pin(async move { Ok(fix) })
        }

        fn watch(&self, tx: mpsc::Sender<GeoPoint>) -> WatchHandle {
            let cancel = CancellationToken::new();
            self.watch_tokens.lock().unwrap().push(cancel.clone());
            let token = cancel.clone();
            let fix = self.fix;
            tokio::spawn(async move {
                let _ = tx.send(fix).await;
                token.cancelled().await;
            });
            WatchHandle::new(cancel)
        }
    }

    fn tracker(provider: Arc<MockProvider>) -> (GeolocationTracker, Arc<SimCamera>, SharedSystemStatus) {
        let camera = Arc::new(SimCamera::new(GeoPoint::new(10.0, -84.0).unwrap(), 8.0));
        let status = crate::status::shared();
        let tracker = GeolocationTracker::new(provider, camera.clone(), Arc::clone(&status));
        (tracker, camera, status)
    }

    #[tokio::test]
    async fn test_denied_permission_never_calls_provider() {
        let provider = MockProvider::new(PermissionState::Denied);
        let (tracker, camera, status) = tracker(provider.clone());

        tracker.locate(false).await;

        assert_eq!(provider.position_calls.load(Ordering::SeqCst), 0);
        assert!(tracker.position().is_none());
        // Camera untouched
        assert_eq!(camera.center(), GeoPoint::new(10.0, -84.0).unwrap());
        // But the user was told
        let notices = status.lock().unwrap().notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
    }

    #[tokio::test]
    async fn test_one_shot_flies_camera_to_fix() {
        let provider = MockProvider::new(PermissionState::Granted);
        let (tracker, camera, _) = tracker(provider.clone());

        tracker.locate(false).await;

        assert_eq!(tracker.position(), Some(provider.fix));
        assert_eq!(camera.center(), provider.fix);
    }

    #[tokio::test]
    async fn test_continuous_updates_position_without_recentering() {
        let provider = MockProvider::new(PermissionState::Granted);
        let (tracker, camera, _) = tracker(provider.clone());
        let before = camera.center();

        tracker.locate(true).await;
        // Give the forwarding task a beat to deliver the fix
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(tracker.position(), Some(provider.fix));
        assert_eq!(camera.center(), before);
    }

    #[tokio::test]
    async fn test_new_watch_clears_previous_registration() {
        let provider = MockProvider::new(PermissionState::Granted);
        let (tracker, _, _) = tracker(provider.clone());

        tracker.locate(true).await;
        tracker.locate(true).await;

        let tokens = provider.watch_tokens.lock().unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].is_cancelled());
        assert!(!tokens[1].is_cancelled());
    }

    #[tokio::test]
    async fn test_teardown_clears_watch() {
        let provider = MockProvider::new(PermissionState::Granted);
        let (tracker, _, _) = tracker(provider.clone());

        tracker.locate(true).await;
        tracker.teardown();

        let tokens = provider.watch_tokens.lock().unwrap();
        assert!(tokens[0].is_cancelled());
    }
}
