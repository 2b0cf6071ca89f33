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

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Maximum retained notices.
const MAX_NOTICES: usize = 50;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient, user-facing notice (e.g. "Location permission denied").
#[derive(Debug, Clone)]
pub struct Notice {
    pub timestamp: DateTime<Utc>,
    pub level: NoticeLevel,
    pub message: String,
}

/// Engine-wide counters and diagnostics.
///
/// One instance per map, shared behind [`SharedSystemStatus`]. Everything here
/// is advisory: rendering never blocks on status, and failures recorded here
/// never escalate into user-facing errors on their own.
#[derive(Debug, Default)]
pub struct SystemStatus {
    /// Successful viewport event fetches.
    pub fetch_success_count: u64,
    /// Failed viewport event fetches (previous event set retained).
    pub fetch_failure_count: u64,
    /// When the last successful fetch completed.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Events delivered by the last successful fetch.
    pub last_fetch_event_count: usize,
    /// Telemetry fixes fed into the interpolator.
    pub fixes_received: u64,
    /// Mode transitions taken by the controller.
    pub mode_changes: u64,

    notices: VecDeque<Notice>,
}

impl SystemStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch_success(&mut self, event_count: usize) {
        self.fetch_success_count += 1;
        self.last_fetch_event_count = event_count;
        self.last_fetch_at = Some(Utc::now());
    }

    pub fn record_fetch_failure(&mut self) {
        self.fetch_failure_count += 1;
    }

    pub fn record_fix(&mut self) {
        self.fixes_received += 1;
    }

    pub fn record_mode_change(&mut self) {
        self.mode_changes += 1;
    }

    /// Queue a user-facing notice, dropping the oldest past the cap.
    pub fn push_notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        if self.notices.len() >= MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.iter().cloned().collect()
    }

    #[must_use]
    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.back()
    }
}

/// Shared handle used across engine tasks.
pub type SharedSystemStatus = Arc<Mutex<SystemStatus>>;

/// Create a fresh shared status handle.
#[must_use]
pub fn shared() -> SharedSystemStatus {
    Arc::new(Mutex::new(SystemStatus::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_counters() {
        let mut status = SystemStatus::new();
        status.record_fetch_success(12);
        status.record_fetch_failure();

        assert_eq!(status.fetch_success_count, 1);
        assert_eq!(status.fetch_failure_count, 1);
        assert_eq!(status.last_fetch_event_count, 12);
        assert!(status.last_fetch_at.is_some());
    }

    #[test]
    fn test_notice_ring_is_bounded() {
        let mut status = SystemStatus::new();
        for i in 0..60 {
            status.push_notice(NoticeLevel::Info, format!("notice {i}"));
        }
        assert_eq!(status.notices().len(), MAX_NOTICES);
        assert_eq!(status.latest_notice().unwrap().message, "notice 59");
    }
}
