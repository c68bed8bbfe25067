//! Device trust registry.
//!
//! Remembers which device ids have been used by which user. The registry
//! only produces a trust signal for logging and review; it is never an input
//! to an authorization decision.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A device seen during login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub user_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Result of recording a device for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTrust {
    /// First time this device id is seen.
    New,
    /// Device already associated with this user.
    Known,
    /// Device was last associated with a different user.
    Reassigned { previous_user_id: String },
}

pub struct DeviceTrustRegistry {
    /// device_id -> record
    devices: Mutex<HashMap<String, DeviceRecord>>,
    clock: Arc<dyn Clock>,
}

impl DeviceTrustRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Associate `device_id` with `user_id` and report how familiar it is.
    pub fn record(&self, user_id: &str, device_id: &str) -> DeviceTrust {
        let now = self.clock.now();
        let mut devices = self.devices.lock();

        match devices.get_mut(device_id) {
            Some(record) if record.user_id == user_id => {
                record.last_active_at = now;
                DeviceTrust::Known
            }
            Some(record) => {
                let previous_user_id = std::mem::replace(&mut record.user_id, user_id.to_owned());
                record.first_seen_at = now;
                record.last_active_at = now;
                DeviceTrust::Reassigned { previous_user_id }
            }
            None => {
                devices.insert(
                    device_id.to_owned(),
                    DeviceRecord {
                        device_id: device_id.to_owned(),
                        user_id: user_id.to_owned(),
                        first_seen_at: now,
                        last_active_at: now,
                    },
                );
                DeviceTrust::New
            }
        }
    }

    pub fn is_known(&self, user_id: &str, device_id: &str) -> bool {
        self.devices
            .lock()
            .get(device_id)
            .is_some_and(|record| record.user_id == user_id)
    }

    /// Update the last-active timestamp for a device.
    pub fn touch(&self, device_id: &str) -> bool {
        let now = self.clock.now();
        match self.devices.lock().get_mut(device_id) {
            Some(record) => {
                record.last_active_at = now;
                true
            }
            None => false,
        }
    }

    /// Devices for a user, most recently active first.
    pub fn devices_for(&self, user_id: &str) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self
            .devices
            .lock()
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        records
    }

    /// Remove a device.
    pub fn forget(&self, user_id: &str, device_id: &str) -> bool {
        let mut devices = self.devices.lock();
        if devices
            .get(device_id)
            .is_some_and(|record| record.user_id == user_id)
        {
            devices.remove(device_id);
            return true;
        }
        false
    }

    pub fn forget_user(&self, user_id: &str) -> usize {
        let mut devices = self.devices.lock();
        let before = devices.len();
        devices.retain(|_, record| record.user_id != user_id);
        before - devices.len()
    }

    /// Forget devices that have not been active for `max_idle`.
    pub fn sweep_stale(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let mut devices = self.devices.lock();
        let before = devices.len();
        devices.retain(|_, record| now - record.last_active_at < max_idle);
        before - devices.len()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
