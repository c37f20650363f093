//! Device telemetry model.
//!
//! Clients push partial telemetry; [`DeviceState::merge`] folds a partial
//! update into the stored state one field at a time. Unknown fields are
//! rejected at deserialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Device state codes the gateway reacts to. All other codes are opaque.
pub mod state_code {
    /// Device is preheated and waiting for the group.
    pub const READY: u8 = 6;
    /// Device finished its heat cycle.
    pub const FINISHED: u8 = 7;
}

/// RGB colour reported by the device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rgb {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
}

/// Active heat profile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Profile {
    /// Profile name.
    pub name: String,
    /// Target temperature.
    pub temp: f64,
    /// Hold time in seconds.
    pub time: f64,
    /// Profile colour, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Mood light id, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_id: Option<String>,
    /// Intensity, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
}

/// Device telemetry, stored per session and broadcast to the group.
///
/// Every field is optional: the same type serves as the stored state and as
/// a partial update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[allow(missing_docs)]
pub struct DeviceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    /// Numeric device state code; see [`state_code`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_dabs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dabs_per_day: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chamber_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charge_source: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_color: Option<Rgb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dab: Option<Value>,
}

macro_rules! merge_fields {
    ($target:ident, $patch:ident; $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $patch.$field {
                $target.$field = Some(v);
            }
        )+
    };
}

impl DeviceState {
    /// Fold a partial update into this state. Absent fields keep their
    /// current value.
    pub fn merge(&mut self, patch: DeviceState) {
        let state = self;
        merge_fields!(state, patch;
            device_name,
            device_mac,
            device_model,
            brightness,
            temperature,
            battery,
            state,
            state_time,
            total_dabs,
            dabs_per_day,
            chamber_type,
            charge_source,
            active_color,
            profile,
            last_dab,
        );
    }

    /// Whether this state describes a usable connected device: it must
    /// identify the device and report a state code.
    pub fn is_valid(&self) -> bool {
        self.state.is_some() && self.device_mac.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// Whether the device reports the given state code.
    pub fn is_in(&self, code: u8) -> bool {
        self.state == Some(code)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
