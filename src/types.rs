use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Sentinel reported for state/temperature/error fields before the first load.
pub const UNKNOWN_VALUE: i32 = 991;

/// Which of the two device channels an operation went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Local,
    Cloud,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Local => write!(f, "local"),
            Channel::Cloud => write!(f, "cloud"),
        }
    }
}

/// Latest known state of the stove. Replaced as a whole on every successful load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub state: i32,
    pub error_code: i32,
    pub room_temperature: i32,
    pub target_temperature: i32,
    pub ip: Option<String>,
    pub port: u16,
    pub name: String,
    pub is_connected: bool,
    pub software_version: String,
    pub state_timestamp: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    /// Thermostat frame captured from the device, used to rebuild set-temperature commands.
    pub set_temperature_command_template: Option<String>,
    pub(crate) state_description: String,
    pub(crate) error_description: String,
}

impl DeviceSnapshot {
    pub fn new(ip: Option<String>, port: u16) -> Self {
        Self {
            state: UNKNOWN_VALUE,
            error_code: UNKNOWN_VALUE,
            room_temperature: UNKNOWN_VALUE,
            target_temperature: UNKNOWN_VALUE,
            ip,
            port,
            name: String::new(),
            is_connected: false,
            software_version: String::new(),
            state_timestamp: None,
            last_update: None,
            set_temperature_command_template: None,
            state_description: String::new(),
            error_description: String::new(),
        }
    }

    pub fn is_on(&self) -> bool {
        self.state != 0 && self.state != UNKNOWN_VALUE
    }

    /// Error code 0 means the stove reports no error; the unloaded sentinel
    /// is not an error either.
    pub fn is_error(&self) -> bool {
        self.error_code != 0 && self.error_code != UNKNOWN_VALUE
    }

    /// Empty when there is no error.
    pub fn error_description(&self) -> &str {
        &self.error_description
    }

    pub fn state_description(&self) -> &str {
        &self.state_description
    }

    pub fn is_loaded(&self) -> bool {
        self.last_update.is_some()
    }
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self::new(None, 80)
    }
}

/// Bearer token issued by the cloud `/Token` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
    #[serde(rename = ".expires")]
    pub expires: Option<String>,
}

impl AuthToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Builds a token from the `/Token` response. `.expires` is an HTTP date
    /// (`Mon, 01 Jan 2024 10:00:00 GMT`); `expires_in` is the fallback. With
    /// neither present, or an `expires_in` out of range, the token counts as
    /// already expired.
    pub(crate) fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Option<Self> {
        let access_token = resp.access_token.filter(|t| !t.is_empty())?;
        let expires_at = resp
            .expires
            .as_deref()
            .and_then(parse_http_date)
            .or_else(|| {
                resp.expires_in
                    .and_then(Duration::try_seconds)
                    .and_then(|d| now.checked_add_signed(d))
            })
            .unwrap_or(now);
        Some(Self {
            access_token,
            expires_at,
        })
    }
}

pub(crate) fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Device configuration returned by `/api/Devices/FileMap`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileMap {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "mainThermostat", alias = "MainThermostat")]
    pub main_thermostat: Option<usize>,
    #[serde(default, alias = "States")]
    pub states: HashMap<String, String>,
    #[serde(default, alias = "Errors")]
    pub errors: HashMap<String, String>,
}

/// Device record returned by `/api/devices/Details`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CloudDeviceRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub is_connected: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub firmware_version: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub firmware_revision: Option<String>,
    #[serde(default)]
    pub last_message_received: Option<String>,
}

impl CloudDeviceRecord {
    /// `product.firmware.revision`, leading zeros stripped from the product part.
    pub fn software_version(&self) -> String {
        let product = self.product_version.as_deref().unwrap_or("");
        let product = product.trim_start_matches('0');
        let product = if product.is_empty() { "0" } else { product };
        format!(
            "{}.{}.{}",
            product,
            self.firmware_version.as_deref().unwrap_or(""),
            self.firmware_revision.as_deref().unwrap_or(""),
        )
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Events emitted when a load changes the snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChanged { state: i32, description: String },
    ErrorChanged { code: i32, description: String },
    RoomTemperatureChanged { temp: i32 },
    TargetTemperatureChanged { temp: i32 },
    ConnectivityChanged { connected: bool },
    AddressChanged { ip: String },
}
