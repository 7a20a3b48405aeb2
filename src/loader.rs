//! Turns decoded batches into the device snapshot.
//!
//! The `Loader` owns the only `DeviceSnapshot` and is the only thing that
//! mutates it. A load either replaces every decoded field at once or leaves the
//! snapshot exactly as it was.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::frame::{self, CommandFrame, FrameKind, Payload};
use crate::protocol::{self, STATE_INFO_81_TEMPLATE_HEAD};
use crate::types::{CloudDeviceRecord, DeviceSnapshot, FileMap};
use crate::{Error, Result};

/// Position of the thermostat frame on legacy firmware.
pub const DEFAULT_MAIN_THERMOSTAT: usize = 12;

const UNKNOWN_ERROR: &str = "Unknown error";
const UNKNOWN_STATE: &str = "Unknown state";

const DEFAULT_STATES: &[(i32, &str)] = &[
    (0, "Off"),
    (1, "Check up"),
    (2, "Ignition"),
    (3, "Stabilization"),
    (4, "Ignition"),
    (5, "Run"),
    (6, "Modulation"),
    (7, "Extinguishing"),
    (8, "Safety"),
    (9, "Block"),
    (10, "Recover ignition"),
    (11, "Standby"),
];

const DEFAULT_ERRORS: &[(i32, &str)] = &[
    (0, "System OK"),
    (1, "High voltage safety 1"),
    (2, "High voltage safety 2"),
    (3, "Low combustion temperature"),
    (4, "Water overtemperature"),
    (5, "Combustion overheating"),
    (6, "Pellet thermostat"),
    (7, "Fan encoder stopped"),
    (8, "Fan encoder not regulating"),
    (9, "Minimum water pressure"),
    (10, "Maximum water pressure"),
    (11, "Real-time clock failure"),
    (12, "Ignition failed"),
    (13, "Accidental extinction"),
    (14, "Pressure switch"),
    (15, "Power failure"),
    (16, "RS485 communication failure"),
    (17, "Airflow sensor not regulating"),
    (18, "Pellet finished"),
    (19, "Pellet consent"),
    (20, "Wood/pellet switch failure"),
    (21, "Combustion probe 2 overheating"),
    (22, "Oxygen regulation failure"),
    (23, "Probe disconnected"),
    (24, "Igniter broken"),
    (25, "Safety motor 1"),
    (26, "Safety motor 2"),
    (27, "Safety motor 3"),
    (28, "Safety motor 4"),
    (29, "Safety motor 5"),
    (30, "Air probe overheating"),
    (31, "Pellet valve closed"),
    (32, "Water pressure sensor"),
    (33, "Tube bundle cleaning motor failure"),
    (34, "Minimum suction air"),
    (35, "Maximum suction air"),
    (36, "Probe reading out of range"),
    (37, "Agitator motor failure"),
    (38, "Pump failure"),
    (39, "Airflow sensor failure"),
    (40, "Service"),
    (41, "Minimum airflow"),
    (42, "Maximum airflow"),
    (43, "Flow switch"),
    (44, "Door open"),
    (45, "Limit switch failure"),
    (46, "Level switch failure"),
    (47, "Loading encoder motor stopped"),
    (48, "Loading encoder motor not regulating"),
    (49, "Combustion alarm"),
    (50, "Maximum peak alarm"),
    (51, "Damper position alarm"),
    (52, "Additional I2C module not communicating"),
    (53, "Loading encoder motor 2 stopped"),
    (54, "Loading encoder motor 2 not regulating"),
    (55, "User maintenance service"),
    (56, "Plumbing layout changed"),
    (57, "Forced draught"),
    (58, "Oven overheating"),
    (59, "Condensation"),
    (60, "Pressurised suction fan"),
    (61, "Pressurised combustion fan"),
    (62, "Brazier full"),
    (63, "Fan encoder 2 broken"),
    (64, "Fan encoder 2 not regulating"),
    (65, "Fan encoder 3 broken"),
    (66, "Fan encoder 3 not regulating"),
    (68, "Selector"),
    (79, "Maximum pressure switch openings exceeded"),
    (200, "Lambda sensor failure"),
    (201, "Heater sensor short circuit"),
    (202, "Heater sensor disconnected"),
    (203, "Heater sensor shorted to +12V"),
    (204, "Lambda sensor short circuit"),
    (205, "Lambda supply voltage low"),
    (206, "Lambda sensor shorted to +12V"),
    (207, "Heater sensor timeout"),
    (208, "Lambda sensor overheated"),
];

/// How the thermostat frame is found in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatLocator {
    /// Legacy firmware: fixed position after the header is stripped.
    Index(usize),
    /// Newer firmware: the single `StateInfo81` frame.
    StateInfo81,
}

impl ThermostatLocator {
    pub fn legacy() -> Self {
        ThermostatLocator::Index(DEFAULT_MAIN_THERMOSTAT)
    }
}

/// Firmware-specific constants, normally derived once from the cloud FileMap.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub thermostat: ThermostatLocator,
    pub state_descriptions: HashMap<i32, String>,
    pub error_descriptions: HashMap<i32, String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            thermostat: ThermostatLocator::StateInfo81,
            state_descriptions: table(DEFAULT_STATES),
            error_descriptions: table(DEFAULT_ERRORS),
        }
    }
}

fn table(entries: &[(i32, &str)]) -> HashMap<i32, String> {
    entries
        .iter()
        .map(|(code, text)| (*code, (*text).to_string()))
        .collect()
}

impl LoaderConfig {
    /// FileMap entries override the built-in tables; keys that are not numbers
    /// are ignored.
    pub fn from_file_map(map: &FileMap) -> Self {
        let mut config = Self::default();
        if let Some(index) = map.main_thermostat {
            config.thermostat = ThermostatLocator::Index(index);
        }
        merge_table(&mut config.state_descriptions, &map.states);
        merge_table(&mut config.error_descriptions, &map.errors);
        config
    }

    pub fn state_description(&self, state: i32) -> String {
        self.state_descriptions
            .get(&state)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_STATE.to_string())
    }

    /// Only looked up for a non-zero code; no error yields an empty string.
    pub fn error_description(&self, code: i32) -> String {
        if code == 0 {
            return String::new();
        }
        self.error_descriptions
            .get(&code)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
    }
}

fn merge_table(target: &mut HashMap<i32, String>, source: &HashMap<String, String>) {
    for (key, text) in source {
        match key.trim().parse::<i32>() {
            Ok(code) => {
                target.insert(code, text.clone());
            }
            Err(_) => debug!(key = %key, "ignoring non-numeric description key"),
        }
    }
}

/// Values pulled out of one batch, applied to the snapshot in one step.
struct Reading {
    state: i32,
    error_code: i32,
    room_temperature: i32,
    target_temperature: i32,
    template: String,
}

pub struct Loader {
    config: LoaderConfig,
    snapshot: DeviceSnapshot,
}

impl Loader {
    pub fn new(config: LoaderConfig, snapshot: DeviceSnapshot) -> Self {
        Self { config, snapshot }
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LoaderConfig) {
        self.config = config;
    }

    /// Record a device address learned outside a full load.
    pub fn set_address(&mut self, ip: &str) {
        self.snapshot.ip = Some(ip.to_string());
    }

    /// Apply a batch read over the local socket. The `["2WL", seq]` header is
    /// optional.
    pub fn load_from_local(&mut self, batch: &[String]) -> Result<()> {
        let frames = decode_all(protocol::strip_header(batch))?;
        let reading = self.extract(&frames)?;
        self.apply(reading);
        debug!(state = self.snapshot.state, "snapshot loaded from local batch");
        Ok(())
    }

    /// Apply a cloud device record. Metadata is always taken; the embedded
    /// last message, when present, must contain a complete reading or nothing
    /// is applied.
    pub fn load_from_cloud(&mut self, record: &CloudDeviceRecord) -> Result<()> {
        let reading = match record.last_message_received.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                let values = protocol::parse_last_message(text).map_err(|e| {
                    Error::load_caused_by("cloud last message is not valid JSON", e)
                })?;
                let frames = decode_all(&values)?;
                Some(self.extract(&frames)?)
            }
            _ => None,
        };

        if let Some(name) = &record.name {
            self.snapshot.name = name.clone();
        }
        if let Some(ip) = record.ip_address.as_deref().filter(|ip| !ip.is_empty()) {
            self.snapshot.ip = Some(ip.to_string());
        }
        self.snapshot.is_connected = record.is_connected.unwrap_or(false);
        self.snapshot.state_timestamp = record.last_timestamp.clone();
        self.snapshot.software_version = record.software_version();

        match reading {
            Some(reading) => self.apply(reading),
            // last_update stays put: nothing was actually read from the stove.
            None => warn!("cloud record has no last message; only metadata updated"),
        }
        Ok(())
    }

    fn extract(&self, frames: &[CommandFrame]) -> Result<Reading> {
        let mut main = frames.iter().filter_map(CommandFrame::main_values);
        let main_values = main
            .next()
            .ok_or_else(|| Error::load("batch has no MainValues frame"))?;
        if main.next().is_some() {
            return Err(Error::load("batch has more than one MainValues frame"));
        }

        let thermostat = self.locate_thermostat(frames)?;
        let target_temperature = thermostat.thermostat_value().ok_or_else(|| {
            Error::load(format!(
                "frame {:?} does not carry a thermostat value",
                thermostat.raw
            ))
        })?;

        Ok(Reading {
            state: i32::from(main_values.status),
            error_code: i32::from(main_values.cod_error),
            room_temperature: main_values.temp_princ,
            target_temperature,
            template: command_template(thermostat),
        })
    }

    fn locate_thermostat<'a>(&self, frames: &'a [CommandFrame]) -> Result<&'a CommandFrame> {
        match self.config.thermostat {
            ThermostatLocator::Index(index) => frames.get(index).ok_or_else(|| {
                Error::load(format!(
                    "no thermostat frame at index {index} (batch has {} frames)",
                    frames.len()
                ))
            }),
            ThermostatLocator::StateInfo81 => {
                let mut found = frames
                    .iter()
                    .filter(|f| f.kind == FrameKind::StateInfo81 && f.payload.is_some());
                let frame = found
                    .next()
                    .ok_or_else(|| Error::load("batch has no StateInfo81 frame"))?;
                if found.next().is_some() {
                    return Err(Error::load("batch has more than one StateInfo81 frame"));
                }
                Ok(frame)
            }
        }
    }

    fn apply(&mut self, reading: Reading) {
        let snap = &mut self.snapshot;
        snap.state = reading.state;
        snap.error_code = reading.error_code;
        snap.room_temperature = reading.room_temperature;
        snap.target_temperature = reading.target_temperature;
        snap.set_temperature_command_template = Some(reading.template);
        snap.state_description = self.config.state_description(reading.state);
        snap.error_description = self.config.error_description(reading.error_code);
        snap.last_update = Some(Utc::now());
    }
}

fn decode_all(values: &[String]) -> Result<Vec<CommandFrame>> {
    values
        .iter()
        .map(|v| frame::decode(v).map_err(|e| Error::load_caused_by("frame decode failed", e)))
        .collect()
}

fn command_template(frame: &CommandFrame) -> String {
    match &frame.payload {
        Some(Payload::StateInfo81(info)) => {
            format!("{STATE_INFO_81_TEMPLATE_HEAD}{}", info.command_tail)
        }
        _ => frame.raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNKNOWN_VALUE;

    const MAIN_VALUES: &str = "100000000F01000000320015001600C800000100";
    const STATE_INFO_81: &str = "0C8100150028009600030002001600AB12CD";

    fn batch(frames: &[&str]) -> Vec<String> {
        let mut out = vec!["2WL".to_string(), "3".to_string()];
        out.extend(frames.iter().map(|f| f.to_string()));
        out
    }

    fn loader() -> Loader {
        Loader::new(LoaderConfig::default(), DeviceSnapshot::default())
    }

    #[test]
    fn loads_main_values_and_state_info_81() {
        let mut loader = loader();
        loader
            .load_from_local(&batch(&["0C0048", MAIN_VALUES, STATE_INFO_81]))
            .unwrap();
        let snap = loader.snapshot();
        assert_eq!(snap.state, 1);
        assert!(snap.is_on());
        assert_eq!(snap.error_code, 0);
        assert!(!snap.is_error());
        assert_eq!(snap.error_description(), "");
        assert_eq!(snap.room_temperature, 21);
        assert_eq!(snap.target_temperature, 22);
        assert_eq!(snap.state_description(), "Check up");
        assert_eq!(
            snap.set_temperature_command_template.as_deref(),
            Some("12005a000000AB12CD")
        );
        assert!(snap.last_update.is_some());
    }

    #[test]
    fn missing_main_values_leaves_snapshot_untouched() {
        let mut loader = loader();
        let before = loader.snapshot().clone();
        let err = loader.load_from_local(&batch(&[STATE_INFO_81])).unwrap_err();
        assert!(matches!(err, Error::DeviceDataLoad { .. }));
        assert_eq!(loader.snapshot(), &before);
        assert_eq!(loader.snapshot().state, UNKNOWN_VALUE);
    }

    #[test]
    fn missing_thermostat_keeps_previous_snapshot() {
        let mut loader = loader();
        loader
            .load_from_local(&batch(&[MAIN_VALUES, STATE_INFO_81]))
            .unwrap();
        let before = loader.snapshot().clone();
        assert!(loader.load_from_local(&batch(&[MAIN_VALUES])).is_err());
        assert_eq!(loader.snapshot(), &before);
    }

    #[test]
    fn decode_failure_is_a_load_error_with_cause() {
        let mut loader = loader();
        let err = loader
            .load_from_local(&batch(&[MAIN_VALUES, "zz"]))
            .unwrap_err();
        assert!(matches!(err, Error::DeviceDataLoad { cause: Some(_), .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn positional_thermostat() {
        let config = LoaderConfig {
            thermostat: ThermostatLocator::Index(1),
            ..LoaderConfig::default()
        };
        let mut loader = Loader::new(config, DeviceSnapshot::default());
        loader
            .load_from_local(&batch(&[MAIN_VALUES, "0E002A0013"]))
            .unwrap();
        assert_eq!(loader.snapshot().target_temperature, 19);
        assert_eq!(
            loader.snapshot().set_temperature_command_template.as_deref(),
            Some("0E002A0013")
        );
    }

    #[test]
    fn positional_thermostat_out_of_range() {
        let config = LoaderConfig {
            thermostat: ThermostatLocator::legacy(),
            ..LoaderConfig::default()
        };
        let mut loader = Loader::new(config, DeviceSnapshot::default());
        assert!(loader.load_from_local(&batch(&[MAIN_VALUES])).is_err());
    }

    #[test]
    fn error_code_resolves_description() {
        let mut loader = loader();
        let with_error = "100000000F010C0000320015001600C800000100";
        loader
            .load_from_local(&batch(&[with_error, STATE_INFO_81]))
            .unwrap();
        assert_eq!(loader.snapshot().error_code, 12);
        assert!(loader.snapshot().is_error());
        assert_eq!(loader.snapshot().error_description(), "Ignition failed");
    }

    #[test]
    fn cloud_record_with_last_message() {
        let mut loader = loader();
        let record: CloudDeviceRecord = serde_json::from_value(serde_json::json!({
            "Name": "Stove",
            "IpAddress": "192.168.1.18",
            "IsConnected": true,
            "LastTimestamp": "2024-01-01T10:00:00",
            "ProductVersion": "007",
            "FirmwareVersion": "2",
            "FirmwareRevision": "5",
            "LastMessageReceived": format!(r#"{{"Values":["{MAIN_VALUES}","{STATE_INFO_81}"]}}"#),
        }))
        .unwrap();
        loader.load_from_cloud(&record).unwrap();
        let snap = loader.snapshot();
        assert_eq!(snap.name, "Stove");
        assert_eq!(snap.ip.as_deref(), Some("192.168.1.18"));
        assert!(snap.is_connected);
        assert_eq!(snap.software_version, "7.2.5");
        assert_eq!(snap.room_temperature, 21);
        assert_eq!(snap.target_temperature, 22);
    }

    #[test]
    fn cloud_record_with_incomplete_message_changes_nothing() {
        let mut loader = loader();
        let before = loader.snapshot().clone();
        let record = CloudDeviceRecord {
            name: Some("Stove".into()),
            last_message_received: Some(format!(r#"{{"Values":["{STATE_INFO_81}"]}}"#)),
            ..CloudDeviceRecord::default()
        };
        assert!(loader.load_from_cloud(&record).is_err());
        assert_eq!(loader.snapshot(), &before);
    }

    #[test]
    fn cloud_record_without_message_keeps_last_update() {
        let mut loader = loader();
        let record = CloudDeviceRecord {
            name: Some("Stove".into()),
            ip_address: Some("192.168.1.20".into()),
            is_connected: Some(false),
            ..CloudDeviceRecord::default()
        };
        loader.load_from_cloud(&record).unwrap();
        let snap = loader.snapshot();
        assert_eq!(snap.name, "Stove");
        assert_eq!(snap.ip.as_deref(), Some("192.168.1.20"));
        assert!(snap.last_update.is_none());
        assert!(!snap.is_loaded());
        assert_eq!(snap.state, UNKNOWN_VALUE);
    }

    #[test]
    fn file_map_overrides_tables() {
        let map: FileMap = serde_json::from_value(serde_json::json!({
            "name": "Stove",
            "main_thermostat": 4,
            "states": {"5": "Funzionamento", "x": "ignored"},
        }))
        .unwrap();
        let config = LoaderConfig::from_file_map(&map);
        assert_eq!(config.thermostat, ThermostatLocator::Index(4));
        assert_eq!(config.state_description(5), "Funzionamento");
        assert_eq!(config.state_description(0), "Off");
        assert_eq!(config.state_description(77), "Unknown state");
        assert_eq!(config.error_description(0), "");
        assert_eq!(config.error_description(999), "Unknown error");
    }
}
