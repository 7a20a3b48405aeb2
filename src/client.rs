use std::time::Duration;

use tracing::{debug, info, warn};

use crate::diff::diff_snapshots;
use crate::encoder::fallback_chain;
use crate::loader::{Loader, LoaderConfig};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{self, COMMAND_TURN_OFF, COMMAND_TURN_ON, ReadCommand};
use crate::transport::{
    CloudChannel, CloudCredentials, DEFAULT_BASE_URL, DEFAULT_CLOUD_TIMEOUT, DEFAULT_PORT,
    LocalChannel, LocalTimeouts, Transport,
};
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&DeviceSnapshot) + Send + Sync>;

pub struct FourHeatClientBuilder {
    code: String,
    pin: String,
    username: String,
    password: String,
    ip: Option<String>,
    port: u16,
    base_url: String,
    read_command: ReadCommand,
    loader_config: LoaderConfig,
    local_timeouts: LocalTimeouts,
    cloud_timeout: Duration,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl FourHeatClientBuilder {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            pin: String::new(),
            username: String::new(),
            password: String::new(),
            ip: None,
            port: DEFAULT_PORT,
            base_url: DEFAULT_BASE_URL.to_string(),
            read_command: ReadCommand::default(),
            loader_config: LoaderConfig::default(),
            local_timeouts: LocalTimeouts::default(),
            cloud_timeout: DEFAULT_CLOUD_TIMEOUT,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = pin.into();
        self
    }

    /// Cloud account used for the password grant.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// LAN address of the stove. Without it the address is learned from the
    /// cloud on first use.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn read_command(mut self, command: ReadCommand) -> Self {
        self.read_command = command;
        self
    }

    pub fn loader_config(mut self, config: LoaderConfig) -> Self {
        self.loader_config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeouts.connect = timeout;
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeouts.receive = timeout;
        self
    }

    pub fn send_delay(mut self, delay: Duration) -> Self {
        self.local_timeouts.send_delay = delay;
        self
    }

    pub fn cloud_timeout(mut self, timeout: Duration) -> Self {
        self.cloud_timeout = timeout;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&DeviceSnapshot) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<FourHeatClient> {
        let credentials = CloudCredentials {
            code: self.code,
            pin: self.pin,
            username: self.username,
            password: self.password,
        };
        let cloud = CloudChannel::new(&self.base_url, credentials, self.cloud_timeout)?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let local = self.ip.as_deref().map(|ip| {
            LocalChannel::new(ip, self.port, self.read_command, self.local_timeouts)
        });
        let snapshot = DeviceSnapshot::new(self.ip, self.port);

        Ok(FourHeatClient {
            cloud,
            local,
            port: self.port,
            read_command: self.read_command,
            local_timeouts: self.local_timeouts,
            token: None,
            loader: Loader::new(self.loader_config, snapshot),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            logger,
        })
    }
}

/// A write the stove understands over either channel.
enum DeviceCommand {
    TurnOn,
    TurnOff,
    SetTemperature(String),
}

impl DeviceCommand {
    fn action(&self) -> &'static str {
        match self {
            DeviceCommand::TurnOn => "turn_on",
            DeviceCommand::TurnOff => "turn_off",
            DeviceCommand::SetTemperature(_) => "set_temperature",
        }
    }

    fn wire_text(&self) -> String {
        match self {
            DeviceCommand::TurnOn => COMMAND_TURN_ON.to_string(),
            DeviceCommand::TurnOff => COMMAND_TURN_OFF.to_string(),
            DeviceCommand::SetTemperature(fragment) => protocol::set_temperature_command(fragment),
        }
    }
}

/// Keeps one stove in sync. Every operation tries the LAN socket first and
/// falls back to the cloud API when the socket fails.
///
/// Operations take `&mut self`, so calls on one device never overlap.
pub struct FourHeatClient {
    cloud: CloudChannel,
    local: Option<LocalChannel>,
    port: u16,
    read_command: ReadCommand,
    local_timeouts: LocalTimeouts,
    token: Option<AuthToken>,
    loader: Loader,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    logger: Option<MessageLogger>,
}

impl FourHeatClient {
    pub fn builder(code: impl Into<String>) -> FourHeatClientBuilder {
        FourHeatClientBuilder::new(code)
    }

    /// Last successfully loaded state.
    pub fn snapshot(&self) -> &DeviceSnapshot {
        self.loader.snapshot()
    }

    pub fn loader_config(&self) -> &LoaderConfig {
        self.loader.config()
    }

    /// Poll the stove. On failure the previous readings are kept and the error
    /// returned; a new address reported by the cloud is still taken.
    pub async fn refresh(&mut self) -> Result<DeviceSnapshot> {
        let local = self.ensure_local().await?;
        let previous = self.loader.snapshot().clone();

        match local.read().await {
            Ok(body) => {
                self.log_exchange(Channel::Local, "read", self.read_command.as_wire_str(), &body);
                let batch = protocol::parse_batch(&body).map_err(|e| {
                    Error::load_caused_by("local response is not a frame batch", e)
                })?;
                if let Some(ref mut logger) = self.logger {
                    logger.log_batch(Channel::Local, protocol::strip_header(&batch));
                }
                self.loader.load_from_local(&batch)?;
            }
            Err(e) if e.is_local_transport() => {
                warn!(error = %e, "local read failed, falling back to cloud");
                let record = self.cloud_read().await?;
                self.adopt_cloud_address(&record);
                self.loader.load_from_cloud(&record)?;
            }
            Err(e) => return Err(e),
        }

        self.notify(&previous);
        Ok(self.loader.snapshot().clone())
    }

    pub async fn turn_on(&mut self) -> Result<bool> {
        let response = self
            .dispatch(&DeviceCommand::TurnOn, &mut Channel::Local)
            .await?;
        Ok(protocol::is_command_accepted(&response))
    }

    pub async fn turn_off(&mut self) -> Result<bool> {
        let response = self
            .dispatch(&DeviceCommand::TurnOff, &mut Channel::Local)
            .await?;
        Ok(protocol::is_command_accepted(&response))
    }

    /// Write a new target temperature using the thermostat frame captured by
    /// the last refresh. Encoders are tried in order until the stove accepts
    /// one. Once the socket has failed, the cloud gets exactly one attempt and
    /// its answer is final.
    pub async fn set_temperature(&mut self, celsius: i32) -> Result<bool> {
        let template = self
            .loader
            .snapshot()
            .set_temperature_command_template
            .clone()
            .ok_or_else(|| {
                Error::CommandEncoding("no thermostat frame captured yet; refresh first".into())
            })?;

        let mut route = Channel::Local;
        let mut encoding_error = None;
        let mut sent: Vec<String> = Vec::new();

        for encoder in fallback_chain() {
            let fragment = match encoder.encode(&template, celsius) {
                Ok(fragment) => fragment,
                Err(e) => {
                    debug!(encoder = encoder.name(), error = %e, "encoder cannot build command");
                    encoding_error = Some(e);
                    continue;
                }
            };
            if sent.contains(&fragment) {
                debug!(encoder = encoder.name(), "same command already sent, skipping");
                continue;
            }
            sent.push(fragment.clone());

            let command = DeviceCommand::SetTemperature(fragment);
            let response = self.dispatch(&command, &mut route).await?;
            if protocol::is_command_accepted(&response) {
                info!(encoder = encoder.name(), celsius, channel = %route, "temperature set");
                return Ok(true);
            }
            debug!(encoder = encoder.name(), response = %response, "command rejected");
            if route == Channel::Cloud {
                return Ok(false);
            }
        }

        match encoding_error {
            Some(e) if sent.is_empty() => Err(e),
            _ => Ok(false),
        }
    }

    /// Fetch the cloud FileMap and install the loader configuration it
    /// describes.
    pub async fn load_file_map(&mut self) -> Result<FileMap> {
        let token = self.ensure_token().await?;
        let map = self.cloud.get_file_map(&token).await?;
        if map.name.trim().is_empty() {
            return Err(Error::InvalidResponse("file map has no device name".into()));
        }
        info!(name = %map.name, main_thermostat = ?map.main_thermostat, "file map loaded");
        self.loader.set_config(LoaderConfig::from_file_map(&map));
        Ok(map)
    }

    async fn ensure_token(&mut self) -> Result<AuthToken> {
        if let Some(token) = &self.token
            && !token.is_expired()
        {
            return Ok(token.clone());
        }
        debug!("requesting new cloud token");
        let token = self.cloud.get_token().await?;
        debug!(expires_at = %token.expires_at, "cloud token refreshed");
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn cloud_read(&mut self) -> Result<CloudDeviceRecord> {
        let token = self.ensure_token().await?;
        let record = self.cloud.session(&token).read().await?;
        if let Some(ref mut logger) = self.logger {
            logger.log_command(Channel::Cloud, "read", "details");
            if let Some(message) = &record.last_message_received {
                logger.log_response(Channel::Cloud, "read", message);
                if let Ok(values) = protocol::parse_last_message(message) {
                    logger.log_batch(Channel::Cloud, &values);
                }
            }
        }
        Ok(record)
    }

    /// The local channel, learning the stove's address from the cloud first
    /// when none was configured.
    async fn ensure_local(&mut self) -> Result<LocalChannel> {
        if let Some(local) = &self.local {
            return Ok(local.clone());
        }

        info!("device address unknown, asking the cloud");
        let record = self.cloud_read().await.map_err(|e| {
            Error::Connection(format!("could not learn the device address: {e}"))
        })?;
        let ip = record
            .ip_address
            .clone()
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| Error::Connection("cloud record has no device address".into()))?;

        let previous = self.loader.snapshot().clone();
        match self.loader.load_from_cloud(&record) {
            Ok(()) => self.notify(&previous),
            Err(e) => {
                warn!(error = %e, "cloud record not applied, keeping address only");
                self.loader.set_address(&ip);
            }
        }

        let local = self.local_channel(&ip);
        self.local = Some(local.clone());
        Ok(local)
    }

    fn local_channel(&self, ip: &str) -> LocalChannel {
        LocalChannel::new(ip, self.port, self.read_command, self.local_timeouts)
    }

    /// Take the address from a cloud record whether or not its values load.
    fn adopt_cloud_address(&mut self, record: &CloudDeviceRecord) {
        if let Some(ip) = record.ip_address.as_deref().filter(|ip| !ip.is_empty())
            && self.loader.snapshot().ip.as_deref() != Some(ip)
        {
            self.loader.set_address(ip);
        }
        self.sync_local_address();
    }

    /// Point the local channel at the address the snapshot holds.
    fn sync_local_address(&mut self) {
        let Some(ip) = self.loader.snapshot().ip.clone() else {
            return;
        };
        if self.local.as_ref().is_some_and(|local| local.ip() == ip) {
            return;
        }
        info!(ip = %ip, "device address changed, rebuilding local channel");
        self.local = Some(self.local_channel(&ip));
    }

    /// Send a command over `route`, switching it to the cloud when the socket
    /// fails. A cloud failure is returned as is.
    async fn dispatch(&mut self, command: &DeviceCommand, route: &mut Channel) -> Result<String> {
        if *route == Channel::Local {
            let local = self.ensure_local().await?;
            match execute(&local, command, &mut self.logger).await {
                Err(e) if e.is_local_transport() => {
                    warn!(
                        action = command.action(),
                        error = %e,
                        "local command failed, falling back to cloud"
                    );
                    *route = Channel::Cloud;
                }
                other => return other,
            }
        }

        let token = self.ensure_token().await?;
        let session = self.cloud.session(&token);
        execute(&session, command, &mut self.logger).await
    }

    fn log_exchange(&mut self, channel: Channel, action: &str, command: &str, response: &str) {
        if let Some(ref mut logger) = self.logger {
            logger.log_command(channel, action, command);
            logger.log_response(channel, action, response);
        }
    }

    fn notify(&self, previous: &DeviceSnapshot) {
        let current = self.loader.snapshot();
        for event in diff_snapshots(previous, current) {
            debug!(?event, "device event");
            for cb in &self.event_callbacks {
                cb(&event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(current);
        }
    }
}

async fn execute<T: Transport>(
    transport: &T,
    command: &DeviceCommand,
    logger: &mut Option<MessageLogger>,
) -> Result<String> {
    let channel = transport.channel();
    let action = command.action();
    debug!(channel = %channel, action, "executing command");
    if let Some(logger) = logger.as_mut() {
        logger.log_command(channel, action, &command.wire_text());
    }

    let response = match command {
        DeviceCommand::TurnOn => transport.turn_on().await,
        DeviceCommand::TurnOff => transport.turn_off().await,
        DeviceCommand::SetTemperature(fragment) => transport.set_temperature(fragment).await,
    }?;

    if let Some(logger) = logger.as_mut() {
        logger.log_response(channel, action, &response);
    }
    Ok(response)
}
