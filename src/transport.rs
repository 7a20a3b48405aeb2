//! The two channels to the stove: a raw TCP socket on the LAN and the cloud
//! REST API. Both implement `Transport`, the four device operations.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::protocol::{self, COMMAND_TURN_OFF, COMMAND_TURN_ON, ReadCommand};
use crate::types::{AuthToken, Channel, CloudDeviceRecord, FileMap, TokenResponse};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://wifi4heat.azurewebsites.net";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_CLOUD_TIMEOUT: Duration = Duration::from_secs(120);

const RECEIVE_CHUNK: usize = 1024;
const MAX_RESPONSE_LEN: usize = 64 * 1024;

pub trait Transport {
    type Reading;

    fn channel(&self) -> Channel;

    fn read(&self) -> impl Future<Output = Result<Self::Reading>> + Send;

    fn turn_on(&self) -> impl Future<Output = Result<String>> + Send;

    fn turn_off(&self) -> impl Future<Output = Result<String>> + Send;

    /// Send an encoded set-temperature frame.
    fn set_temperature(&self, fragment: &str) -> impl Future<Output = Result<String>> + Send;
}

// -- Local socket --

/// Bounds for one socket exchange.
#[derive(Debug, Clone, Copy)]
pub struct LocalTimeouts {
    pub connect: Duration,
    pub receive: Duration,
    /// Pause between connect and send; the stove's listener is slow to start reading.
    pub send_delay: Duration,
}

impl Default for LocalTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            receive: Duration::from_secs(10),
            send_delay: Duration::from_millis(500),
        }
    }
}

/// One TCP connection per command, always closed before returning.
#[derive(Debug, Clone)]
pub struct LocalChannel {
    ip: String,
    port: u16,
    read_command: ReadCommand,
    timeouts: LocalTimeouts,
}

impl LocalChannel {
    pub fn new(
        ip: impl Into<String>,
        port: u16,
        read_command: ReadCommand,
        timeouts: LocalTimeouts,
    ) -> Self {
        Self {
            ip: ip.into(),
            port,
            read_command,
            timeouts,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn send_command(&self, command: &str) -> Result<String> {
        let addr = format!("{}:{}", self.ip, self.port);
        debug!(addr = %addr, command = %command, "sending local command");

        let mut stream = timeout(self.timeouts.connect, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::local(TransportError::Timeout("connect")))?
            .map_err(Error::local)?;

        sleep(self.timeouts.send_delay).await;
        let result = self.exchange(&mut stream, command).await;
        // Best effort; the stream is closed on drop either way.
        let _ = stream.shutdown().await;

        if let Ok(ref response) = result {
            trace!(response = %response, "local response");
        }
        result
    }

    async fn exchange(&self, stream: &mut TcpStream, command: &str) -> Result<String> {
        timeout(self.timeouts.receive, stream.write_all(command.as_bytes()))
            .await
            .map_err(|_| Error::local(TransportError::Timeout("send")))?
            .map_err(Error::local)?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; RECEIVE_CHUNK];
        loop {
            let n = timeout(self.timeouts.receive, stream.read(&mut chunk))
                .await
                .map_err(|_| Error::local(TransportError::Timeout("receive")))?
                .map_err(Error::local)?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if serde_json::from_slice::<serde_json::Value>(&buf).is_ok() {
                break;
            }
            if buf.len() > MAX_RESPONSE_LEN {
                return Err(Error::local(TransportError::Malformed(format!(
                    "response exceeds {MAX_RESPONSE_LEN} bytes"
                ))));
            }
        }

        if buf.is_empty() {
            return Err(Error::local(TransportError::Malformed(
                "connection closed without a response".to_string(),
            )));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl Transport for LocalChannel {
    type Reading = String;

    fn channel(&self) -> Channel {
        Channel::Local
    }

    async fn read(&self) -> Result<String> {
        self.send_command(self.read_command.as_wire_str()).await
    }

    async fn turn_on(&self) -> Result<String> {
        self.send_command(COMMAND_TURN_ON).await
    }

    async fn turn_off(&self) -> Result<String> {
        self.send_command(COMMAND_TURN_OFF).await
    }

    async fn set_temperature(&self, fragment: &str) -> Result<String> {
        self.send_command(&protocol::set_temperature_command(fragment))
            .await
    }
}

// -- Cloud API --

#[derive(Debug, Clone)]
pub struct CloudCredentials {
    pub code: String,
    pub pin: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct CloudChannel {
    http: reqwest::Client,
    base_url: String,
    credentials: CloudCredentials,
}

impl CloudChannel {
    pub fn new(
        base_url: &str,
        credentials: CloudCredentials,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn session<'a>(&'a self, token: &'a AuthToken) -> CloudSession<'a> {
        CloudSession {
            channel: self,
            token,
        }
    }

    /// Password grant against `/Token`. Every failure here is an `Error::Auth`.
    pub async fn get_token(&self) -> Result<AuthToken> {
        let url = format!("{}/Token", self.base_url);
        debug!(url = %url, "requesting cloud token");

        let form = [
            ("grant_type", "password"),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        let auth_error = |reason: &str, cause: TransportError| Error::Auth {
            reason: reason.to_string(),
            cause: Some(cause),
        };

        let resp = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| auth_error("token request failed", e.into()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| auth_error("token response unreadable", e.into()))?;
        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            auth_error(
                "token response is not valid JSON",
                TransportError::Malformed(e.to_string()),
            )
        })?;

        AuthToken::from_response(parsed, chrono::Utc::now()).ok_or_else(|| Error::Auth {
            reason: "token response has no access_token".to_string(),
            cause: None,
        })
    }

    pub async fn get_file_map(&self, token: &AuthToken) -> Result<FileMap> {
        self.get_json(
            token,
            "/api/Devices/FileMap",
            &[("pin", &self.credentials.pin), ("id", &self.credentials.code)],
        )
        .await
    }

    pub async fn get_details(&self, token: &AuthToken) -> Result<CloudDeviceRecord> {
        self.get_json(token, "/api/devices/Details", &[("id", &self.credentials.code)])
            .await
    }

    pub async fn send_command(&self, token: &AuthToken, command: &str) -> Result<String> {
        let url = format!("{}/api/devices/command", self.base_url);
        debug!(command = %command, "sending cloud command");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token.access_token)
            .query(&[("id", self.credentials.code.as_str()), ("comando", command)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(Error::cloud)?;
        let body = resp.text().await.map_err(Error::cloud)?;
        trace!(response = %body, "cloud command response");
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &AuthToken,
        path: &str,
        query: &[(&str, &String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "cloud request");

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token.access_token)
            .query(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(Error::cloud)?;
        let body = resp.text().await.map_err(Error::cloud)?;
        serde_json::from_str(&body)
            .map_err(|e| Error::cloud(TransportError::Malformed(format!("{path}: {e}"))))
    }
}

/// A cloud channel paired with a token that is valid for the current call.
pub struct CloudSession<'a> {
    channel: &'a CloudChannel,
    token: &'a AuthToken,
}

impl Transport for CloudSession<'_> {
    type Reading = CloudDeviceRecord;

    fn channel(&self) -> Channel {
        Channel::Cloud
    }

    async fn read(&self) -> Result<CloudDeviceRecord> {
        self.channel.get_details(self.token).await
    }

    async fn turn_on(&self) -> Result<String> {
        self.channel.send_command(self.token, COMMAND_TURN_ON).await
    }

    async fn turn_off(&self) -> Result<String> {
        self.channel.send_command(self.token, COMMAND_TURN_OFF).await
    }

    async fn set_temperature(&self, fragment: &str) -> Result<String> {
        self.channel
            .send_command(self.token, &protocol::set_temperature_command(fragment))
            .await
    }
}
