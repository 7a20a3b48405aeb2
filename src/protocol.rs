use serde::Deserialize;
use serde_json::Value;

pub const MARKER_READ: &str = "2WL";
pub const MARKER_WRITE: &str = "2WC";

pub const COMMAND_READ: &str = r#"["2WL","0"]"#;
pub const COMMAND_READ_LEGACY: &str = r#"["2WL","1",""]"#;
pub const COMMAND_TURN_ON: &str = r#"["2WC","1","05040000"]"#;
pub const COMMAND_TURN_OFF: &str = r#"["2WC","1","05050000"]"#;

/// Template synthesised from a `StateInfo81` frame: a `TestOut` write to
/// register 0x5a, completed with the frame's command tail.
pub const STATE_INFO_81_TEMPLATE_HEAD: &str = "12005a0000";

/// Read request flavour; older firmware expects the three-element form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadCommand {
    #[default]
    Current,
    Legacy,
}

impl ReadCommand {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            ReadCommand::Current => COMMAND_READ,
            ReadCommand::Legacy => COMMAND_READ_LEGACY,
        }
    }
}

/// Wrap an encoded write frame. Built as raw text, not through a JSON
/// encoder: the device compares the exact character sequence.
pub fn set_temperature_command(fragment: &str) -> String {
    let mut command = String::from(r#"["2WC","1",""#);
    command.push_str(fragment);
    command.push_str("\"]");
    command
}

/// Parse a device response (`["2WL","<seq>","<frame>",...]`) into its elements.
pub fn parse_batch(body: &str) -> serde_json::Result<Vec<String>> {
    serde_json::from_str(body.trim())
}

/// Drop the `["2WL"|"2WC", "<seq>"]` header when present.
pub fn strip_header(batch: &[String]) -> &[String] {
    match batch.first().map(String::as_str) {
        Some(MARKER_READ | MARKER_WRITE) => batch.get(2..).unwrap_or(&[]),
        _ => batch,
    }
}

#[derive(Deserialize)]
struct LastMessage {
    #[serde(rename = "Values", default)]
    values: Vec<String>,
}

/// Frames embedded in the cloud record's `LastMessageReceived` JSON text.
pub fn parse_last_message(text: &str) -> serde_json::Result<Vec<String>> {
    serde_json::from_str::<LastMessage>(text).map(|m| m.values)
}

/// Whether a command response counts as accepted. The device answers
/// `["2WC","<n>",...]` where `"0"` means nothing was applied; the cloud
/// answers either a bare boolean or the device reply as a JSON string.
pub fn is_command_accepted(response: &str) -> bool {
    match serde_json::from_str::<Value>(response.trim()) {
        Ok(Value::Array(items)) => {
            items.first().and_then(Value::as_str) == Some(MARKER_WRITE)
                && items.get(1).and_then(Value::as_str) != Some("0")
        }
        Ok(Value::Bool(accepted)) => accepted,
        Ok(Value::String(inner)) => is_command_accepted(&inner),
        _ => false,
    }
}
