use crate::types::{DeviceSnapshot, Event};

/// Events describing what changed between two snapshots, in a fixed order.
pub(crate) fn diff_snapshots(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> Vec<Event> {
    let mut events = Vec::new();

    if previous.state != current.state {
        events.push(Event::StateChanged {
            state: current.state,
            description: current.state_description().to_string(),
        });
    }
    if previous.error_code != current.error_code {
        events.push(Event::ErrorChanged {
            code: current.error_code,
            description: current.error_description().to_string(),
        });
    }
    if previous.room_temperature != current.room_temperature {
        events.push(Event::RoomTemperatureChanged {
            temp: current.room_temperature,
        });
    }
    if previous.target_temperature != current.target_temperature {
        events.push(Event::TargetTemperatureChanged {
            temp: current.target_temperature,
        });
    }
    if previous.is_connected != current.is_connected {
        events.push(Event::ConnectivityChanged {
            connected: current.is_connected,
        });
    }
    if previous.ip != current.ip
        && let Some(ip) = &current.ip
    {
        events.push(Event::AddressChanged { ip: ip.clone() });
    }

    events
}
