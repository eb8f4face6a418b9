//! Inbound, outbound, and broadcast message definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages sent by a connected client (device or admin) to the server.
///
/// Field-name aliases cover the legacy firmware payloads: `device_id`
/// for `resource_id` on device auth, `rfid` for `rfid_code` on scans,
/// and `ping` as a synonym for `heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate a physical controller bound to one resource.
    AuthDevice {
        api_key: String,
        #[serde(alias = "device_id")]
        resource_id: String,
    },
    /// Authenticate a dashboard observer.
    AuthAdmin { api_key: String },
    /// Liveness signal. Devices are expected to send one at least every
    /// heartbeat-timeout interval; admins may send them too.
    #[serde(alias = "ping")]
    Heartbeat,
    /// An RFID card was presented at the device's reader.
    RfidScan {
        #[serde(alias = "rfid")]
        rfid_code: String,
    },
    /// Device-initiated termination of an open machine session.
    SessionEnd { session_id: String },
    /// Free-form device telemetry, fanned out to admins verbatim.
    StatusUpdate { status: Map<String, Value> },
}

/// Messages sent by the server to the originating connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Successful authentication. Carries the resource descriptor for
    /// devices, or the admin descriptor plus an online-device snapshot
    /// for dashboards.
    AuthSuccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource: Option<ResourceDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        admin: Option<AdminDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        online_devices: Option<Vec<DeviceStatusEntry>>,
    },
    AuthError {
        message: String,
    },
    HeartbeatAck,
    AccessGranted {
        user: String,
    },
    AccessDenied {
        reason: String,
    },
    SessionStarted {
        user: String,
        session_id: String,
    },
    SessionEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        session_id: String,
    },
    /// Protocol-level error: malformed payload, unknown message type,
    /// or an action attempted before authentication.
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Auth reply for a device connection.
    pub const fn device_auth_success(resource: ResourceDescriptor) -> Self {
        Self::AuthSuccess {
            resource: Some(resource),
            admin: None,
            online_devices: None,
        }
    }

    /// Auth reply for an admin connection, with the pull-based snapshot
    /// of currently online devices.
    pub const fn admin_auth_success(
        admin: AdminDescriptor,
        online_devices: Vec<DeviceStatusEntry>,
    ) -> Self {
        Self::AuthSuccess {
            resource: None,
            admin: Some(admin),
            online_devices: Some(online_devices),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }
}

/// Events fanned out to every connected admin observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminEvent {
    /// A device went online or offline.
    DeviceStatus {
        resource_id: String,
        status: ConnectionStatus,
    },
    /// A single-shot access outcome (grant or denial) at a resource.
    AccessEvent {
        resource_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        success: bool,
        reason: String,
    },
    SessionStarted {
        resource_id: String,
        user: String,
        session_id: String,
    },
    SessionEnded {
        resource_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        session_id: String,
    },
    /// Device telemetry forwarded from a `status_update` message; the
    /// device's status fields are flattened into the event.
    DeviceStatusUpdate {
        resource_id: String,
        #[serde(flatten)]
        status: Map<String, Value>,
    },
}

/// Resource descriptor returned to a device on successful auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: i64,
    pub resource_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub enabled: bool,
    pub require_card_present: bool,
}

/// What kind of physical resource a device controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Door,
    Machine,
}

impl ResourceKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Door => "door",
            Self::Machine => "machine",
        }
    }
}

/// Admin descriptor returned to a dashboard on successful auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminDescriptor {
    pub id: i64,
    pub username: String,
}

/// One entry in the online-device snapshot sent to a freshly
/// authenticated admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusEntry {
    pub resource_id: String,
    pub status: ConnectionStatus,
}

/// Device connection status, as persisted and as broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

impl ConnectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}
