//! Data models for Shopgate storage.

use serde::{Deserialize, Serialize};

use shopgate_proto::{ResourceDescriptor, ResourceKind};

/// Administrator account. API keys authenticate both devices and
/// dashboards; the password hash backs the external dashboard login.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub api_key: String,
    pub created_at: i64,
}

/// A card holder.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub rfid: String,
    pub email: String,
    pub enabled: bool,
    pub created_at: i64,
}

/// A door or machine managed by the system. `resource_id` is the
/// external label identifier devices authenticate with; `id` is the
/// internal row key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Resource {
    pub id: i64,
    pub resource_id: String,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub connection_status: String,
    pub require_card_present: bool,
    pub category: Option<String>,
    pub created_at: i64,
}

impl Resource {
    pub fn is_machine(&self) -> bool {
        self.kind == ResourceKind::Machine.as_str()
    }

    /// Wire descriptor sent to a device on successful auth.
    pub fn descriptor(&self) -> ResourceDescriptor {
        let kind = if self.is_machine() {
            ResourceKind::Machine
        } else {
            ResourceKind::Door
        };
        ResourceDescriptor {
            id: self.id,
            resource_id: self.resource_id.clone(),
            name: self.name.clone(),
            kind,
            enabled: self.enabled,
            require_card_present: self.require_card_present,
        }
    }
}

/// One access-ledger row: a scan attempt, a denial, or a usage session.
/// Session rows have `session_start` set; open sessions additionally
/// have `session_end` null.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub resource_id: i64,
    pub rfid: String,
    pub success: bool,
    pub access_granted: bool,
    pub reason: String,
    pub session_id: Option<String>,
    pub session_start: Option<i64>,
    pub session_end: Option<i64>,
    pub usage_minutes: i64,
    pub user_name: Option<String>,
    pub created_at: i64,
}
