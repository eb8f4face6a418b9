//! The RFID-scan decision algorithm.
//!
//! Evaluates one scan against the permission model and the session
//! ledger, producing exactly one response for the device and at most
//! one event for the admin feed. Rules are checked in order and
//! short-circuit; every branch past the resource lookup writes exactly
//! one ledger record before responding.

use tracing::{debug, error, info};

use shopgate_core::db::unix_timestamp_ms;
use shopgate_proto::{AdminEvent, ServerMessage};

use crate::storage::{Database, DatabaseError, NewAttempt, Resource, User};

use super::gate::SessionGate;

pub const REASON_RESOURCE_NOT_FOUND: &str = "Resource not found";
pub const REASON_RESOURCE_DISABLED: &str = "Resource disabled";
pub const REASON_UNKNOWN_RFID: &str = "Unknown RFID";
pub const REASON_USER_DISABLED: &str = "User disabled";
pub const REASON_NO_PERMISSION: &str = "No permission";
pub const REASON_ACCESS_GRANTED: &str = "Access granted";
pub const REASON_SESSION_STARTED: &str = "Session started";
pub const REASON_INTERNAL_ERROR: &str = "Internal error";

/// Result of one scan: the reply for the originating device and the
/// event to fan out to admins, when there is one.
#[derive(Debug)]
pub struct ScanOutcome {
    pub response: ServerMessage,
    pub event: Option<AdminEvent>,
}

impl ScanOutcome {
    const fn device_only(response: ServerMessage) -> Self {
        Self {
            response,
            event: None,
        }
    }
}

/// The access decision engine. Owns the per-resource session gate;
/// shared across all connection handlers.
#[derive(Clone)]
pub struct AccessEngine {
    db: Database,
    gate: SessionGate,
}

impl AccessEngine {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            gate: SessionGate::new(),
        }
    }

    /// Evaluate a scan from the device bound to `resource_rid`.
    ///
    /// Never fails outward: a storage error fails closed with a denial
    /// and an operator log line.
    pub async fn handle_scan(&self, resource_rid: &str, rfid: &str) -> ScanOutcome {
        match self.evaluate(resource_rid, rfid).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(resource_id = resource_rid, error = %e, "Scan evaluation failed, denying");
                ScanOutcome {
                    response: ServerMessage::access_denied(REASON_INTERNAL_ERROR),
                    event: Some(AdminEvent::AccessEvent {
                        resource_id: resource_rid.to_string(),
                        user: None,
                        success: false,
                        reason: REASON_INTERNAL_ERROR.to_string(),
                    }),
                }
            }
        }
    }

    async fn evaluate(&self, resource_rid: &str, rfid: &str) -> Result<ScanOutcome, DatabaseError> {
        // 1. The device's bound resource must still exist. Without it
        // there is no row to attach a ledger record to, so this guard
        // is device-local and not broadcast.
        let Some(resource) = self.db.get_resource_by_rid(resource_rid).await? else {
            return Ok(ScanOutcome::device_only(ServerMessage::access_denied(
                REASON_RESOURCE_NOT_FOUND,
            )));
        };

        // 2. Disabled resources deny before any user lookup.
        if !resource.enabled {
            return self.deny(&resource, rfid, None, REASON_RESOURCE_DISABLED).await;
        }

        // 3. Unknown card.
        let Some(user) = self.db.get_user_by_rfid(rfid).await? else {
            return self.deny(&resource, rfid, None, REASON_UNKNOWN_RFID).await;
        };

        // 4. Known but disabled card holder.
        if !user.enabled {
            return self.deny(&resource, rfid, Some(&user), REASON_USER_DISABLED).await;
        }

        // 5. No grant for this resource.
        if !self.db.has_permission(user.id, resource.id).await? {
            return self.deny(&resource, rfid, Some(&user), REASON_NO_PERMISSION).await;
        }

        // 6. Permission holds; branch on resource type.
        if resource.is_machine() && resource.require_card_present {
            self.toggle_session(&resource, &user, rfid).await
        } else {
            self.grant(&resource, &user, rfid).await
        }
    }

    /// Single-shot grant: doors, and machines that do not require the
    /// card to stay present.
    async fn grant(
        &self,
        resource: &Resource,
        user: &User,
        rfid: &str,
    ) -> Result<ScanOutcome, DatabaseError> {
        let reason = if resource.is_machine() {
            REASON_SESSION_STARTED
        } else {
            REASON_ACCESS_GRANTED
        };

        self.db
            .create_attempt(&NewAttempt {
                user_id: Some(user.id),
                resource_id: resource.id,
                rfid,
                success: true,
                reason,
                user_name: Some(&user.name),
            })
            .await?;

        info!(
            resource_id = %resource.resource_id,
            user = %user.name,
            reason,
            "Access granted"
        );

        Ok(ScanOutcome {
            response: ServerMessage::AccessGranted {
                user: user.name.clone(),
            },
            event: Some(AdminEvent::AccessEvent {
                resource_id: resource.resource_id.clone(),
                user: Some(user.name.clone()),
                success: true,
                reason: reason.to_string(),
            }),
        })
    }

    /// Card-present machine: a scan toggles the session. The toggle is
    /// keyed on "does an open session exist", not on card identity, so
    /// a second card closes whatever session is open; usage stays
    /// credited to the opener's record.
    async fn toggle_session(
        &self,
        resource: &Resource,
        user: &User,
        rfid: &str,
    ) -> Result<ScanOutcome, DatabaseError> {
        let _guard = self.gate.acquire(resource.id).await;

        if let Some(open) = self.db.find_open_session(resource.id).await? {
            let closed = self
                .db
                .close_session(open.id, unix_timestamp_ms(), Some(user.id))
                .await?;
            let session_id = closed.session_id.clone().unwrap_or_default();

            info!(
                resource_id = %resource.resource_id,
                user = %user.name,
                session_id = %session_id,
                usage_minutes = closed.usage_minutes,
                reason = %closed.reason,
                "Session closed"
            );

            Ok(ScanOutcome {
                response: ServerMessage::SessionEnded {
                    user: Some(user.name.clone()),
                    session_id: session_id.clone(),
                },
                event: Some(AdminEvent::SessionEnded {
                    resource_id: resource.resource_id.clone(),
                    user: Some(user.name.clone()),
                    session_id,
                }),
            })
        } else {
            let record = self.db.start_session(user, resource.id, rfid).await?;
            let session_id = record.session_id.clone().unwrap_or_default();

            info!(
                resource_id = %resource.resource_id,
                user = %user.name,
                session_id = %session_id,
                "Session started"
            );

            Ok(ScanOutcome {
                response: ServerMessage::SessionStarted {
                    user: user.name.clone(),
                    session_id: session_id.clone(),
                },
                event: Some(AdminEvent::SessionStarted {
                    resource_id: resource.resource_id.clone(),
                    user: user.name.clone(),
                    session_id,
                }),
            })
        }
    }

    /// Device-initiated `session_end`: closes the resource's open
    /// session when the identifier matches, with no closing user.
    pub async fn end_session(
        &self,
        resource_db_id: i64,
        resource_rid: &str,
        session_id: &str,
    ) -> ScanOutcome {
        let _guard = self.gate.acquire(resource_db_id).await;

        let open = match self.db.find_open_session(resource_db_id).await {
            Ok(open) => open,
            Err(e) => {
                error!(resource_id = resource_rid, error = %e, "Open-session lookup failed");
                return ScanOutcome::device_only(ServerMessage::error(REASON_INTERNAL_ERROR));
            }
        };

        match open {
            Some(record) if record.session_id.as_deref() == Some(session_id) => {
                match self
                    .db
                    .close_session(record.id, unix_timestamp_ms(), None)
                    .await
                {
                    Ok(closed) => {
                        info!(
                            resource_id = resource_rid,
                            session_id,
                            usage_minutes = closed.usage_minutes,
                            "Session ended by device"
                        );
                        ScanOutcome {
                            response: ServerMessage::SessionEnded {
                                user: None,
                                session_id: session_id.to_string(),
                            },
                            event: Some(AdminEvent::SessionEnded {
                                resource_id: resource_rid.to_string(),
                                user: None,
                                session_id: session_id.to_string(),
                            }),
                        }
                    }
                    Err(e) => {
                        error!(resource_id = resource_rid, error = %e, "Session close failed");
                        ScanOutcome::device_only(ServerMessage::error(REASON_INTERNAL_ERROR))
                    }
                }
            }
            _ => {
                debug!(resource_id = resource_rid, session_id, "No matching open session");
                ScanOutcome::device_only(ServerMessage::error("no open session"))
            }
        }
    }

    /// Write a denial record, then build the denial response and event.
    async fn deny(
        &self,
        resource: &Resource,
        rfid: &str,
        user: Option<&User>,
        reason: &'static str,
    ) -> Result<ScanOutcome, DatabaseError> {
        self.db
            .create_attempt(&NewAttempt {
                user_id: user.map(|u| u.id),
                resource_id: resource.id,
                rfid,
                success: false,
                reason,
                user_name: user.map(|u| u.name.as_str()),
            })
            .await?;

        debug!(
            resource_id = %resource.resource_id,
            rfid,
            reason,
            "Access denied"
        );

        Ok(ScanOutcome {
            response: ServerMessage::access_denied(reason),
            event: Some(AdminEvent::AccessEvent {
                resource_id: resource.resource_id.clone(),
                user: user.map(|u| u.name.clone()),
                success: false,
                reason: reason.to_string(),
            }),
        })
    }
}
