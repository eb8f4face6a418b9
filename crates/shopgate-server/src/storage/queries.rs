//! Database queries for the Shopgate server.

use shopgate_core::auth::{generate_api_key, generate_resource_id, hash_password};
use shopgate_core::db::{elapsed_minutes, unix_timestamp_ms};
use shopgate_proto::{ConnectionStatus, ResourceKind};
use uuid::Uuid;

use super::db::{Database, DatabaseError};
use super::models::{AccessRecord, Admin, Resource, User};

/// Reason recorded when the opener of a session closes it.
pub const REASON_SESSION_COMPLETED: &str = "Session completed";
/// Reason recorded when someone else (or nobody) closes a session.
pub const REASON_SESSION_ENDED: &str = "Session ended";

/// Parameters for one access-ledger attempt row.
#[derive(Debug, Clone, Copy)]
pub struct NewAttempt<'a> {
    pub user_id: Option<i64>,
    pub resource_id: i64,
    pub rfid: &'a str,
    pub success: bool,
    pub reason: &'a str,
    pub user_name: Option<&'a str>,
}

impl Database {
    // =========================================================================
    // Credential store: admins, users, resources, permissions
    // =========================================================================

    /// Resolve an API key to the admin account that owns it.
    pub async fn verify_api_key(&self, api_key: &str) -> Result<Option<Admin>, DatabaseError> {
        let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(self.pool())
            .await?;

        Ok(admin)
    }

    /// Get a resource by its external (label) identifier.
    pub async fn get_resource_by_rid(
        &self,
        resource_id: &str,
    ) -> Result<Option<Resource>, DatabaseError> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(resource)
    }

    /// Get a user by RFID code.
    pub async fn get_user_by_rfid(&self, rfid: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE rfid = ?")
            .bind(rfid)
            .fetch_optional(self.pool())
            .await?;

        Ok(user)
    }

    /// Whether the user holds a permission grant for the resource
    /// (internal row ids).
    pub async fn has_permission(
        &self,
        user_id: i64,
        resource_id: i64,
    ) -> Result<bool, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM user_resources WHERE user_id = ? AND resource_id = ?",
        )
        .bind(user_id)
        .bind(resource_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row.0 > 0)
    }

    /// Persist a resource's connection status (keyed by external id).
    pub async fn set_connection_status(
        &self,
        resource_id: &str,
        status: ConnectionStatus,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE resources SET connection_status = ? WHERE resource_id = ?")
            .bind(status.as_str())
            .bind(resource_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    // =========================================================================
    // Access ledger: attempt records and usage sessions
    // =========================================================================

    /// Record a single scan outcome (grant or denial).
    pub async fn create_attempt(&self, attempt: &NewAttempt<'_>) -> Result<i64, DatabaseError> {
        let now = unix_timestamp_ms();

        let result = sqlx::query(
            "INSERT INTO access_logs \
             (user_id, resource_id, rfid, success, access_granted, reason, user_name, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt.user_id)
        .bind(attempt.resource_id)
        .bind(attempt.rfid)
        .bind(attempt.success)
        .bind(attempt.success)
        .bind(attempt.reason)
        .bind(attempt.user_name)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Open a usage session for a card-present machine. Mints the
    /// session identifier and returns the created record.
    pub async fn start_session(
        &self,
        user: &User,
        resource_id: i64,
        rfid: &str,
    ) -> Result<AccessRecord, DatabaseError> {
        let now = unix_timestamp_ms();
        let session_id = Uuid::new_v4().to_string();

        let result = sqlx::query(
            "INSERT INTO access_logs \
             (user_id, resource_id, rfid, success, access_granted, reason, \
              session_id, session_start, user_name, created_at) \
             VALUES (?, ?, ?, 1, 1, 'Session started', ?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(resource_id)
        .bind(rfid)
        .bind(&session_id)
        .bind(now)
        .bind(&user.name)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_record(result.last_insert_rowid()).await
    }

    /// Find the open session for a resource, if any. The schema's
    /// partial unique index guarantees there is at most one.
    pub async fn find_open_session(
        &self,
        resource_id: i64,
    ) -> Result<Option<AccessRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, AccessRecord>(
            "SELECT * FROM access_logs \
             WHERE resource_id = ? AND session_start IS NOT NULL AND session_end IS NULL",
        )
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(record)
    }

    /// Close a session record: set the end timestamp, compute whole
    /// usage minutes, and record who closed it. The reason becomes
    /// "Session completed" when the opener closes their own session,
    /// "Session ended" otherwise.
    pub async fn close_session(
        &self,
        record_id: i64,
        end_ms: i64,
        closing_user_id: Option<i64>,
    ) -> Result<AccessRecord, DatabaseError> {
        let record = self.get_record(record_id).await?;
        let start = record
            .session_start
            .ok_or_else(|| DatabaseError::Query(format!("Record {record_id} is not a session")))?;

        let usage_minutes = elapsed_minutes(start, end_ms);
        let reason = if closing_user_id.is_some() && closing_user_id == record.user_id {
            REASON_SESSION_COMPLETED
        } else {
            REASON_SESSION_ENDED
        };

        sqlx::query(
            "UPDATE access_logs SET session_end = ?, usage_minutes = ?, reason = ? WHERE id = ?",
        )
        .bind(end_ms)
        .bind(usage_minutes)
        .bind(reason)
        .bind(record_id)
        .execute(self.pool())
        .await?;

        self.get_record(record_id).await
    }

    /// Get a single ledger record by id.
    pub async fn get_record(&self, id: i64) -> Result<AccessRecord, DatabaseError> {
        sqlx::query_as::<_, AccessRecord>("SELECT * FROM access_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Access record {id}")))
    }

    /// Most recent ledger rows, optionally scoped to one resource.
    pub async fn recent_logs(
        &self,
        resource_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<AccessRecord>, DatabaseError> {
        let records = if let Some(rid) = resource_id {
            sqlx::query_as::<_, AccessRecord>(
                "SELECT * FROM access_logs WHERE resource_id = ? \
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(rid)
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, AccessRecord>(
                "SELECT * FROM access_logs ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        };

        Ok(records)
    }

    // =========================================================================
    // Provisioning: row creation used by bootstrap and fixtures
    // =========================================================================

    /// Create an admin account with a freshly generated API key.
    pub async fn create_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Admin, DatabaseError> {
        let now = unix_timestamp_ms();
        let api_key = generate_api_key();
        let password_hash =
            hash_password(password).map_err(|e| DatabaseError::Query(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO admins (username, password_hash, api_key, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(&api_key)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_admin(result.last_insert_rowid()).await
    }

    /// Get an admin by id.
    pub async fn get_admin(&self, id: i64) -> Result<Admin, DatabaseError> {
        sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Admin {id}")))
    }

    /// Create a card holder.
    pub async fn create_user(
        &self,
        name: &str,
        rfid: &str,
        email: &str,
    ) -> Result<User, DatabaseError> {
        let now = unix_timestamp_ms();

        let result = sqlx::query(
            "INSERT INTO users (name, rfid, email, enabled, created_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(name)
        .bind(rfid)
        .bind(email)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Enable or disable a card holder.
    pub async fn set_user_enabled(&self, user_id: i64, enabled: bool) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE users SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(user_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Create a resource with a generated external identifier.
    pub async fn create_resource(
        &self,
        name: &str,
        kind: ResourceKind,
        require_card_present: bool,
        category: Option<&str>,
    ) -> Result<Resource, DatabaseError> {
        let now = unix_timestamp_ms();
        let resource_id = generate_resource_id();

        sqlx::query(
            "INSERT INTO resources \
             (resource_id, name, type, enabled, connection_status, require_card_present, category, created_at) \
             VALUES (?, ?, ?, 1, 'offline', ?, ?, ?)",
        )
        .bind(&resource_id)
        .bind(name)
        .bind(kind.as_str())
        .bind(require_card_present)
        .bind(category)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_resource_by_rid(&resource_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Resource {resource_id}")))
    }

    /// Enable or disable a resource.
    pub async fn set_resource_enabled(
        &self,
        resource_id: i64,
        enabled: bool,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE resources SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(resource_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Grant a user access to a resource; idempotent.
    pub async fn grant_permission(
        &self,
        user_id: i64,
        resource_id: i64,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp_ms();

        sqlx::query(
            "INSERT OR IGNORE INTO user_resources (user_id, resource_id, granted_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(resource_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Revoke a user's access to a resource.
    pub async fn revoke_permission(
        &self,
        user_id: i64,
        resource_id: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM user_resources WHERE user_id = ? AND resource_id = ?")
            .bind(user_id)
            .bind(resource_id)
            .execute(self.pool())
            .await?;

        Ok(())
    }
}
