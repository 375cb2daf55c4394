use chrono::DateTime;
use chrono::offset::Utc;
use diesel::Selectable;
use diesel::prelude::{Insertable, Queryable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::schema::{audit_logs, sessions, users};

#[derive(diesel_derive_enum::DbEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[ExistingTypePath = "crate::db::schema::sql_types::UserRole"]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Hr,
    Manager,
    Employee,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Hr => "hr",
            UserRole::Manager => "manager",
            UserRole::Employee => "employee",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "hr" => Ok(UserRole::Hr),
            "manager" => Ok(UserRole::Manager),
            "employee" => Ok(UserRole::Employee),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(diesel_derive_enum::DbEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[ExistingTypePath = "crate::db::schema::sql_types::AuditStatus"]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

#[derive(Queryable, Debug, Selectable, Serialize, Deserialize, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub employee_id: Option<Uuid>,
    pub is_active: bool,
    pub failed_login_attempts: i32,
    pub account_locked_until: Option<DateTime<Utc>>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A lock is only effective until `account_locked_until` passes.
    pub fn is_locked(&self) -> bool {
        self.account_locked_until
            .map(|until| until > Utc::now())
            .unwrap_or(false)
    }

    pub fn has_valid_reset_token(&self) -> bool {
        self.password_reset_token.is_some()
            && self
                .password_reset_expires
                .map(|exp| exp > Utc::now())
                .unwrap_or(false)
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: UserRole,
    pub employee_id: Option<Uuid>,
}

// Session Model
#[derive(Queryable, Debug, Selectable, Serialize, Deserialize, Clone)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token: String,
    pub access_token_jti: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub user_id: Uuid,
    pub refresh_token: &'a str,
    pub access_token_jti: Uuid,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub expires_at: DateTime<Utc>,
}

// Audit Log Model
#[derive(Queryable, Debug, Selectable, Serialize, Deserialize, Clone)]
#[diesel(table_name = audit_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub changes: Option<serde_json::Value>,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditLog<'a> {
    pub user_id: Option<Uuid>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub changes: Option<serde_json::Value>,
    pub status: AuditStatus,
    pub error_message: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "worker@example.com".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: UserRole::Employee,
            employee_id: None,
            is_active: true,
            failed_login_attempts: 0,
            account_locked_until: None,
            password_reset_token: None,
            password_reset_expires: None,
            last_login: None,
            last_login_ip: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn lock_expires_once_deadline_passes() {
        let mut user = sample_user();
        assert!(!user.is_locked());

        user.account_locked_until = Some(Utc::now() + Duration::minutes(30));
        assert!(user.is_locked());

        user.account_locked_until = Some(Utc::now() - Duration::seconds(1));
        assert!(!user.is_locked());
    }

    #[test]
    fn reset_token_requires_both_columns() {
        let mut user = sample_user();
        assert!(!user.has_valid_reset_token());

        user.password_reset_token = Some("ab".repeat(32));
        assert!(!user.has_valid_reset_token());

        user.password_reset_expires = Some(Utc::now() + Duration::hours(1));
        assert!(user.has_valid_reset_token());

        user.password_reset_expires = Some(Utc::now() - Duration::minutes(1));
        assert!(!user.has_valid_reset_token());
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            UserRole::Admin,
            UserRole::Hr,
            UserRole::Manager,
            UserRole::Employee,
        ] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("superuser".parse::<UserRole>().is_err());
    }
}
