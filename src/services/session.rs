use chrono::{Duration, Utc};
use diesel::{BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};
use thiserror::Error;
use uuid::Uuid;

use crate::db::model::{NewSession, Session};
use crate::db::schema::sessions;
use crate::db::DbPool;
use crate::utils::token::TokenService;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<diesel::result::Error> for SessionError {
    fn from(error: diesel::result::Error) -> Self {
        match error {
            diesel::result::Error::NotFound => SessionError::NotFound,
            other => SessionError::DatabaseError(other.to_string()),
        }
    }
}

/// Owns the session/refresh-token lifecycle. Refresh tokens leave this module
/// exactly once, as the plaintext half of the returned pair; rows only ever
/// hold the SHA-256 digest.
#[derive(Clone)]
pub struct SessionService {
    db_pool: DbPool,
}

impl SessionService {
    pub fn new(db_pool: DbPool) -> Self {
        Self { db_pool }
    }

    fn conn(
        &self,
    ) -> Result<
        diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
        SessionError,
    > {
        self.db_pool
            .get()
            .map_err(|e| SessionError::DatabaseError(e.to_string()))
    }

    /// Create a session for a fresh login. Returns the row and the plaintext
    /// refresh token.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        access_token_jti: Uuid,
        ip_address: &str,
        user_agent: &str,
        refresh_ttl: Duration,
    ) -> Result<(Session, String), SessionError> {
        let mut conn = self.conn()?;

        let refresh_token = TokenService::generate_token();
        let refresh_digest = TokenService::hash_token(&refresh_token);

        let new_session = NewSession {
            user_id,
            refresh_token: &refresh_digest,
            access_token_jti,
            ip_address: Some(ip_address),
            user_agent: Some(user_agent),
            expires_at: Utc::now() + refresh_ttl,
        };

        let session: Session = diesel::insert_into(sessions::table)
            .values(&new_session)
            .get_result(&mut conn)?;

        Ok((session, refresh_token))
    }

    /// Look up the session a presented refresh token belongs to, active or
    /// not; the caller decides how to treat inactive and expired matches.
    pub async fn find_by_refresh_token(
        &self,
        presented_token: &str,
    ) -> Result<Option<Session>, SessionError> {
        let mut conn = self.conn()?;
        let digest = TokenService::hash_token(presented_token);

        let session = sessions::table
            .filter(sessions::refresh_token.eq(&digest))
            .first::<Session>(&mut conn)
            .optional()?;

        Ok(session)
    }

    /// Rotate a session in place: fresh refresh digest, the new access jti,
    /// and a pushed-out expiry. The previous refresh token dies here.
    pub async fn rotate_session(
        &self,
        session_id: Uuid,
        new_access_token_jti: Uuid,
        refresh_ttl: Duration,
    ) -> Result<(Session, String), SessionError> {
        let mut conn = self.conn()?;

        let refresh_token = TokenService::generate_token();
        let refresh_digest = TokenService::hash_token(&refresh_token);

        let session = diesel::update(sessions::table.filter(sessions::id.eq(session_id)))
            .set((
                sessions::refresh_token.eq(&refresh_digest),
                sessions::access_token_jti.eq(new_access_token_jti),
                sessions::expires_at.eq(Utc::now() + refresh_ttl),
                sessions::last_activity.eq(Some(Utc::now())),
            ))
            .get_result::<Session>(&mut conn)?;

        Ok((session, refresh_token))
    }

    /// Revoke the session carrying the given access-token jti (logout).
    /// Returns false when no active session matches, which keeps logout
    /// idempotent.
    pub async fn revoke_by_jti(&self, user_id: Uuid, jti: Uuid) -> Result<bool, SessionError> {
        let mut conn = self.conn()?;

        let updated = diesel::update(
            sessions::table
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::access_token_jti.eq(jti))
                .filter(sessions::is_active.eq(true)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut conn)?;

        Ok(updated > 0)
    }

    /// Revoke every active session of the user (logout-all, deactivation,
    /// password reset).
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, SessionError> {
        let mut conn = self.conn()?;

        let updated = diesel::update(
            sessions::table
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::is_active.eq(true)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut conn)?;

        Ok(updated as u64)
    }

    /// Revoke every active session except the one carrying `current_jti`
    /// (change-password keeps the caller signed in).
    pub async fn revoke_others(
        &self,
        user_id: Uuid,
        current_jti: Uuid,
    ) -> Result<u64, SessionError> {
        let mut conn = self.conn()?;

        let updated = diesel::update(
            sessions::table
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::is_active.eq(true))
                .filter(sessions::access_token_jti.ne(current_jti)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut conn)?;

        Ok(updated as u64)
    }

    /// Revoke one of the user's own sessions by id. Returns false when the
    /// session does not exist, is inactive, or belongs to someone else.
    pub async fn revoke_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<bool, SessionError> {
        let mut conn = self.conn()?;

        let updated = diesel::update(
            sessions::table
                .filter(sessions::id.eq(session_id))
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::is_active.eq(true)),
        )
        .set(sessions::is_active.eq(false))
        .execute(&mut conn)?;

        Ok(updated > 0)
    }

    /// Get user's active, unexpired sessions with pagination, newest first
    pub async fn list_active(
        &self,
        user_id: Uuid,
        page: i64,
        per_page: i64,
    ) -> Result<Vec<Session>, SessionError> {
        let mut conn = self.conn()?;

        let offset = (page - 1) * per_page;
        let rows = sessions::table
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::is_active.eq(true))
            .filter(sessions::expires_at.gt(Utc::now()))
            .order(sessions::created_at.desc())
            .limit(per_page)
            .offset(offset)
            .load::<Session>(&mut conn)?;

        Ok(rows)
    }

    pub async fn count_active(&self, user_id: Uuid) -> Result<i64, SessionError> {
        let mut conn = self.conn()?;

        let count = sessions::table
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::is_active.eq(true))
            .filter(sessions::expires_at.gt(Utc::now()))
            .count()
            .get_result::<i64>(&mut conn)?;

        Ok(count)
    }

    /// Delete sessions that are expired or already revoked. Run by the
    /// periodic cleanup task; audit_logs are never touched.
    pub async fn cleanup_expired(&self) -> Result<usize, SessionError> {
        let mut conn = self.conn()?;

        let deleted = diesel::delete(
            sessions::table.filter(
                sessions::expires_at
                    .lt(Utc::now())
                    .or(sessions::is_active.eq(false)),
            ),
        )
        .execute(&mut conn)?;

        Ok(deleted)
    }
}
