use std::time::Duration;

use log::{error, info};

use crate::db::DbPool;
use crate::services::SessionService;

/// Periodic session cleanup. Deletes expired and revoked session rows on a
/// fixed interval; audit_logs are append-only and never touched here.
pub fn spawn_session_cleanup(db_pool: DbPool, interval_secs: u64) {
    actix_web::rt::spawn(async move {
        let session_service = SessionService::new(db_pool);
        let mut interval = actix_web::rt::time::interval(Duration::from_secs(interval_secs));

        // The first tick fires immediately, which doubles as a startup sweep.
        loop {
            interval.tick().await;

            match session_service.cleanup_expired().await {
                Ok(0) => {}
                Ok(deleted) => info!("Session cleanup removed {} stale sessions", deleted),
                Err(e) => error!("Session cleanup failed: {}", e),
            }
        }
    });
}
