use diesel::RunQueryDsl;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::time::Duration;

use crate::config::DatabaseConfig;

pub mod model;
pub mod schema;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
}

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn establish_connection(
    config: &DatabaseConfig,
) -> Result<DbPool, Box<dyn std::error::Error + Send + Sync>> {
    let manager = ConnectionManager::<PgConnection>::new(&config.url);

    let pool = Pool::builder()
        .connection_customizer(Box::new(ConnectionCustomizer))
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime)))
        .build(manager)?;

    // Test connection
    pool.get()?;

    run_migrations(&pool)?;

    Ok(pool)
}

fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut conn = pool.get()?;

    conn.run_pending_migrations(MIGRATIONS)?;

    Ok(())
}

#[derive(Debug)]
struct ConnectionCustomizer;

impl diesel::r2d2::CustomizeConnection<PgConnection, diesel::r2d2::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query("SET timezone = 'UTC'")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        diesel::sql_query("SET application_name = 'hr_auth_api'")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}
