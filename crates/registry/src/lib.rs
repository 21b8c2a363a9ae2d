//! Durable store of machines, projects, pending joins and tokens.
//!
//! SQLite-backed; the hub is the only writer. Status transitions are
//! monotone except `approved → revoked`, and a machine's token is non-empty
//! exactly when its status is `approved`.

pub mod store;
pub mod types;

pub use {
    store::Registry,
    types::{AgentFilter, MachineRecord, ProjectRecord},
};

/// Run database migrations for the registry tables.
///
/// Called at hub startup before the first query.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
