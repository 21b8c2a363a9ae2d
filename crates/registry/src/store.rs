//! SQLite-backed registry store.

use {
    anyhow::{Context, Result},
    chrono::Utc,
    intercom_protocol::MachineStatus,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tracing::{debug, info},
};

use crate::types::{AgentFilter, MachineRecord, ProjectRecord};

/// Façade over the machines/projects tables.
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    /// Open (or create) a registry database and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// An in-memory registry, used by standalone mode and tests.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Upsert a machine row. The token is persisted only for approved
    /// machines; any other status stores an empty token.
    pub async fn register_machine(&self, record: &MachineRecord) -> Result<()> {
        let token = match record.status {
            MachineStatus::Approved => record.token.as_str(),
            _ => "",
        };
        sqlx::query(
            "INSERT INTO machines (machine_id, display_name, overlay_ip, daemon_url, token, status, created_at, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(machine_id) DO UPDATE SET
               display_name = excluded.display_name,
               overlay_ip   = excluded.overlay_ip,
               daemon_url   = excluded.daemon_url,
               token        = excluded.token,
               status       = excluded.status",
        )
        .bind(&record.machine_id)
        .bind(&record.display_name)
        .bind(&record.overlay_ip)
        .bind(&record.daemon_url)
        .bind(token)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.last_seen)
        .execute(&self.pool)
        .await?;

        self.ensure_home_project(&record.machine_id).await?;
        debug!(machine_id = %record.machine_id, status = record.status.as_str(), "machine registered");
        Ok(())
    }

    /// Upsert a project row.
    pub async fn register_project(&self, project: &ProjectRecord) -> Result<()> {
        let caps = serde_json::to_string(&project.capabilities)?;
        sqlx::query(
            "INSERT INTO projects (machine_id, project_id, description, capabilities, path)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(machine_id, project_id) DO UPDATE SET
               description  = excluded.description,
               capabilities = excluded.capabilities,
               path         = excluded.path",
        )
        .bind(&project.machine_id)
        .bind(&project.project_id)
        .bind(&project.description)
        .bind(&caps)
        .bind(&project.path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh `last_seen` (and optionally the addresses) for a known
    /// machine. Returns false when the machine is not registered.
    pub async fn update_heartbeat(
        &self,
        machine_id: &str,
        overlay_ip: Option<&str>,
        daemon_url: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE machines SET
               last_seen  = ?,
               overlay_ip = COALESCE(?, overlay_ip),
               daemon_url = COALESCE(?, daemon_url)
             WHERE machine_id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(overlay_ip)
        .bind(daemon_url)
        .bind(machine_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Approve a pending join and issue its token. Idempotent: a machine
    /// that is already approved keeps (and returns) its existing token.
    pub async fn approve_join(&self, machine_id: &str, token: &str) -> Result<String> {
        if let Some(existing) = self.get_machine(machine_id).await? {
            if existing.status == MachineStatus::Approved && !existing.token.is_empty() {
                return Ok(existing.token);
            }
        } else {
            anyhow::bail!("unknown machine: {machine_id}");
        }

        sqlx::query("UPDATE machines SET status = 'approved', token = ? WHERE machine_id = ?")
            .bind(token)
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        info!(machine_id, "join approved, token issued");
        Ok(token.to_string())
    }

    /// Deny a pending join. Idempotent.
    pub async fn deny_join(&self, machine_id: &str) -> Result<()> {
        sqlx::query("UPDATE machines SET status = 'denied', token = '' WHERE machine_id = ?")
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        info!(machine_id, "join denied");
        Ok(())
    }

    /// Revoke an approved machine, clearing its token.
    pub async fn revoke_machine(&self, machine_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE machines SET status = 'revoked', token = ''
             WHERE machine_id = ? AND status = 'approved'",
        )
        .bind(machine_id)
        .execute(&self.pool)
        .await?;
        info!(machine_id, "machine revoked");
        Ok(())
    }

    pub async fn get_machine(&self, machine_id: &str) -> Result<Option<MachineRecord>> {
        let row = sqlx::query("SELECT * FROM machines WHERE machine_id = ?")
            .bind(machine_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(machine_from_row).transpose()
    }

    /// Token lookup for the signed-request verifier. Empty tokens (anything
    /// not approved) come back as `None`.
    pub async fn lookup_token(&self, machine_id: &str) -> Result<Option<String>> {
        let token: Option<String> =
            sqlx::query_scalar("SELECT token FROM machines WHERE machine_id = ?")
                .bind(machine_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(token.filter(|t| !t.is_empty()))
    }

    pub async fn get_pending_joins(&self) -> Result<Vec<MachineRecord>> {
        let rows = sqlx::query("SELECT * FROM machines WHERE status = 'pending' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(machine_from_row).collect()
    }

    pub async fn list_machines(&self) -> Result<Vec<MachineRecord>> {
        let rows = sqlx::query("SELECT * FROM machines ORDER BY machine_id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(machine_from_row).collect()
    }

    /// List approved agents (machine/project pairs) matching a filter.
    pub async fn list_agents(
        &self,
        filter: &AgentFilter,
    ) -> Result<Vec<(MachineRecord, ProjectRecord)>> {
        let rows = sqlx::query(
            "SELECT m.*, p.project_id, p.description AS project_description,
                    p.capabilities, p.path
             FROM machines m JOIN projects p ON p.machine_id = m.machine_id
             WHERE m.status = 'approved'
             ORDER BY m.machine_id, p.project_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now().timestamp();
        let mut agents = Vec::with_capacity(rows.len());
        for row in rows {
            let machine = machine_from_row_prefixed(&row)?;
            match filter {
                AgentFilter::All => {},
                AgentFilter::Online if machine.is_online_at(now) => {},
                AgentFilter::Online => continue,
                AgentFilter::Machine(id) if *id == machine.machine_id => {},
                AgentFilter::Machine(_) => continue,
            }
            let caps_raw: String = row.get("capabilities");
            let capabilities: Vec<String> = serde_json::from_str(&caps_raw).unwrap_or_default();
            let project = ProjectRecord {
                machine_id: machine.machine_id.clone(),
                project_id: row.get("project_id"),
                description: row.get("project_description"),
                capabilities,
                path: row.get("path"),
            };
            agents.push((machine, project));
        }
        Ok(agents)
    }

    pub async fn delete_machine(&self, machine_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM projects WHERE machine_id = ?")
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM machines WHERE machine_id = ?")
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Garbage-collect pending/denied rows older than `max_age_secs`.
    /// Returns the number of rows removed.
    pub async fn gc_stale_joins(&self, max_age_secs: i64) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - max_age_secs;
        let result = sqlx::query(
            "DELETE FROM machines
             WHERE status IN ('pending', 'denied') AND created_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Every machine carries the synthetic `home` project.
    async fn ensure_home_project(&self, machine_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO projects (machine_id, project_id, description, capabilities, path)
             VALUES (?, 'home', 'home agent', '[]', '')
             ON CONFLICT(machine_id, project_id) DO NOTHING",
        )
        .bind(machine_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn machine_from_row(row: sqlx::sqlite::SqliteRow) -> Result<MachineRecord> {
    machine_from_row_prefixed(&row)
}

fn machine_from_row_prefixed(row: &sqlx::sqlite::SqliteRow) -> Result<MachineRecord> {
    let status: String = row.get("status");
    Ok(MachineRecord {
        machine_id: row.get("machine_id"),
        display_name: row.get("display_name"),
        overlay_ip: row.get("overlay_ip"),
        daemon_url: row.get("daemon_url"),
        token: row.get("token"),
        status: MachineStatus::parse(&status)
            .with_context(|| format!("unknown machine status in store: {status}"))?,
        created_at: row.get("created_at"),
        last_seen: row.get("last_seen"),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn pending(machine_id: &str) -> MachineRecord {
        MachineRecord {
            machine_id: machine_id.into(),
            display_name: format!("{machine_id} box"),
            overlay_ip: "100.64.0.9".into(),
            daemon_url: format!("http://{machine_id}:7700"),
            token: String::new(),
            status: MachineStatus::Pending,
            created_at: Utc::now().timestamp(),
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let reg = Registry::in_memory().await.unwrap();
        let rec = pending("alpha");
        reg.register_machine(&rec).await.unwrap();
        reg.register_machine(&rec).await.unwrap();

        let got = reg.get_machine("alpha").await.unwrap().unwrap();
        assert_eq!(got.status, MachineStatus::Pending);
        assert!(got.token.is_empty());
    }

    #[tokio::test]
    async fn test_home_project_always_present() {
        let reg = Registry::in_memory().await.unwrap();
        reg.register_machine(&pending("alpha")).await.unwrap();
        reg.approve_join("alpha", "tok").await.unwrap();

        let agents = reg.list_agents(&AgentFilter::All).await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].1.project_id, "home");
    }

    #[tokio::test]
    async fn test_approve_join_idempotent_same_token() {
        let reg = Registry::in_memory().await.unwrap();
        reg.register_machine(&pending("alpha")).await.unwrap();

        let t1 = reg.approve_join("alpha", "tok-1").await.unwrap();
        let t2 = reg.approve_join("alpha", "tok-2").await.unwrap();
        assert_eq!(t1, "tok-1");
        assert_eq!(t2, "tok-1");

        let got = reg.get_machine("alpha").await.unwrap().unwrap();
        assert_eq!(got.status, MachineStatus::Approved);
        assert_eq!(got.token, "tok-1");
    }

    #[tokio::test]
    async fn test_token_cleared_on_deny_and_revoke() {
        let reg = Registry::in_memory().await.unwrap();
        reg.register_machine(&pending("alpha")).await.unwrap();
        reg.approve_join("alpha", "tok").await.unwrap();
        assert_eq!(reg.lookup_token("alpha").await.unwrap().as_deref(), Some("tok"));

        reg.revoke_machine("alpha").await.unwrap();
        let got = reg.get_machine("alpha").await.unwrap().unwrap();
        assert_eq!(got.status, MachineStatus::Revoked);
        assert!(got.token.is_empty());
        assert_eq!(reg.lookup_token("alpha").await.unwrap(), None);

        reg.register_machine(&pending("beta")).await.unwrap();
        reg.deny_join("beta").await.unwrap();
        assert_eq!(reg.lookup_token("beta").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_only_known_machines() {
        let reg = Registry::in_memory().await.unwrap();
        assert!(!reg.update_heartbeat("ghost", None, None).await.unwrap());

        reg.register_machine(&pending("alpha")).await.unwrap();
        assert!(
            reg.update_heartbeat("alpha", Some("100.64.0.10"), None)
                .await
                .unwrap()
        );
        let got = reg.get_machine("alpha").await.unwrap().unwrap();
        assert!(got.last_seen.is_some());
        assert_eq!(got.overlay_ip, "100.64.0.10");
        assert!(got.is_online());
    }

    #[tokio::test]
    async fn test_pending_joins_and_gc() {
        let reg = Registry::in_memory().await.unwrap();
        let mut old = pending("old");
        old.created_at -= 7 * 24 * 3600;
        reg.register_machine(&old).await.unwrap();
        reg.register_machine(&pending("fresh")).await.unwrap();

        assert_eq!(reg.get_pending_joins().await.unwrap().len(), 2);
        let removed = reg.gc_stale_joins(24 * 3600).await.unwrap();
        assert_eq!(removed, 1);
        let left = reg.get_pending_joins().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].machine_id, "fresh");
    }

    #[tokio::test]
    async fn test_list_agents_online_filter() {
        let reg = Registry::in_memory().await.unwrap();
        reg.register_machine(&pending("alpha")).await.unwrap();
        reg.approve_join("alpha", "tok-a").await.unwrap();
        reg.register_machine(&pending("beta")).await.unwrap();
        reg.approve_join("beta", "tok-b").await.unwrap();
        reg.update_heartbeat("alpha", None, None).await.unwrap();

        let online = reg.list_agents(&AgentFilter::Online).await.unwrap();
        assert!(online.iter().all(|(m, _)| m.machine_id == "alpha"));

        let by_machine = reg
            .list_agents(&AgentFilter::Machine("beta".into()))
            .await
            .unwrap();
        assert!(by_machine.iter().all(|(m, _)| m.machine_id == "beta"));
    }
}
