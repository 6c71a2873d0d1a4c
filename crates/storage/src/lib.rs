use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{default_dispenser_name, DeviceIdentity, DispenseAction, Slot};

/// Entries kept per device identity; older ones are pruned on append.
pub const DISPENSE_LOG_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseLogEntry {
    pub id: i64,
    pub action: DispenseAction,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns the identity stored for this install, generating and storing
    /// one on first use.
    pub async fn load_or_create_identity(&self) -> Result<DeviceIdentity> {
        if let Some(identity) = self.stored_identity().await? {
            return Ok(identity);
        }

        let generated = DeviceIdentity::generate();
        sqlx::query("INSERT OR IGNORE INTO device_identity (id, identity) VALUES (1, ?)")
            .bind(generated.as_str())
            .execute(&self.pool)
            .await
            .context("failed to store device identity")?;

        // Another process may have won the insert; whatever is stored wins.
        self.stored_identity()
            .await?
            .ok_or_else(|| anyhow!("device identity missing after insert"))
    }

    pub async fn stored_identity(&self) -> Result<Option<DeviceIdentity>> {
        let row = sqlx::query("SELECT identity FROM device_identity WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let raw = r.get::<String, _>(0);
            DeviceIdentity::new(raw.clone())
                .with_context(|| format!("stored device identity {raw:?} is invalid"))
        })
        .transpose()
    }

    /// Display names for slots `0..slot_count`, defaulting to `Dispenser {n}`.
    pub async fn dispenser_names(
        &self,
        device: &DeviceIdentity,
        slot_count: usize,
    ) -> Result<Vec<String>> {
        let mut names: Vec<String> = (0..slot_count)
            .map(|index| default_dispenser_name(Slot(index)))
            .collect();

        let rows = sqlx::query(
            "SELECT slot, name FROM dispenser_names WHERE device_id = ? AND slot < ? ORDER BY slot",
        )
        .bind(device.as_str())
        .bind(slot_count as i64)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let slot = row.get::<i64, _>(0);
            if let Some(name) = usize::try_from(slot).ok().and_then(|s| names.get_mut(s)) {
                *name = row.get::<String, _>(1);
            }
        }
        Ok(names)
    }

    pub async fn dispenser_name(&self, device: &DeviceIdentity, slot: Slot) -> Result<String> {
        let row = sqlx::query("SELECT name FROM dispenser_names WHERE device_id = ? AND slot = ?")
            .bind(device.as_str())
            .bind(slot.0 as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.get::<String, _>(0))
            .unwrap_or_else(|| default_dispenser_name(slot)))
    }

    /// Stores a new display name. Returns `false` without writing when the
    /// trimmed name is empty or equal to the current one.
    pub async fn rename_dispenser(
        &self,
        device: &DeviceIdentity,
        slot: Slot,
        name: &str,
    ) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() || self.dispenser_name(device, slot).await? == name {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO dispenser_names (device_id, slot, name, updated_at)
             VALUES (?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(device_id, slot) DO UPDATE SET
                name = excluded.name,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(device.as_str())
        .bind(slot.0 as i64)
        .bind(name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to rename dispenser {}", slot.wire_number()))?;
        Ok(true)
    }

    /// Appends a log entry and prunes everything past the newest
    /// [`DISPENSE_LOG_LIMIT`] entries for the device.
    pub async fn append_log(
        &self,
        device: &DeviceIdentity,
        action: DispenseAction,
        detail: &str,
    ) -> Result<DispenseLogEntry> {
        let recorded_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rec = sqlx::query(
            "INSERT INTO dispense_log (device_id, action, detail, recorded_at)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(device.as_str())
        .bind(action.as_db_str())
        .bind(detail)
        .bind(recorded_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to append dispense log entry")?;

        sqlx::query(
            "DELETE FROM dispense_log
             WHERE device_id = ?
               AND id NOT IN (
                   SELECT id FROM dispense_log
                   WHERE device_id = ?
                   ORDER BY id DESC
                   LIMIT ?
               )",
        )
        .bind(device.as_str())
        .bind(device.as_str())
        .bind(DISPENSE_LOG_LIMIT)
        .execute(&mut *tx)
        .await
        .context("failed to prune dispense log")?;

        tx.commit().await?;
        Ok(DispenseLogEntry {
            id: rec.get::<i64, _>(0),
            action,
            detail: detail.to_string(),
            recorded_at,
        })
    }

    /// Newest entry first.
    pub async fn recent_log(&self, device: &DeviceIdentity) -> Result<Vec<DispenseLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, detail, recorded_at
             FROM dispense_log
             WHERE device_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(device.as_str())
        .bind(DISPENSE_LOG_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let raw_action = r.get::<String, _>(1);
                let action = DispenseAction::from_db_str(&raw_action)
                    .ok_or_else(|| anyhow!("unknown dispense action {raw_action:?}"))?;
                Ok(DispenseLogEntry {
                    id: r.get::<i64, _>(0),
                    action,
                    detail: r.get::<String, _>(2),
                    recorded_at: r.get::<DateTime<Utc>, _>(3),
                })
            })
            .collect()
    }

    /// Returns the number of entries removed.
    pub async fn clear_log(&self, device: &DeviceIdentity) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dispense_log WHERE device_id = ?")
            .bind(device.as_str())
            .execute(&self.pool)
            .await
            .context("failed to clear dispense log")?;
        Ok(result.rows_affected())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
