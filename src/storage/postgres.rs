//! Postgres-backed store
//!
//! Status transactions take a transaction-scoped advisory lock keyed by the
//! service id before reading the status row `FOR UPDATE`. The advisory lock
//! serializes the first-ever transition too, when there is no row to lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use super::{StatusTx, Store, StoreError};
use crate::model::{
    Alert, AlertKind, CheckResult, NewAlert, NewCheck, Service, ServiceId, ServiceStatus,
};
use crate::source::{ServiceSource, SourceError};

type CheckRow = (i64, i64, i32, i64, bool, Option<String>, DateTime<Utc>);
type StatusRow = (i64, bool, i32, i64, DateTime<Utc>);
type AlertRow = (i64, i64, String, String, DateTime<Utc>);
type ServiceRow = (i64, String, String, String, i32, i64, i64, bool);

const CHECK_COLUMNS: &str =
    "id, service_id, status_code, response_time, is_up, error_message, checked_at";

/// Store backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }
}

fn check_from_row(row: CheckRow) -> CheckResult {
    let (id, service_id, status_code, response_time_ms, is_up, error, checked_at) = row;
    CheckResult {
        id,
        service_id,
        status_code,
        response_time_ms,
        is_up,
        error,
        checked_at,
    }
}

fn status_from_row(row: StatusRow) -> ServiceStatus {
    let (service_id, is_up, status_code, response_time_ms, last_checked) = row;
    ServiceStatus {
        service_id,
        is_up,
        status_code,
        response_time_ms,
        last_checked,
    }
}

fn alert_from_row(row: AlertRow) -> Result<Alert, StoreError> {
    let (id, service_id, status, message, created_at) = row;
    let kind = AlertKind::parse(&status)
        .ok_or_else(|| StoreError::Corrupted(format!("unknown alert status {:?}", status)))?;
    Ok(Alert {
        id,
        service_id,
        kind,
        message,
        created_at,
    })
}

fn service_from_row(row: ServiceRow) -> Service {
    let (id, name, url, method, expected_status, timeout_ms, interval_sec, is_active) = row;
    Service {
        id,
        name,
        url,
        method,
        expected_status,
        timeout_ms,
        interval_sec,
        is_active,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn append_check(&self, check: NewCheck) -> Result<CheckResult, StoreError> {
        let sql = format!(
            "INSERT INTO uptime_checks (service_id, status_code, response_time, is_up, error_message, checked_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            CHECK_COLUMNS
        );
        let row: CheckRow = sqlx::query_as(&sql)
            .bind(check.service_id)
            .bind(check.status_code)
            .bind(check.response_time_ms)
            .bind(check.is_up)
            .bind(check.error.as_deref())
            .bind(check.checked_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(check_from_row(row))
    }

    async fn begin_status_tx(
        &self,
        service_id: ServiceId,
    ) -> Result<Box<dyn StatusTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStatusTx {
            tx,
            service_id,
            locked: false,
        }))
    }

    async fn status(&self, service_id: ServiceId) -> Result<Option<ServiceStatus>, StoreError> {
        let row: Option<StatusRow> = sqlx::query_as(
            "SELECT service_id, is_up, status_code, response_time, last_checked \
             FROM service_status WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(status_from_row))
    }

    async fn all_statuses(&self) -> Result<Vec<ServiceStatus>, StoreError> {
        let rows: Vec<StatusRow> = sqlx::query_as(
            "SELECT service_id, is_up, status_code, response_time, last_checked \
             FROM service_status ORDER BY service_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(status_from_row).collect())
    }

    async fn recent_checks(
        &self,
        service_id: ServiceId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let sql = format!(
            "SELECT {} FROM uptime_checks WHERE service_id = $1 \
             AND ($2::timestamptz IS NULL OR checked_at >= $2) \
             AND ($3::timestamptz IS NULL OR checked_at <= $3) \
             ORDER BY checked_at DESC, id DESC LIMIT $4",
            CHECK_COLUMNS
        );
        let rows: Vec<CheckRow> = sqlx::query_as(&sql)
            .bind(service_id)
            .bind(from)
            .bind(to)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(check_from_row).collect())
    }

    async fn checks_between(
        &self,
        service_id: ServiceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let sql = format!(
            "SELECT {} FROM uptime_checks \
             WHERE service_id = $1 AND checked_at BETWEEN $2 AND $3 \
             ORDER BY checked_at, id",
            CHECK_COLUMNS
        );
        let rows: Vec<CheckRow> = sqlx::query_as(&sql)
            .bind(service_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(check_from_row).collect())
    }

    async fn recent_alerts(
        &self,
        service_id: ServiceId,
        limit: usize,
    ) -> Result<Vec<Alert>, StoreError> {
        let rows: Vec<AlertRow> = sqlx::query_as(
            "SELECT id, service_id, status, message, created_at FROM alerts \
             WHERE service_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(alert_from_row).collect()
    }
}

struct PgStatusTx {
    tx: Transaction<'static, Postgres>,
    service_id: ServiceId,
    locked: bool,
}

impl PgStatusTx {
    async fn ensure_locked(&mut self) -> Result<(), StoreError> {
        if !self.locked {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(self.service_id)
                .execute(&mut *self.tx)
                .await?;
            self.locked = true;
        }
        Ok(())
    }
}

#[async_trait]
impl StatusTx for PgStatusTx {
    async fn lock_status(&mut self) -> Result<Option<ServiceStatus>, StoreError> {
        self.ensure_locked().await?;
        let row: Option<StatusRow> = sqlx::query_as(
            "SELECT service_id, is_up, status_code, response_time, last_checked \
             FROM service_status WHERE service_id = $1 FOR UPDATE",
        )
        .bind(self.service_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(status_from_row))
    }

    async fn upsert_status(&mut self, status: &ServiceStatus) -> Result<(), StoreError> {
        self.ensure_locked().await?;
        sqlx::query(
            "INSERT INTO service_status (service_id, is_up, last_checked, response_time, status_code) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (service_id) DO UPDATE SET \
                 is_up = EXCLUDED.is_up, \
                 last_checked = EXCLUDED.last_checked, \
                 response_time = EXCLUDED.response_time, \
                 status_code = EXCLUDED.status_code",
        )
        .bind(status.service_id)
        .bind(status.is_up)
        .bind(status.last_checked)
        .bind(status.response_time_ms)
        .bind(status.status_code)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_alert(&mut self, alert: &NewAlert) -> Result<(), StoreError> {
        self.ensure_locked().await?;
        sqlx::query(
            "INSERT INTO alerts (service_id, status, message, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(alert.service_id)
        .bind(alert.kind.as_str())
        .bind(&alert.message)
        .bind(alert.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceSource for PgStore {
    async fn services(&self) -> Result<Vec<Service>, SourceError> {
        let rows: Vec<ServiceRow> = sqlx::query_as(
            "SELECT id, name, url, method, expected_status, timeout_ms, interval_sec, is_active \
             FROM services ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(rows.into_iter().map(service_from_row).collect())
    }

    async fn active_services(&self) -> Result<Vec<Service>, SourceError> {
        let rows: Vec<ServiceRow> = sqlx::query_as(
            "SELECT id, name, url, method, expected_status, timeout_ms, interval_sec, is_active \
             FROM services WHERE is_active = TRUE",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(rows.into_iter().map(service_from_row).collect())
    }
}
