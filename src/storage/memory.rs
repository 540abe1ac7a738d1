//! In-process store
//!
//! Committed state lives behind a single `RwLock` so a status upsert and its
//! alert become visible together. Row locks are per-service async mutexes
//! created on demand, which also covers services that have no status row
//! yet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{StatusTx, Store, StoreError};
use crate::model::{Alert, CheckResult, NewAlert, NewCheck, ServiceId, ServiceStatus};

#[derive(Default)]
struct Committed {
    statuses: HashMap<ServiceId, ServiceStatus>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
struct Faults {
    check_appends: AtomicBool,
    status_writes: AtomicBool,
    alert_writes: AtomicBool,
}

#[derive(Default)]
struct Inner {
    checks: RwLock<Vec<CheckResult>>,
    committed: RwLock<Committed>,
    row_locks: DashMap<ServiceId, Arc<Mutex<()>>>,
    next_check_id: AtomicI64,
    next_alert_id: AtomicI64,
    faults: Faults,
}

impl Inner {
    fn row_lock(&self, service_id: ServiceId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.row_locks
                .entry(service_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

/// In-memory [`Store`] with optional fault injection
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent check append fail
    pub fn fail_check_appends(&self, fail: bool) {
        self.inner.faults.check_appends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent status upsert fail
    pub fn fail_status_writes(&self, fail: bool) {
        self.inner.faults.status_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent alert insert fail
    pub fn fail_alert_writes(&self, fail: bool) {
        self.inner.faults.alert_writes.store(fail, Ordering::SeqCst);
    }

    /// Every check ever appended, in append order
    pub fn all_checks(&self) -> Vec<CheckResult> {
        self.inner.checks.read().clone()
    }

    /// Every committed alert, in commit order
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.inner.committed.read().alerts.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_check(&self, check: NewCheck) -> Result<CheckResult, StoreError> {
        if self.inner.faults.check_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("check log rejected write".to_string()));
        }

        let id = self.inner.next_check_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = CheckResult::from_new(id, check);
        self.inner.checks.write().push(record.clone());
        Ok(record)
    }

    async fn begin_status_tx(
        &self,
        service_id: ServiceId,
    ) -> Result<Box<dyn StatusTx>, StoreError> {
        Ok(Box::new(MemoryStatusTx {
            inner: Arc::clone(&self.inner),
            service_id,
            guard: None,
            staged_status: None,
            staged_alerts: Vec::new(),
        }))
    }

    async fn status(&self, service_id: ServiceId) -> Result<Option<ServiceStatus>, StoreError> {
        Ok(self.inner.committed.read().statuses.get(&service_id).cloned())
    }

    async fn all_statuses(&self) -> Result<Vec<ServiceStatus>, StoreError> {
        let mut statuses: Vec<ServiceStatus> =
            self.inner.committed.read().statuses.values().cloned().collect();
        statuses.sort_by_key(|s| s.service_id);
        Ok(statuses)
    }

    async fn recent_checks(
        &self,
        service_id: ServiceId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let checks = self.inner.checks.read();
        let mut matching: Vec<CheckResult> = checks
            .iter()
            .filter(|c| c.service_id == service_id)
            .filter(|c| from.map_or(true, |from| c.checked_at >= from))
            .filter(|c| to.map_or(true, |to| c.checked_at <= to))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.checked_at.cmp(&a.checked_at).then(b.id.cmp(&a.id)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn checks_between(
        &self,
        service_id: ServiceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let checks = self.inner.checks.read();
        let mut matching: Vec<CheckResult> = checks
            .iter()
            .filter(|c| c.service_id == service_id && c.checked_at >= from && c.checked_at <= to)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.checked_at.cmp(&b.checked_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn recent_alerts(
        &self,
        service_id: ServiceId,
        limit: usize,
    ) -> Result<Vec<Alert>, StoreError> {
        let committed = self.inner.committed.read();
        Ok(committed
            .alerts
            .iter()
            .rev()
            .filter(|a| a.service_id == service_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct MemoryStatusTx {
    inner: Arc<Inner>,
    service_id: ServiceId,
    guard: Option<OwnedMutexGuard<()>>,
    staged_status: Option<ServiceStatus>,
    staged_alerts: Vec<NewAlert>,
}

impl MemoryStatusTx {
    async fn ensure_locked(&mut self) {
        if self.guard.is_none() {
            let lock = self.inner.row_lock(self.service_id);
            self.guard = Some(lock.lock_owned().await);
        }
    }
}

#[async_trait]
impl StatusTx for MemoryStatusTx {
    async fn lock_status(&mut self) -> Result<Option<ServiceStatus>, StoreError> {
        self.ensure_locked().await;
        if let Some(staged) = &self.staged_status {
            return Ok(Some(staged.clone()));
        }
        Ok(self
            .inner
            .committed
            .read()
            .statuses
            .get(&self.service_id)
            .cloned())
    }

    async fn upsert_status(&mut self, status: &ServiceStatus) -> Result<(), StoreError> {
        self.ensure_locked().await;
        if self.inner.faults.status_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("status upsert rejected".to_string()));
        }
        if status.service_id != self.service_id {
            return Err(StoreError::Database(format!(
                "status for service {} written in transaction for service {}",
                status.service_id, self.service_id
            )));
        }
        self.staged_status = Some(status.clone());
        Ok(())
    }

    async fn insert_alert(&mut self, alert: &NewAlert) -> Result<(), StoreError> {
        self.ensure_locked().await;
        if self.inner.faults.alert_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("alert insert rejected".to_string()));
        }
        self.staged_alerts.push(alert.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryStatusTx {
            inner,
            guard,
            staged_status,
            staged_alerts,
            ..
        } = *self;

        {
            let mut committed = inner.committed.write();
            if let Some(status) = staged_status {
                committed.statuses.insert(status.service_id, status);
            }
            for alert in staged_alerts {
                let id = inner.next_alert_id.fetch_add(1, Ordering::SeqCst) + 1;
                committed.alerts.push(Alert::from_new(id, alert));
            }
        }

        drop(guard);
        Ok(())
    }
}
