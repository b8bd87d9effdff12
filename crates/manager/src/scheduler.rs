use crate::metrics;
use crate::orchestrator::LifecycleOrchestrator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use ssl_manager_common::{DomainRecord, DomainStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalDecision {
    Renew,
    Skip(&'static str),
}

/// 到期判断：`now >= valid_to - threshold` 时续期；没有证书的域名立即到期
pub fn renewal_decision(
    record: &DomainRecord,
    now: DateTime<Utc>,
    threshold: chrono::Duration,
) -> RenewalDecision {
    match record.domain.status {
        DomainStatus::Deleted => return RenewalDecision::Skip("deleted"),
        DomainStatus::Pending => return RenewalDecision::Skip("registration in flight"),
        DomainStatus::Active | DomainStatus::RenewalFailed => {}
    }
    if !record.domain.auto_renew {
        return RenewalDecision::Skip("auto renew disabled");
    }
    match record.cert_valid_to() {
        Some(valid_to) if now < valid_to - threshold => RenewalDecision::Skip("not yet due"),
        _ => RenewalDecision::Renew,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub examined: usize,
    pub renewed: usize,
    pub failed: usize,
    pub reload_failed: usize,
    pub skipped: usize,
}

/// 周期扫描并续期；同一时刻最多一次扫描在执行
pub struct RenewalScheduler {
    orchestrator: Arc<LifecycleOrchestrator>,
    interval: Duration,
    threshold: chrono::Duration,
    scan_lock: Arc<Mutex<()>>,
}

impl RenewalScheduler {
    pub fn new(
        orchestrator: Arc<LifecycleOrchestrator>,
        interval: Duration,
        threshold: chrono::Duration,
    ) -> Self {
        Self {
            orchestrator,
            interval,
            threshold,
            scan_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 已有扫描在执行时返回 `None`
    pub async fn run_scan(&self, now: DateTime<Utc>) -> Option<ScanReport> {
        let Ok(_scan) = self.scan_lock.try_lock() else {
            warn!("Renewal scan already in progress, skipping");
            return None;
        };
        Some(self.scan(now).await)
    }

    /// 后台触发一次扫描；已有扫描时返回 false
    pub fn trigger(self: &Arc<Self>) -> bool {
        let Ok(guard) = self.scan_lock.clone().try_lock_owned() else {
            return false;
        };
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let _scan = guard;
            scheduler.scan(Utc::now()).await;
        });
        true
    }

    async fn scan(&self, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();
        let records = match self.orchestrator.list_domains().await {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "Renewal scan could not list domains");
                return report;
            }
        };
        let actor = self.orchestrator.system_actor().to_string();

        // 顺序处理，避免触发签发方限流
        for record in records {
            report.examined += 1;
            if let RenewalDecision::Skip(reason) = renewal_decision(&record, now, self.threshold) {
                debug!(domain = %record.name(), reason, "Skipping renewal");
                report.skipped += 1;
                continue;
            }

            match self.orchestrator.renew_domain(&record, &actor).await {
                Ok(()) => {
                    report.renewed += 1;
                    metrics::record_renewal("renewed");
                }
                Err(err) if err.is_partial_success() => {
                    report.reload_failed += 1;
                    metrics::record_renewal("reload_failed");
                    warn!(domain = %record.name(), error = %err, "Renewed but reload failed");
                }
                Err(err) => {
                    report.failed += 1;
                    metrics::record_renewal("failed");
                    warn!(domain = %record.name(), error = %err, "Renewal failed");
                    if let Err(record_err) = self
                        .orchestrator
                        .record_renewal_failure(record.id(), &err, &actor)
                        .await
                    {
                        metrics::inc_event_write_failure();
                        error!(
                            domain = %record.name(),
                            error = %record_err,
                            "Failed to record renewal failure"
                        );
                    }
                }
            }
        }

        info!(
            examined = report.examined,
            renewed = report.renewed,
            failed = report.failed,
            reload_failed = report.reload_failed,
            skipped = report.skipped,
            "Renewal scan finished"
        );
        report
    }

    /// 启动后台循环，`shutdown` 置为 true 或发送端关闭时退出
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "Renewal scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_scan(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Renewal scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
