// Health: composite report, recomputed on every call; sub-check errors are reported, never returned

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sysinfo::{Disks, System};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, HealthThresholds};
use crate::db::RelationalStore;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Ordered by severity so the overall status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub memory_total_bytes: u64,
    pub memory_available_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_available_bytes: u64,
    pub uptime_secs: u64,
}

impl SystemSnapshot {
    fn memory_used_percent(&self) -> f32 {
        used_percent(self.memory_total_bytes, self.memory_available_bytes)
    }

    fn disk_used_percent(&self) -> f32 {
        used_percent(self.disk_total_bytes, self.disk_available_bytes)
    }

    fn disk_free_gb(&self) -> f64 {
        self.disk_available_bytes as f64 / BYTES_PER_GB
    }
}

fn used_percent(total: u64, available: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (total.saturating_sub(available) as f64 / total as f64 * 100.0) as f32
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Disk figures are for the volume holding `storage_path`.
    async fn snapshot(&self, storage_path: &Path) -> Result<SystemSnapshot>;
}

pub struct SysinfoProbe;

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn snapshot(&self, storage_path: &Path) -> Result<SystemSnapshot> {
        // CPU usage is a delta between two refreshes
        let sys = tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            sys.refresh_cpu();
            sys
        })
        .await?;
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let storage_path = storage_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_snapshot(sys, &storage_path)).await?
    }
}

fn read_snapshot(mut sys: System, storage_path: &Path) -> Result<SystemSnapshot> {
    sys.refresh_cpu();
    sys.refresh_memory();

    let target = std::fs::canonicalize(storage_path).unwrap_or_else(|_| PathBuf::from("/"));
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .ok_or_else(|| anyhow!("no mounted disk found for {}", target.display()))?;

    Ok(SystemSnapshot {
        cpu_percent: sys.global_cpu_info().cpu_usage(),
        cpu_count: sys.cpus().len(),
        memory_total_bytes: sys.total_memory(),
        memory_available_bytes: sys.available_memory(),
        disk_total_bytes: disk.total_space(),
        disk_available_bytes: disk.available_space(),
        uptime_secs: System::uptime(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemCheck {
    pub status: HealthStatus,
    pub cpu_percent: f32,
    pub memory_used_percent: f32,
    pub disk_used_percent: f32,
    pub disk_free_gb: f64,
    pub uptime_hours: f64,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseCheck {
    pub status: HealthStatus,
    pub storage_path: String,
    pub path_exists: bool,
    pub path_writable: bool,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationalCheck {
    pub status: HealthStatus,
    pub reachable: bool,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiCheck {
    pub status: HealthStatus,
    pub workers: usize,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ComponentCheck {
    System(SystemCheck),
    Database(DatabaseCheck),
    Relational(RelationalCheck),
    Api(ApiCheck),
}

impl ComponentCheck {
    pub fn status(&self) -> HealthStatus {
        match self {
            ComponentCheck::System(check) => check.status,
            ComponentCheck::Database(check) => check.status,
            ComponentCheck::Relational(check) => check.status,
            ComponentCheck::Api(check) => check.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, ComponentCheck>,
    pub environment: String,
    pub version: String,
}

/// `unhealthy` if any check is, else `degraded` if any check is, else `healthy`.
pub fn aggregate<I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
}

pub fn classify_system(snapshot: &SystemSnapshot, thresholds: &HealthThresholds) -> HealthStatus {
    let peak = snapshot
        .cpu_percent
        .max(snapshot.memory_used_percent())
        .max(snapshot.disk_used_percent());

    if peak >= thresholds.critical_percent {
        HealthStatus::Unhealthy
    } else if peak >= thresholds.degraded_percent || snapshot.disk_free_gb() < thresholds.min_free_disk_gb {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub struct HealthChecker {
    probe: Arc<dyn SystemProbe>,
    thresholds: HealthThresholds,
    storage_path: PathBuf,
    relational: RelationalStore,
    environment: String,
    workers: usize,
    version: String,
}

impl HealthChecker {
    pub fn new(
        config: &Config,
        probe: Arc<dyn SystemProbe>,
        relational: RelationalStore,
    ) -> Self {
        info!(
            "Health checker ready (v{}, environment {})",
            env!("CARGO_PKG_VERSION"),
            config.environment
        );
        Self {
            probe,
            thresholds: config.health,
            storage_path: PathBuf::from(&config.vector_store_path),
            relational,
            environment: config.environment.clone(),
            workers: config.workers,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub async fn check(&self) -> HealthReport {
        let (system, database, relational) = tokio::join!(
            self.check_system(),
            self.check_database(),
            self.check_relational()
        );

        let mut checks = BTreeMap::new();
        checks.insert("system".to_string(), ComponentCheck::System(system));
        checks.insert("database".to_string(), ComponentCheck::Database(database));
        if let Some(relational) = relational {
            checks.insert("relational".to_string(), ComponentCheck::Relational(relational));
        }
        checks.insert("api".to_string(), ComponentCheck::Api(self.check_api()));

        let overall_status = aggregate(checks.values().map(ComponentCheck::status));
        info!(?overall_status, "health check completed");

        HealthReport {
            overall_status,
            timestamp: Utc::now(),
            checks,
            environment: self.environment.clone(),
            version: self.version.clone(),
        }
    }

    async fn check_system(&self) -> SystemCheck {
        match self.probe.snapshot(&self.storage_path).await {
            Ok(snapshot) => {
                let status = classify_system(&snapshot, &self.thresholds);
                info!(
                    ?status,
                    cpu = snapshot.cpu_percent,
                    memory = snapshot.memory_used_percent(),
                    disk = snapshot.disk_used_percent(),
                    "system check"
                );
                SystemCheck {
                    status,
                    cpu_percent: snapshot.cpu_percent,
                    memory_used_percent: snapshot.memory_used_percent(),
                    disk_used_percent: snapshot.disk_used_percent(),
                    disk_free_gb: round2(snapshot.disk_free_gb()),
                    uptime_hours: round2(snapshot.uptime_secs as f64 / 3600.0),
                    details: json!({
                        "total_memory_gb": round2(snapshot.memory_total_bytes as f64 / BYTES_PER_GB),
                        "available_memory_gb": round2(snapshot.memory_available_bytes as f64 / BYTES_PER_GB),
                        "total_disk_gb": round2(snapshot.disk_total_bytes as f64 / BYTES_PER_GB),
                        "cpu_count": snapshot.cpu_count,
                    }),
                }
            }
            Err(err) => {
                warn!(error = %err, "system check failed");
                SystemCheck {
                    status: HealthStatus::Unhealthy,
                    cpu_percent: 0.0,
                    memory_used_percent: 0.0,
                    disk_used_percent: 0.0,
                    disk_free_gb: 0.0,
                    uptime_hours: 0.0,
                    details: json!({ "error": err.to_string() }),
                }
            }
        }
    }

    async fn check_database(&self) -> DatabaseCheck {
        let path = &self.storage_path;
        let metadata = tokio::fs::metadata(path).await.ok();
        let path_exists = metadata.is_some();
        let is_directory = metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false);
        let path_writable = is_directory && probe_writable(path).await;

        let last_modified = metadata
            .and_then(|m| m.modified().ok())
            .map(|time| DateTime::<Utc>::from(time).to_rfc3339());

        let status = if path_exists && path_writable {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        info!(?status, path = %path.display(), path_exists, path_writable, "database check");

        DatabaseCheck {
            status,
            storage_path: path.display().to_string(),
            path_exists,
            path_writable,
            details: json!({
                "is_directory": is_directory,
                "last_modified": last_modified,
            }),
        }
    }

    async fn check_relational(&self) -> Option<RelationalCheck> {
        let log = match &self.relational {
            RelationalStore::Disabled => return None,
            RelationalStore::Unavailable(reason) => {
                return Some(RelationalCheck {
                    status: HealthStatus::Degraded,
                    reachable: false,
                    details: json!({ "error": reason }),
                })
            }
            RelationalStore::Ready(log) => log,
        };
        let check = match log.ping().await {
            Ok(()) => RelationalCheck {
                status: HealthStatus::Healthy,
                reachable: true,
                details: json!({}),
            },
            Err(err) => {
                warn!(error = %err, "relational store unreachable");
                RelationalCheck {
                    status: HealthStatus::Degraded,
                    reachable: false,
                    details: json!({ "error": err.to_string() }),
                }
            }
        };
        Some(check)
    }

    fn check_api(&self) -> ApiCheck {
        ApiCheck {
            status: HealthStatus::Healthy,
            workers: self.workers,
            environment: self.environment.clone(),
        }
    }
}

/// Creates and removes a probe file inside `dir`.
async fn probe_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".health-probe-{}", Uuid::new_v4()));
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            true
        }
        Err(_) => false,
    }
}
