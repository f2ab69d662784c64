use anyhow::{bail, Context};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::cache_manager::CacheManager;
use super::types::{WarmupReport, WarmupStatus};
use crate::utils::{log_info, log_warn};

/// A named zero-argument job that fills the cache at startup
pub struct Preloader {
    name: String,
    job: Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>,
}

impl Preloader {
    pub fn new<F, Fut>(name: impl Into<String>, job: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            job: Box::new(move || job().boxed()),
        }
    }

    /// Preloader that writes every entry of a JSON seed file through `manager`
    pub fn from_seed_file(manager: Arc<CacheManager>, path: PathBuf) -> Self {
        let name = format!("seed:{}", path.display());
        Self::new(name, move || load_seed_file(manager, path))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One record of a seed file: `[{"key": ..., "value": ..., "ttl_secs": ..., "tags": [...]}]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub key: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

async fn load_seed_file(manager: Arc<CacheManager>, path: PathBuf) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let entries: Vec<SeedEntry> = serde_json::from_str(&text)
        .with_context(|| format!("parsing seed file {}", path.display()))?;

    let mut unencodable = 0;
    for entry in &entries {
        let ttl = entry.ttl_secs.map(Duration::from_secs);
        let stored = manager
            .set(&entry.key, &entry.value, ttl, &entry.tags)
            .await
            .with_context(|| format!("seeding '{}'", entry.key))?;
        if !stored {
            unencodable += 1;
        }
    }

    if unencodable > 0 {
        bail!("{} of {} seed entries could not be encoded", unencodable, entries.len());
    }
    Ok(())
}

impl std::fmt::Debug for Preloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preloader").field("name", &self.name).finish()
    }
}

impl CacheManager {
    /// Run every preloader concurrently. A no-op when warming is disabled.
    pub async fn warm(&self, preloaders: Vec<Preloader>) -> WarmupReport {
        if !self.config().warming_enabled {
            return WarmupReport {
                status: WarmupStatus::WarmingDisabled,
                succeeded: Vec::new(),
                failed: Vec::new(),
            };
        }

        let runs = preloaders.into_iter().map(|preloader| {
            let Preloader { name, job } = preloader;
            async move { (name, job().await) }
        });

        let mut report = WarmupReport {
            status: WarmupStatus::Completed,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (name, outcome) in join_all(runs).await {
            match outcome {
                Ok(()) => report.succeeded.push(name),
                Err(e) => {
                    log_warn("warm", format!("preloader '{}' failed: {:#}", name, e));
                    report.failed.push((name, format!("{:#}", e)));
                }
            }
        }

        log_info(
            "warm",
            format!(
                "{} preloaders succeeded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            ),
        );
        report
    }
}
