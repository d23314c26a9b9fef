use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::driver::{ImportDriver, ImportKind};
use crate::session::{run_session, SessionPlan};

/// Sessions, page size and pacing a scheduled run walks through.
#[derive(Debug, Clone)]
pub struct ScheduledImport {
    pub sessions: Vec<u32>,
    pub page_size: u32,
    pub delay: Duration,
}

impl ScheduledImport {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            sessions: config.sessions.clone(),
            page_size: config.page_size,
            delay: config.page_delay(),
        }
    }

    /// Legislators first so the speech pass can link names.
    pub async fn run(&self, driver: &ImportDriver) {
        for &session in &self.sessions {
            for kind in [ImportKind::Legislators, ImportKind::Speeches] {
                let summary = run_session(
                    driver,
                    SessionPlan {
                        kind,
                        session,
                        start: 1,
                        page_size: self.page_size,
                        delay: self.delay,
                        max_pages: None,
                    },
                )
                .await;
                if !summary.done {
                    warn!(session, %kind, resume_from = ?summary.resume_from, "scheduled import incomplete");
                }
            }
        }
        match driver.store().link_unmatched_speeches().await {
            Ok(linked) => info!(linked, "scheduled relink finished"),
            Err(err) => warn!(error = %err, "scheduled relink failed"),
        }
    }
}

/// `None` unless the scheduler is enabled in `config`.
pub async fn maybe_build_scheduler(config: &SyncConfig, driver: Arc<ImportDriver>) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let import = Arc::new(ScheduledImport::from_config(config));
    let cron = config.sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let driver = Arc::clone(&driver);
        let import = Arc::clone(&import);
        Box::pin(async move {
            info!(sessions = ?import.sessions, "scheduled import triggered");
            import.run(&driver).await;
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dwatch_adapters::FixtureRecordSource;
    use dwatch_storage::MemoryStore;

    use super::*;
    use crate::config::ClassificationRules;

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let config = SyncConfig::from_lookup(|_| None);
        let driver = Arc::new(ImportDriver::new(
            Arc::new(FixtureRecordSource::new("unused")),
            Arc::new(MemoryStore::new()),
            Arc::new(ClassificationRules::default()),
        ));
        assert!(maybe_build_scheduler(&config, driver).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scheduled_run_imports_and_links_every_session() {
        let store = Arc::new(MemoryStore::new());
        let driver = ImportDriver::new(
            Arc::new(FixtureRecordSource::new(
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/kokkai"),
            )),
            store.clone(),
            Arc::new(ClassificationRules::default()),
        );
        let import = ScheduledImport {
            sessions: vec![215, 999],
            page_size: 5,
            delay: Duration::ZERO,
        };
        import.run(&driver).await;

        assert_eq!(store.legislators().await.len(), 3);
        let speeches = store.speeches().await;
        assert_eq!(speeches.len(), 5);
        assert_eq!(speeches.iter().filter(|s| s.legislator_id.is_some()).count(), 4);
    }
}
