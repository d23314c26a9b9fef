use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::session::SessionSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: String,
    /// `postgres` or `memory` for dry runs.
    pub persistence_mode: String,
    pub sessions: Vec<SessionSummary>,
}

impl ImportRunRecord {
    pub fn new(source: &str, persistence_mode: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            source: source.to_string(),
            persistence_mode: persistence_mode.to_string(),
            sessions: Vec::new(),
        }
    }

    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }
}

pub fn render_brief(run: &ImportRunRecord) -> String {
    let mut lines = vec![
        "# Democracy Watcher Import Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", run.run_id),
        format!("- Started: {}", run.started_at),
        format!("- Finished: {}", run.finished_at),
        format!("- Source: {}", run.source),
        format!("- Persistence: {}", run.persistence_mode),
        String::new(),
        "## Sessions".to_string(),
    ];

    if run.sessions.is_empty() {
        lines.push("- none".to_string());
    }
    for s in &run.sessions {
        let kind = s.kind.map(|k| k.as_str()).unwrap_or("unknown");
        let state = if s.done {
            "done".to_string()
        } else {
            match s.resume_from {
                Some(cursor) => format!("halted, resume at {cursor}"),
                None => "halted".to_string(),
            }
        };
        let mut line = format!(
            "- {} {}: {} pages, {} fetched, inserted {}, updated {}, imported {}, skipped {} ({state})",
            s.session, kind, s.pages, s.fetched, s.inserted, s.updated, s.imported, s.skipped
        );
        if let Some(err) = &s.error {
            line.push_str(&format!(" error: {err}"));
        }
        lines.push(line);
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes `summary.json` and `import_brief.md` under `{root}/{run_id}/`.
pub async fn write_run_report(root: &Path, run: &ImportRunRecord) -> Result<PathBuf> {
    let dir = root.join(run.run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(run).context("serializing import run summary")?;
    fs::write(dir.join("summary.json"), json)
        .await
        .context("writing summary.json")?;
    fs::write(dir.join("import_brief.md"), render_brief(run))
        .await
        .context("writing import_brief.md")?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ImportKind;

    fn sample_run() -> ImportRunRecord {
        let mut run = ImportRunRecord::new("fixture", "memory", Utc::now());
        run.sessions.push(SessionSummary {
            kind: Some(ImportKind::Legislators),
            session: 215,
            pages: 2,
            fetched: 7,
            inserted: 3,
            updated: 1,
            done: true,
            ..Default::default()
        });
        run.sessions.push(SessionSummary {
            kind: Some(ImportKind::Speeches),
            session: 216,
            pages: 1,
            resume_from: Some(101),
            error: Some("http status 503".into()),
            ..Default::default()
        });
        run.finish(Utc::now())
    }

    #[test]
    fn brief_lists_each_session_outcome() {
        let brief = render_brief(&sample_run());
        assert!(brief.starts_with("# Democracy Watcher Import Brief"));
        assert!(brief.contains("- 215 legislators: 2 pages, 7 fetched, inserted 3, updated 1"));
        assert!(brief.contains("(halted, resume at 101) error: http status 503"));
    }

    #[tokio::test]
    async fn report_files_land_under_the_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let run = sample_run();
        let out = write_run_report(dir.path(), &run).await.unwrap();
        assert_eq!(out, dir.path().join(run.run_id.to_string()));

        let summary: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["sessions"].as_array().unwrap().len(), 2);
        assert_eq!(summary["sessions"][0]["kind"], "legislators");
        assert!(out.join("import_brief.md").exists());
    }
}
