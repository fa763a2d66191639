//! Last-run metadata per entity type (`INDEX_META_PATH`)

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reindex_core::{EntityType, RunReport, TransactionKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub transaction_key: TransactionKey,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages: usize,
    pub documents: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    #[serde(default)]
    pub entities: BTreeMap<EntityType, LastRun>,
}

impl IndexMeta {
    /// Read the metadata file; a missing file is an empty record.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Write to `path` via a sibling `.tmp` file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize index meta")?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", Path::new(&tmp).display()))?;
        std::fs::rename(&tmp, path).with_context(|| {
            format!(
                "failed to rename {} → {}",
                Path::new(&tmp).display(),
                path.display()
            )
        })?;
        Ok(())
    }

    pub fn record(&mut self, report: &RunReport) {
        self.entities.insert(
            report.entity,
            LastRun {
                transaction_key: report.transaction_key,
                started_at: report.started_at,
                finished_at: report.finished_at.unwrap_or_else(Utc::now),
                pages: report.tally.pages,
                documents: report.tally.written,
            },
        );
    }

    pub fn last_started(&self, entity: EntityType) -> Option<DateTime<Utc>> {
        self.entities.get(&entity).map(|run| run.started_at)
    }
}

/// Record a finished run, warning instead of failing the run on I/O errors.
pub fn record_run(path: &Path, report: &RunReport) {
    let result = IndexMeta::load(path).and_then(|mut meta| {
        meta.record(report);
        meta.save(path)
    });
    match result {
        Ok(()) => log::debug!("{}: recorded run in {}", report.entity, path.display()),
        Err(e) => log::warn!("{}: could not record run: {e:#}", report.entity),
    }
}
