//! Run results and the JSON result file

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::HarnessResult;
use crate::executor::{FailureDetail, StepRecord, StepStatus};

/// File name of the result file inside the output directory.
pub const RESULTS_FILE: &str = "test-results.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub group: String,
    pub name: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    /// Context the scenario ran in; absent when it never got one.
    #[serde(default)]
    pub context_id: Option<String>,
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub failure: Option<FailureDetail>,
}

impl ScenarioOutcome {
    /// Derive the status from step records: any failed step fails the
    /// scenario.
    pub fn from_steps(group: &str, name: &str, steps: Vec<StepRecord>, duration_ms: u64) -> Self {
        let failure = steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .and_then(|s| s.failure.clone());
        Self {
            group: group.to_string(),
            name: name.to_string(),
            status: if failure.is_some() {
                ScenarioStatus::Failed
            } else {
                ScenarioStatus::Passed
            },
            duration_ms,
            context_id: None,
            steps,
            failure,
        }
    }

    pub fn skipped(group: &str, name: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
            status: ScenarioStatus::Skipped,
            duration_ms: 0,
            context_id: None,
            steps: Vec::new(),
            failure: None,
        }
    }

    /// A scenario that failed before any step ran.
    pub fn failed(group: &str, name: &str, failure: FailureDetail) -> Self {
        Self {
            status: ScenarioStatus::Failed,
            failure: Some(failure),
            ..Self::skipped(group, name)
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} / {}", self.group, self.name)
    }
}

/// Where the run first went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstFailure {
    pub scenario: String,
    pub detail: FailureDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub first_failure: Option<FirstFailure>,
}

impl Summary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub scenarios: Vec<ScenarioOutcome>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 0,
            scenarios: Vec::new(),
        }
    }

    /// Record one scenario outcome. Outcomes keep the order they were
    /// recorded in.
    pub fn record(&mut self, outcome: ScenarioOutcome) {
        match outcome.status {
            ScenarioStatus::Passed => info!("✓ {} ({} ms)", outcome.full_name(), outcome.duration_ms),
            ScenarioStatus::Skipped => info!("- {} (skipped)", outcome.full_name()),
            ScenarioStatus::Failed => error!(
                "✗ {} - {}",
                outcome.full_name(),
                outcome
                    .failure
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown error")
            ),
        }
        self.scenarios.push(outcome);
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = ScenarioOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn summarize(&self) -> Summary {
        let count = |status| self.scenarios.iter().filter(|s| s.status == status).count();
        let first_failure = self
            .scenarios
            .iter()
            .find(|s| s.status == ScenarioStatus::Failed)
            .and_then(|s| {
                s.failure.clone().map(|detail| FirstFailure {
                    scenario: s.full_name(),
                    detail,
                })
            });

        Summary {
            total: self.scenarios.len(),
            passed: count(ScenarioStatus::Passed),
            failed: count(ScenarioStatus::Failed),
            skipped: count(ScenarioStatus::Skipped),
            first_failure,
        }
    }

    /// Write `test-results.json` (report plus summary) into `dir`.
    pub fn write_json(&self, dir: &Path) -> HarnessResult<PathBuf> {
        #[derive(Serialize)]
        struct ResultFile<'a> {
            summary: Summary,
            #[serde(flatten)]
            report: &'a RunReport,
        }

        std::fs::create_dir_all(dir)?;

        let path = dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(&ResultFile {
            summary: self.summarize(),
            report: self,
        })?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(message: &str) -> FailureDetail {
        FailureDetail {
            kind: "UrlMismatch".into(),
            step: "assert_url \"/tools/\"".into(),
            locator: None,
            expected: Some("https://aiaxio.com/tools/".into()),
            actual: Some("https://aiaxio.com/".into()),
            message: message.into(),
        }
    }

    #[test]
    fn test_summary_counts_and_first_failure() {
        let mut report = RunReport::new();
        report.record(ScenarioOutcome::from_steps("home", "navbar", vec![], 12));
        report.record(ScenarioOutcome::failed("home", "filters", failure("first")));
        report.record(ScenarioOutcome::skipped("home", "footer"));
        report.record(ScenarioOutcome::failed("home", "newsletter", failure("second")));

        let summary = report.summarize();
        assert_eq!((summary.total, summary.passed, summary.failed, summary.skipped), (4, 1, 2, 1));
        assert!(!summary.success());
        let first = summary.first_failure.unwrap();
        assert_eq!(first.scenario, "home / filters");
        assert_eq!(first.detail.message, "first");
    }

    #[test]
    fn test_empty_run_is_success() {
        let summary = RunReport::new().summarize();
        assert_eq!(summary.total, 0);
        assert!(summary.success());
        assert!(summary.first_failure.is_none());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new();
        report.record(ScenarioOutcome::failed("home", "filters", failure("boom")));

        let path = report.write_json(&dir.path().join("out")).unwrap();
        assert!(path.ends_with(RESULTS_FILE));

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["run_id"], report.run_id.to_string());
        assert_eq!(value["scenarios"][0]["status"], "failed");
        assert_eq!(value["scenarios"][0]["failure"]["actual"], "https://aiaxio.com/");
    }
}
