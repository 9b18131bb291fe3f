//! `flowprobe check`: validate suites without running them

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use flowprobe::ScenarioGroup;

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct CheckArgs {
    /// Suite file or directory of suites
    #[arg(default_value = "suites", env = "FLOWPROBE_SUITES")]
    pub suites: PathBuf,
}

#[derive(Serialize)]
struct GroupCheck {
    group: String,
    source: String,
    scenarios: usize,
    steps: usize,
    skipped: usize,
}

impl From<&ScenarioGroup> for GroupCheck {
    fn from(group: &ScenarioGroup) -> Self {
        Self {
            group: group.name.clone(),
            source: group
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            scenarios: group.scenarios.len(),
            steps: group.scenarios.iter().map(|s| s.compile().len()).sum(),
            skipped: group.scenarios.iter().filter(|s| s.skip).count(),
        }
    }
}

impl TableDisplay for GroupCheck {
    fn headers() -> Vec<&'static str> {
        vec!["Group", "Source", "Scenarios", "Steps", "Skipped"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.group.clone(),
            self.source.clone(),
            self.scenarios.to_string(),
            self.steps.to_string(),
            self.skipped.to_string(),
        ]
    }
}

/// Loading validates every group and rejects duplicate group names; any
/// error surfaces as a harness error.
pub fn execute(args: CheckArgs, format: OutputFormat) -> Result<i32> {
    let groups = super::select_groups(&args.suites, None, None)?;

    let rows: Vec<GroupCheck> = groups.iter().map(GroupCheck::from).collect();
    print_list(&rows, format);
    print_success(&format!("{} group(s) valid", groups.len()));
    let skipped: usize = rows.iter().map(|r| r.skipped).sum();
    if skipped > 0 {
        print_warning(&format!("{} scenario(s) marked skip", skipped));
    }
    Ok(0)
}
