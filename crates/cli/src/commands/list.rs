//! `flowprobe list`: show groups and scenarios

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ListArgs {
    /// Suite file or directory of suites
    #[arg(default_value = "suites", env = "FLOWPROBE_SUITES")]
    pub suites: PathBuf,

    /// Only list groups with this tag
    #[arg(long)]
    pub tag: Option<String>,
}

#[derive(Serialize)]
struct ScenarioRow {
    group: String,
    scenario: String,
    steps: usize,
    context: &'static str,
    tags: String,
}

impl TableDisplay for ScenarioRow {
    fn headers() -> Vec<&'static str> {
        vec!["Group", "Scenario", "Steps", "Context", "Tags"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.group.clone(),
            self.scenario.clone(),
            self.steps.to_string(),
            self.context.to_string(),
            self.tags.clone(),
        ]
    }
}

pub fn execute(args: ListArgs, format: OutputFormat) -> Result<i32> {
    let groups = super::select_groups(&args.suites, None, args.tag.as_deref())?;

    let rows: Vec<ScenarioRow> = groups
        .iter()
        .flat_map(|group| {
            group.scenarios.iter().map(move |scenario| ScenarioRow {
                group: group.name.clone(),
                scenario: scenario.name.clone(),
                steps: scenario.compile().len(),
                context: match (scenario.skip, scenario.shared_context) {
                    (true, _) => "skip",
                    (false, true) => "shared",
                    (false, false) => "dedicated",
                },
                tags: group.tags.join(", "),
            })
        })
        .collect();

    print_list(&rows, format);
    Ok(0)
}
