//! `flowprobe run`: execute suites and report

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use flowprobe::driver::Browser;
use flowprobe::preflight::check_reachable;
use flowprobe::{
    Driver, HarnessConfig, MemoryDriver, MemorySite, PlaywrightDriver, RunReport, ScenarioGroup,
    ScenarioOutcome, ScenarioRunner, Summary,
};

use crate::output::{print_error, print_list, print_value, status_label, OutputFormat, TableDisplay};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum DriverKind {
    /// Real browser through Playwright
    #[default]
    Playwright,
    /// In-memory site model (dry runs)
    Memory,
}

#[derive(Args)]
pub struct RunArgs {
    /// Suite file or directory of suites
    #[arg(default_value = "suites", env = "FLOWPROBE_SUITES")]
    pub suites: PathBuf,

    /// Only run the group with this name
    #[arg(long)]
    pub group: Option<String>,

    /// Only run groups with this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Groups to run concurrently
    #[arg(long, env = "FLOWPROBE_JOBS")]
    pub jobs: Option<usize>,

    /// Per-scenario timeout, overriding config and suites
    #[arg(long, env = "FLOWPROBE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Base URL, overriding every selected group's
    #[arg(long, env = "FLOWPROBE_BASE_URL")]
    pub base_url: Option<String>,

    /// Browser driver
    #[arg(long, value_enum, default_value = "playwright", env = "FLOWPROBE_DRIVER")]
    pub driver: DriverKind,

    /// Site model for the memory driver
    #[arg(long, env = "FLOWPROBE_SITE")]
    pub site: Option<PathBuf>,

    /// Browser engine: chromium, firefox or webkit
    #[arg(long, env = "FLOWPROBE_BROWSER")]
    pub browser: Option<Browser>,

    /// Run the browser headless (true/false)
    #[arg(long, env = "FLOWPROBE_HEADLESS")]
    pub headless: Option<bool>,

    /// Directory for test-results.json
    #[arg(long, env = "FLOWPROBE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Check that each base URL answers before starting the browser
    #[arg(long)]
    pub preflight: bool,
}

/// One row of the results table
#[derive(Serialize)]
struct OutcomeRow {
    group: String,
    scenario: String,
    status: String,
    duration_ms: u64,
    failure: String,
}

impl From<&ScenarioOutcome> for OutcomeRow {
    fn from(outcome: &ScenarioOutcome) -> Self {
        Self {
            group: outcome.group.clone(),
            scenario: outcome.name.clone(),
            status: status_label(outcome.status),
            duration_ms: outcome.duration_ms,
            failure: outcome
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.kind, f.step))
                .unwrap_or_default(),
        }
    }
}

impl TableDisplay for OutcomeRow {
    fn headers() -> Vec<&'static str> {
        vec!["Group", "Scenario", "Status", "Duration", "Failure"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.group.clone(),
            self.scenario.clone(),
            self.status.clone(),
            format!("{} ms", self.duration_ms),
            self.failure.clone(),
        ]
    }
}

/// Fold CLI overrides into the loaded configuration.
fn apply_overrides(config: &mut HarnessConfig, args: &RunArgs) {
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.scenario_timeout_ms = timeout_ms;
    }
    if let Some(browser) = args.browser {
        config.playwright.browser = browser;
    }
    if let Some(headless) = args.headless {
        config.playwright.headless = headless;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
}

fn apply_group_overrides(groups: &mut [ScenarioGroup], args: &RunArgs) -> Result<()> {
    for group in groups.iter_mut() {
        if let Some(base_url) = &args.base_url {
            group.base_url = base_url.clone();
        }
        if args.timeout_ms.is_some() {
            group.timeout_ms = None;
        }
        group.validate()?;
    }
    Ok(())
}

async fn launch_driver(kind: DriverKind, args: &RunArgs, config: &HarnessConfig) -> Result<Arc<dyn Driver>> {
    Ok(match kind {
        DriverKind::Memory => {
            let site = args
                .site
                .as_ref()
                .ok_or_else(|| anyhow!("--driver memory needs --site <model.yaml>"))?;
            Arc::new(MemoryDriver::new(MemorySite::from_file(site)?))
        }
        DriverKind::Playwright => Arc::new(PlaywrightDriver::launch(config.playwright.clone()).await?),
    })
}

fn print_summary(report: &RunReport, summary: &Summary) {
    println!();
    let counts = format!(
        "{} passed, {} failed, {} skipped ({} total, {} ms)",
        summary.passed, summary.failed, summary.skipped, summary.total, report.duration_ms
    );
    if summary.success() {
        println!("{}", counts.green());
    } else {
        println!("{}", counts.red());
    }

    if let Some(first) = &summary.first_failure {
        println!();
        println!("First failure: {}", first.scenario.bold());
        println!("  Step:     {}", first.detail.step);
        if let Some(locator) = &first.detail.locator {
            println!("  Locator:  {}", locator);
        }
        if let Some(expected) = &first.detail.expected {
            println!("  Expected: {}", expected);
        }
        if let Some(actual) = &first.detail.actual {
            println!("  Actual:   {}", actual);
        }
        println!("  Error:    {}", first.detail.message);
    }
}

/// Returns the process exit code: 0 all passed, 1 any failure.
pub async fn execute(args: RunArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<i32> {
    apply_overrides(&mut config, &args);
    config.validate()?;

    let mut groups = super::select_groups(&args.suites, args.group.as_deref(), args.tag.as_deref())?;
    apply_group_overrides(&mut groups, &args)?;

    if args.preflight {
        let urls: BTreeSet<&str> = groups.iter().map(|g| g.base_url.as_str()).collect();
        for url in urls {
            check_reachable(url, Duration::from_secs(10))
                .await
                .with_context(|| format!("preflight failed for {}", url))?;
        }
    }

    let driver = launch_driver(args.driver, &args, &config).await?;
    let runner = ScenarioRunner::new(driver.clone(), config.clone());

    let result = tokio::select! {
        result = runner.run(&groups) => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };

    if let Err(e) = driver.shutdown().await {
        warn!("Driver shutdown failed: {}", e);
    }
    let report = result?;

    report.write_json(&config.output_dir)?;

    let summary = report.summarize();
    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_value(&report, format),
        OutputFormat::Table | OutputFormat::Plain => {
            let rows: Vec<OutcomeRow> = report.scenarios.iter().map(OutcomeRow::from).collect();
            print_list(&rows, format);
            print_summary(&report, &summary);
        }
    }

    if summary.total == 0 {
        bail!("no scenarios were run");
    }
    if !summary.success() {
        print_error(&format!("{} scenario(s) failed", summary.failed));
        return Ok(1);
    }
    Ok(0)
}
