mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use flowprobe::driver::{Context, ContextOptions, Driver};
use flowprobe::{
    HarnessConfig, HarnessError, HarnessResult, MemoryDriver, ScenarioRunner, ScenarioStatus,
    StepStatus,
};

const THREE_SCENARIOS: &str = r#"
name: lifecycle
base_url: https://aiaxio.com
scenarios:
  - name: tools link
    steps:
      - action: click
        locator: { test_id: nav-link-Tools }
      - action: assert_url
        expected: /tools/
  - name: heading
    steps:
      - action: assert_visible
        locator: { role: heading, name: New Released }
  - name: search link
    steps:
      - action: click
        locator: { test_id: nav-link-Search }
      - action: assert_url
        expected: /search/
"#;

/// All scenarios of a group run in one context whose identity never
/// changes, and that context is closed exactly once at group end.
#[tokio::test]
async fn group_shares_one_context_closed_once() {
    init_tracing();
    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), fast_config());

    let report = runner.run(&[group(THREE_SCENARIOS)]).await.unwrap();
    assert!(report.summarize().success());

    let log = driver.log();
    assert_eq!(log.contexts_opened.len(), 1);
    assert_eq!(log.contexts_closed, log.contexts_opened);
    let id = &log.contexts_opened[0];
    assert!(log.calls.iter().all(|(ctx, _)| ctx == id));
    assert!(report
        .scenarios
        .iter()
        .all(|s| s.context_id.as_deref() == Some(id.as_str())));
}

/// Each scenario starts from the base URL even when the previous one
/// navigated away.
#[tokio::test]
async fn scenarios_start_from_base_url() {
    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), fast_config());
    runner.run(&[group(THREE_SCENARIOS)]).await.unwrap();

    let gotos: Vec<String> = driver
        .log()
        .calls
        .into_iter()
        .filter(|(_, op)| op.starts_with("goto"))
        .map(|(_, op)| op)
        .collect();
    assert_eq!(gotos, vec!["goto https://aiaxio.com/"; 3]);
}

/// A failing step skips the rest of its scenario but not later scenarios.
#[tokio::test]
async fn failure_skips_remaining_steps_only() {
    let yaml = r#"
name: failing
base_url: https://aiaxio.com
scenarios:
  - name: broken
    steps:
      - action: assert_visible
        locator: { test_id: no-such-element }
      - action: click
        locator: { test_id: nav-link-Tools }
      - action: assert_url
        expected: /tools/
  - name: healthy
    steps:
      - action: assert_title
        expected: { pattern: "AIAXIO", ignore_case: false }
"#;
    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), fast_config());
    let report = runner.run(&[group(yaml)]).await.unwrap();

    let broken = &report.scenarios[0];
    assert_eq!(broken.status, ScenarioStatus::Failed);
    let statuses: Vec<StepStatus> = broken.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Passed, StepStatus::Failed, StepStatus::Skipped, StepStatus::Skipped]
    );
    let failure = broken.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "VisibilityAssertionFailed");
    assert_eq!(failure.locator.as_deref(), Some("test_id=\"no-such-element\""));

    assert_eq!(report.scenarios[1].status, ScenarioStatus::Passed);

    let summary = report.summarize();
    assert_eq!((summary.passed, summary.failed), (1, 1));
    assert_eq!(summary.first_failure.unwrap().scenario, "failing / broken");
    assert_eq!(driver.log().contexts_closed.len(), 1);
}

/// A scenario over its bound fails the in-flight step with a timeout and
/// skips the rest. Its context is torn down and the next scenario runs in
/// a fresh one.
#[tokio::test]
async fn scenario_timeout_cancels_remaining_steps() {
    let yaml = r#"
name: slow
base_url: https://aiaxio.com
timeout_ms: 100
scenarios:
  - name: sleeps
    steps:
      - action: wait
        ms: 5000
      - action: assert_url
        expected: /
  - name: after
    steps:
      - action: assert_url
        expected: /
"#;
    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), fast_config());
    let report = runner.run(&[group(yaml)]).await.unwrap();

    let slow = &report.scenarios[0];
    assert_eq!(slow.status, ScenarioStatus::Failed);
    assert_eq!(slow.steps.len(), 3);
    assert_eq!(slow.steps[0].status, StepStatus::Passed);
    assert_eq!(slow.steps[1].failure.as_ref().unwrap().kind, "ScenarioTimeout");
    assert_eq!(slow.steps[2].status, StepStatus::Skipped);

    let after = &report.scenarios[1];
    assert_eq!(after.status, ScenarioStatus::Passed);
    assert_ne!(slow.context_id, after.context_id);

    let log = driver.log();
    assert_eq!(log.contexts_opened.len(), 2);
    assert_eq!(log.contexts_closed, log.contexts_opened);
    assert_eq!(slow.context_id.as_deref(), Some(log.contexts_opened[0].as_str()));
    assert_eq!(after.context_id.as_deref(), Some(log.contexts_opened[1].as_str()));
}

/// Hands out one context, then behaves as if the browser died.
struct OneContextOnly {
    inner: Arc<MemoryDriver>,
    opened: AtomicUsize,
}

#[async_trait]
impl Driver for OneContextOnly {
    async fn new_context(&self, options: &ContextOptions) -> HarnessResult<Box<dyn Context>> {
        if self.opened.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(HarnessError::Driver("browser process exited".into()));
        }
        self.inner.new_context(options).await
    }
}

/// When no fresh context can be opened after a timeout, the remaining
/// shared scenarios fail with the driver error instead of reusing the old one.
#[tokio::test]
async fn reopen_failure_after_timeout_fails_rest_of_group() {
    let yaml = r#"
name: slow
base_url: https://aiaxio.com
timeout_ms: 100
scenarios:
  - name: sleeps
    steps:
      - action: wait
        ms: 5000
  - name: second
    steps:
      - action: assert_url
        expected: /
  - name: third
    steps:
      - action: assert_url
        expected: /
"#;
    let inner = memory_driver();
    let driver = Arc::new(OneContextOnly {
        inner: inner.clone(),
        opened: AtomicUsize::new(0),
    });
    let runner = ScenarioRunner::new(driver, fast_config());
    let report = runner.run(&[group(yaml)]).await.unwrap();

    let statuses: Vec<ScenarioStatus> = report.scenarios.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![ScenarioStatus::Failed; 3]);
    assert_eq!(report.scenarios[0].failure.as_ref().unwrap().kind, "ScenarioTimeout");
    for scenario in &report.scenarios[1..] {
        let failure = scenario.failure.as_ref().unwrap();
        assert_eq!(failure.kind, "DriverError");
        assert!(scenario.steps.is_empty());
    }

    let log = inner.log();
    assert_eq!(log.contexts_opened.len(), 1);
    assert_eq!(log.contexts_closed, log.contexts_opened);
}

struct NoBrowser;

#[async_trait]
impl Driver for NoBrowser {
    async fn new_context(&self, _options: &ContextOptions) -> HarnessResult<Box<dyn Context>> {
        Err(HarnessError::Driver("browser process exited".into()))
    }
}

/// If the context cannot be opened, every scenario of the group fails with
/// the driver error; skipped scenarios stay skipped.
#[tokio::test]
async fn context_open_failure_fails_whole_group() {
    let mut suite = group(THREE_SCENARIOS);
    suite.scenarios[1].skip = true;

    let runner = ScenarioRunner::new(Arc::new(NoBrowser), fast_config());
    let report = runner.run(&[suite]).await.unwrap();

    let statuses: Vec<ScenarioStatus> = report.scenarios.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![ScenarioStatus::Failed, ScenarioStatus::Skipped, ScenarioStatus::Failed]
    );
    let failure = report.scenarios[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, "DriverError");
    assert!(failure.message.contains("browser process exited"));
}

/// A crash while closing the context is logged and leaves recorded
/// outcomes untouched.
#[tokio::test]
async fn teardown_error_never_overrides_outcomes() {
    let driver = Arc::new(MemoryDriver::new(aiaxio_site().failing_close()));
    let runner = ScenarioRunner::new(driver.clone(), fast_config());

    let report = runner.run(&[group(THREE_SCENARIOS)]).await.unwrap();
    assert_eq!(report.summarize().passed, 3);
    assert_eq!(driver.log().contexts_closed.len(), 1);
}

/// `shared_context: false` gets a context of its own; `skip` runs nothing.
#[tokio::test]
async fn dedicated_context_and_skip_flags() {
    let mut suite = group(THREE_SCENARIOS);
    suite.scenarios[1].shared_context = false;
    suite.scenarios[2].skip = true;

    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), fast_config());
    let report = runner.run(&[suite]).await.unwrap();

    let log = driver.log();
    assert_eq!(log.contexts_opened.len(), 2);
    assert_eq!(log.contexts_closed.len(), 2);

    let shared = report.scenarios[0].context_id.clone();
    let dedicated = report.scenarios[1].context_id.clone();
    assert!(shared.is_some() && dedicated.is_some());
    assert_ne!(shared, dedicated);

    assert_eq!(report.scenarios[2].status, ScenarioStatus::Skipped);
    assert!(report.scenarios[2].steps.is_empty());
}

/// Groups running concurrently still report in declaration order, each in
/// its own context.
#[tokio::test]
async fn concurrent_groups_keep_declaration_order() {
    let slow = THREE_SCENARIOS.replace("name: lifecycle", "name: slow").replace(
        "  - name: heading\n    steps:\n",
        "  - name: heading\n    steps:\n      - action: wait\n        ms: 50\n",
    );
    let fast = THREE_SCENARIOS.replace("name: lifecycle", "name: fast");

    let config = HarnessConfig {
        jobs: 2,
        ..fast_config()
    };
    let driver = memory_driver();
    let runner = ScenarioRunner::new(driver.clone(), config);
    let report = runner.run(&[group(&slow), group(&fast)]).await.unwrap();

    let groups: Vec<&str> = report.scenarios.iter().map(|s| s.group.as_str()).collect();
    assert_eq!(groups, vec!["slow", "slow", "slow", "fast", "fast", "fast"]);
    assert!(report.summarize().success());

    let log = driver.log();
    assert_eq!(log.contexts_opened.len(), 2);
    assert_eq!(log.contexts_closed.len(), 2);
}

/// Results land in `test-results.json` with the summary alongside.
#[tokio::test]
async fn report_written_to_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScenarioRunner::new(memory_driver(), fast_config());
    let report = runner.run(&[group(THREE_SCENARIOS)]).await.unwrap();

    let path = report.write_json(dir.path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(value["summary"]["total"], 3);
    assert_eq!(value["scenarios"][0]["name"], "tools link");
    assert_eq!(value["scenarios"][0]["steps"][1]["kind"], "click");
}
