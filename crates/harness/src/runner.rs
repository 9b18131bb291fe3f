//! Scenario runner
//!
//! Owns the browsing-context lifecycle of each group:
//!
//! ```text
//! Idle -> ContextOpen -> ScenarioRunning -> ScenarioComplete -> ContextClosed
//!                              ^                  |
//!                              +------------------+
//! ```
//!
//! Scenarios of a group share one context and page, passed down by `&mut`.
//! Each scenario starts with a reset navigation to the group's base URL and
//! runs under its own timeout. A timeout tears the context down and the
//! next scenario gets a fresh one. The context is closed on every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::driver::{Context, ContextOptions, Driver, Page};
use crate::error::{HarnessError, HarnessResult};
use crate::executor::{FailureDetail, StepExecutor, StepRecord};
use crate::report::{RunReport, ScenarioOutcome};
use crate::step::Step;
use crate::suite::{Scenario, ScenarioGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    ContextOpen,
    ScenarioRunning,
    ScenarioComplete,
    ContextClosed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Idle => "Idle",
            RunnerState::ContextOpen => "ContextOpen",
            RunnerState::ScenarioRunning => "ScenarioRunning",
            RunnerState::ScenarioComplete => "ScenarioComplete",
            RunnerState::ContextClosed => "ContextClosed",
        };
        f.write_str(name)
    }
}

/// Tracks one context's lifecycle and rejects out-of-order moves.
#[derive(Debug)]
pub struct Lifecycle {
    state: RunnerState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn advance(&mut self, to: RunnerState) -> HarnessResult<()> {
        use RunnerState::*;

        let allowed = matches!(
            (self.state, to),
            (Idle, ContextOpen)
                | (ContextOpen, ScenarioRunning)
                | (ContextOpen, ContextClosed)
                | (ScenarioRunning, ScenarioComplete)
                | (ScenarioComplete, ScenarioRunning)
                | (ScenarioComplete, ContextClosed)
        );
        if !allowed {
            return Err(HarnessError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

/// An open context with its single page.
struct Session {
    context: Box<dyn Context>,
    page: Box<dyn Page>,
    lifecycle: Lifecycle,
}

/// Runs scenario groups against a driver.
pub struct ScenarioRunner {
    driver: Arc<dyn Driver>,
    config: HarnessConfig,
}

impl ScenarioRunner {
    pub fn new(driver: Arc<dyn Driver>, config: HarnessConfig) -> Self {
        Self { driver, config }
    }

    /// Run every group. Groups run `jobs` at a time; outcomes are recorded
    /// in declaration order regardless.
    pub async fn run(&self, groups: &[ScenarioGroup]) -> HarnessResult<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::new();

        let scenarios: usize = groups.iter().map(|g| g.scenarios.len()).sum();
        info!(
            "Running {} scenario(s) in {} group(s), {} job(s)...",
            scenarios,
            groups.len(),
            self.config.jobs
        );

        let mut results = stream::iter(groups.iter().map(|group| self.run_group(group)))
            .buffered(self.config.jobs.max(1));
        while let Some(outcomes) = results.next().await {
            report.extend(outcomes?);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        let summary = report.summarize();
        info!("");
        info!(
            "Results: {} passed, {} failed, {} skipped ({} ms)",
            summary.passed, summary.failed, summary.skipped, report.duration_ms
        );
        Ok(report)
    }

    /// Run one group, always closing every context it opened.
    pub async fn run_group(&self, group: &ScenarioGroup) -> HarnessResult<Vec<ScenarioOutcome>> {
        info!("Group {} ({})", group.name, group.base_url);
        let options = ContextOptions {
            viewport: group.viewport,
        };
        let mut outcomes = Vec::with_capacity(group.scenarios.len());

        let needs_shared = group.scenarios.iter().any(|s| s.shared_context && !s.skip);
        let mut shared = None;
        if needs_shared {
            match self.open_session(&options).await {
                Ok(session) => shared = Some(session),
                Err(e) => {
                    error!("Could not open context for {}: {}", group.name, e);
                    let failure = FailureDetail::outside_step("open context", &e);
                    for scenario in &group.scenarios {
                        outcomes.push(if scenario.skip {
                            ScenarioOutcome::skipped(&group.name, &scenario.name)
                        } else {
                            ScenarioOutcome::failed(&group.name, &scenario.name, failure.clone())
                        });
                    }
                    return Ok(outcomes);
                }
            }
        }

        let result = self.run_scenarios(group, &options, &mut shared, &mut outcomes).await;
        if let Some(session) = shared {
            self.close_session(session).await?;
        }
        result.map(|()| outcomes)
    }

    /// A timed-out scenario tears its shared context down; the next shared
    /// scenario opens a fresh one. If that fails, the rest of the group's
    /// shared scenarios fail with the driver error.
    async fn run_scenarios(
        &self,
        group: &ScenarioGroup,
        options: &ContextOptions,
        shared: &mut Option<Session>,
        outcomes: &mut Vec<ScenarioOutcome>,
    ) -> HarnessResult<()> {
        let mut torn_down = false;
        let mut reopen_failure: Option<FailureDetail> = None;

        for scenario in &group.scenarios {
            if scenario.skip {
                outcomes.push(ScenarioOutcome::skipped(&group.name, &scenario.name));
                continue;
            }
            if !scenario.shared_context {
                outcomes.push(self.run_dedicated(group, scenario, options).await?);
                continue;
            }
            if let Some(failure) = &reopen_failure {
                outcomes.push(ScenarioOutcome::failed(&group.name, &scenario.name, failure.clone()));
                continue;
            }

            if torn_down {
                match self.open_session(options).await {
                    Ok(session) => *shared = Some(session),
                    Err(e) => {
                        error!("Could not reopen context for {}: {}", group.name, e);
                        let failure = FailureDetail::outside_step("reopen context", &e);
                        outcomes.push(ScenarioOutcome::failed(&group.name, &scenario.name, failure.clone()));
                        reopen_failure = Some(failure);
                        continue;
                    }
                }
                torn_down = false;
            }

            let Some(session) = shared.as_mut() else {
                outcomes.push(self.run_dedicated(group, scenario, options).await?);
                continue;
            };
            let (outcome, timed_out) = self.run_scenario(group, scenario, session).await?;
            outcomes.push(outcome);

            if timed_out {
                if let Some(stale) = shared.take() {
                    warn!("Tearing down context {} after timeout", stale.context.id());
                    self.close_session(stale).await?;
                }
                torn_down = true;
            }
        }
        Ok(())
    }

    /// A scenario that asked for a context of its own.
    async fn run_dedicated(
        &self,
        group: &ScenarioGroup,
        scenario: &Scenario,
        options: &ContextOptions,
    ) -> HarnessResult<ScenarioOutcome> {
        let mut session = match self.open_session(options).await {
            Ok(session) => session,
            Err(e) => {
                error!("Could not open context for {}: {}", scenario.name, e);
                let failure = FailureDetail::outside_step("open context", &e);
                return Ok(ScenarioOutcome::failed(&group.name, &scenario.name, failure));
            }
        };
        let outcome = self.run_scenario(group, scenario, &mut session).await;
        self.close_session(session).await?;
        outcome.map(|(outcome, _)| outcome)
    }

    /// Returns the outcome and whether the scenario hit its timeout.
    async fn run_scenario(
        &self,
        group: &ScenarioGroup,
        scenario: &Scenario,
        session: &mut Session,
    ) -> HarnessResult<(ScenarioOutcome, bool)> {
        session.lifecycle.advance(RunnerState::ScenarioRunning)?;
        debug!("Running scenario: {}", scenario.name);

        let timeout = group
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.scenario_timeout());

        // Reset: every scenario starts from the group's base URL.
        let mut steps = vec![Step::Navigate { url: "/".to_string() }];
        steps.extend(scenario.compile());

        let start = Instant::now();
        let mut records = Vec::with_capacity(steps.len());
        let mut executor = StepExecutor::new(session.page.as_mut(), &group.base_url, &self.config);
        let finished = tokio::time::timeout(timeout, executor.execute_into(&steps, &mut records))
            .await
            .is_ok();

        if !finished {
            let err = HarnessError::ScenarioTimeout {
                timeout_ms: timeout.as_millis() as u64,
            };
            error!("Scenario {} timed out after {} ms", scenario.name, timeout.as_millis());
            let done = records.len();
            if let Some(step) = steps.get(done) {
                let elapsed: u64 = records.iter().map(|r| r.duration_ms).sum();
                let in_flight = (start.elapsed().as_millis() as u64).saturating_sub(elapsed);
                records.push(StepRecord::failed(done, step, &err, in_flight));
            }
            for (index, step) in steps.iter().enumerate().skip(done + 1) {
                records.push(StepRecord::skipped(index, step));
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut outcome = ScenarioOutcome::from_steps(&group.name, &scenario.name, records, duration_ms);
        outcome.context_id = Some(session.context.id().to_string());

        session.lifecycle.advance(RunnerState::ScenarioComplete)?;
        Ok((outcome, !finished))
    }

    async fn open_session(&self, options: &ContextOptions) -> HarnessResult<Session> {
        let mut lifecycle = Lifecycle::new();
        let mut context = self.driver.new_context(options).await?;
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close) = context.close().await {
                    warn!("Closing context after failed page open: {}", close);
                }
                return Err(e);
            }
        };
        lifecycle.advance(RunnerState::ContextOpen)?;
        debug!("Opened context {}", context.id());
        Ok(Session {
            context,
            page,
            lifecycle,
        })
    }

    /// Close a session. Driver errors here are logged, never reported as
    /// a scenario outcome.
    async fn close_session(&self, session: Session) -> HarnessResult<()> {
        let Session {
            context,
            page,
            mut lifecycle,
        } = session;
        drop(page);

        let id = context.id().to_string();
        let transition = lifecycle.advance(RunnerState::ContextClosed);
        match context.close().await {
            Ok(()) => debug!("Closed context {}", id),
            Err(e) => warn!("Closing context {} failed: {}", id, e),
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    use RunnerState::*;

    #[test_case(&[ContextOpen, ScenarioRunning, ScenarioComplete, ContextClosed] ; "single scenario")]
    #[test_case(&[ContextOpen, ScenarioRunning, ScenarioComplete, ScenarioRunning, ScenarioComplete, ContextClosed] ; "two scenarios")]
    #[test_case(&[ContextOpen, ContextClosed] ; "empty group")]
    fn test_legal_lifecycles(path: &[RunnerState]) {
        let mut lifecycle = Lifecycle::new();
        for state in path {
            lifecycle.advance(*state).unwrap();
        }
        assert_eq!(lifecycle.state(), ContextClosed);
    }

    #[test_case(&[ScenarioRunning] ; "run before open")]
    #[test_case(&[ContextOpen, ScenarioRunning, ContextClosed] ; "close mid scenario")]
    #[test_case(&[ContextOpen, ContextClosed, ContextOpen] ; "reopen after close")]
    #[test_case(&[ContextOpen, ContextClosed, ContextClosed] ; "double close")]
    fn test_illegal_lifecycles(path: &[RunnerState]) {
        let mut lifecycle = Lifecycle::new();
        let result = path.iter().try_for_each(|state| lifecycle.advance(*state));
        assert!(matches!(result, Err(HarnessError::InvalidStateTransition { .. })));
    }
}
