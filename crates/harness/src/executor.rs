//! Flow step executor
//!
//! Runs a scenario's steps in declared order against one page. The first
//! failing step stops execution; every later step is recorded as skipped.
//! Assertions poll a fresh snapshot until they pass or the assertion
//! timeout runs out, so a check right after a click sees the settled page.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::HarnessConfig;
use crate::driver::{LoadState, Page, PageSnapshot};
use crate::error::{HarnessError, HarnessResult};
use crate::locator::{Locator, TextMatch};
use crate::resolver::{resolve, resolve_one};
use crate::step::{join_url, url_expectation, AttributeAssertion, Step};

/// Bound for the last idle check once a navigation budget is spent.
const IDLE_RECHECK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// What went wrong, in terms a reader of the report can act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Error kind, e.g. `UrlMismatch`
    pub kind: String,
    /// The failing step
    pub step: String,
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub actual: Option<String>,
    pub message: String,
}

impl FailureDetail {
    pub fn new(step: &Step, err: &HarnessError) -> Self {
        let mut detail = Self {
            kind: err.kind().to_string(),
            step: step.describe(),
            locator: step.locator().map(Locator::to_string),
            expected: None,
            actual: None,
            message: err.to_string(),
        };
        match err {
            HarnessError::TextMismatch { expected, actual, .. }
            | HarnessError::UrlMismatch { expected, actual }
            | HarnessError::TitleMismatch { expected, actual } => {
                detail.expected = Some(expected.clone());
                detail.actual = Some(actual.clone());
            }
            HarnessError::AttributeMismatch { expected, actual, .. } => {
                detail.expected = Some(expected.clone());
                detail.actual = Some(actual.clone().unwrap_or_else(|| "<absent>".to_string()));
            }
            HarnessError::VisibilityAssertionFailed { detail: why, .. } => {
                detail.expected = Some("visible".to_string());
                detail.actual = Some(why.clone());
            }
            HarnessError::ElementNotFound { .. } => {
                detail.expected = Some("exactly one match".to_string());
                detail.actual = Some("no match".to_string());
            }
            HarnessError::AmbiguousLocator { count, .. } => {
                detail.expected = Some("exactly one match".to_string());
                detail.actual = Some(format!("{} matches", count));
            }
            _ => {}
        }
        detail
    }

    /// A failure outside any step, e.g. the context failing to open.
    pub fn outside_step(what: &str, err: &HarnessError) -> Self {
        Self {
            kind: err.kind().to_string(),
            step: what.to_string(),
            locator: None,
            expected: None,
            actual: None,
            message: err.to_string(),
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub kind: String,
    pub description: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub failure: Option<FailureDetail>,
    /// Non-fatal remarks (fallback delays, soft idle timeouts, popup URLs)
    #[serde(default)]
    pub note: Option<String>,
}

impl StepRecord {
    fn new(index: usize, step: &Step, status: StepStatus) -> Self {
        Self {
            index,
            kind: step.kind().to_string(),
            description: step.describe(),
            status,
            duration_ms: 0,
            failure: None,
            note: None,
        }
    }

    pub fn skipped(index: usize, step: &Step) -> Self {
        Self::new(index, step, StepStatus::Skipped)
    }

    pub fn failed(index: usize, step: &Step, err: &HarnessError, duration_ms: u64) -> Self {
        Self {
            duration_ms,
            failure: Some(FailureDetail::new(step, err)),
            ..Self::new(index, step, StepStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Probe {
    Url,
    Title,
}

/// Executes steps against a borrowed page.
pub struct StepExecutor<'a> {
    page: &'a mut dyn Page,
    base_url: &'a str,
    config: &'a HarnessConfig,
}

impl<'a> StepExecutor<'a> {
    pub fn new(page: &'a mut dyn Page, base_url: &'a str, config: &'a HarnessConfig) -> Self {
        Self {
            page,
            base_url,
            config,
        }
    }

    /// Execute `steps` and return one record per step.
    pub async fn execute(&mut self, steps: &[Step]) -> Vec<StepRecord> {
        let mut records = Vec::with_capacity(steps.len());
        self.execute_into(steps, &mut records).await;
        records
    }

    /// Like [`Self::execute`], appending to `records` as each step finishes
    /// so a caller that cancels the future still sees completed steps.
    pub async fn execute_into(&mut self, steps: &[Step], records: &mut Vec<StepRecord>) {
        let mut failed = false;

        for (index, step) in steps.iter().enumerate() {
            if failed {
                records.push(StepRecord::skipped(index, step));
                continue;
            }

            debug!("Executing step {}: {}", index, step.describe());
            let start = Instant::now();
            let result = self.execute_step(step, steps.get(index + 1)).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(note) => records.push(StepRecord {
                    duration_ms,
                    note,
                    ..StepRecord::new(index, step, StepStatus::Passed)
                }),
                Err(e) => {
                    error!("Step {} failed: {} - {}", index, step.describe(), e);
                    records.push(StepRecord::failed(index, step, &e, duration_ms));
                    failed = true;
                }
            }
        }
    }

    async fn execute_step(&mut self, step: &Step, next: Option<&Step>) -> HarnessResult<Option<String>> {
        match step {
            Step::Navigate { url } => self.navigate(url).await,
            Step::AssertVisible { locator } => {
                self.assert_visible(locator).await?;
                Ok(None)
            }
            Step::AssertText { locator, expected } => {
                self.assert_label(locator, expected, false).await?;
                Ok(None)
            }
            Step::AssertName { locator, expected } => {
                self.assert_label(locator, expected, true).await?;
                Ok(None)
            }
            Step::AssertAttribute { locator, attribute } => {
                self.assert_attribute(locator, attribute).await?;
                Ok(None)
            }
            Step::AssertTitle { expected } => {
                self.until_value(Probe::Title, expected).await?;
                Ok(None)
            }
            Step::AssertUrl { expected } => {
                // Let a click-triggered navigation commit before reading the URL.
                match self
                    .page
                    .wait_for_load_state(LoadState::Load, self.config.navigation_timeout())
                    .await
                {
                    Ok(()) | Err(HarnessError::IdleUnsupported) => {}
                    Err(e) => return Err(e),
                }
                let expected = url_expectation(self.base_url, expected);
                self.until_value(Probe::Url, &expected).await?;
                Ok(None)
            }
            Step::Click { locator } => {
                let element = self.until(|snapshot| resolve_one(locator, snapshot)).await?;
                let outcome = self.page.click(element).await?;
                if outcome.unclaimed_surfaces > 0 {
                    return Err(HarnessError::UnregisteredSurface {
                        locator: locator.to_string(),
                    });
                }
                Ok(None)
            }
            Step::ClickPopup { locator, expected_url } => {
                self.click_popup(locator, expected_url.as_ref()).await
            }
            Step::Fill { locator, value } => {
                let element = self.until(|snapshot| resolve_one(locator, snapshot)).await?;
                self.page.fill(element, value).await?;
                Ok(None)
            }
            Step::Press { locator, key } => {
                let element = self.until(|snapshot| resolve_one(locator, snapshot)).await?;
                self.page.press(element, key).await?;
                Ok(None)
            }
            Step::WaitForIdle { timeout_ms } => {
                let timeout = Duration::from_millis(*timeout_ms);
                match self.settle(timeout).await {
                    Err(HarnessError::NavigationTimeout { .. })
                        if !next.map(Step::depends_on_navigation).unwrap_or(false) =>
                    {
                        warn!("Network not idle after {} ms; continuing", timeout_ms);
                        Ok(Some(format!("network not idle after {} ms", timeout_ms)))
                    }
                    other => other,
                }
            }
            Step::Wait { ms } => {
                self.page.wait_for_timeout(Duration::from_millis(*ms)).await?;
                Ok(None)
            }
        }
    }

    async fn navigate(&mut self, url: &str) -> HarnessResult<Option<String>> {
        let target = join_url(self.base_url, url);
        let timeout = self.config.navigation_timeout();
        let start = Instant::now();

        self.page.goto(&target, timeout).await?;
        let remaining = timeout.saturating_sub(start.elapsed());
        match self.settle(remaining).await {
            Err(HarnessError::NavigationTimeout { .. }) => Err(HarnessError::NavigationTimeout {
                url: target,
                timeout_ms: timeout.as_millis() as u64,
            }),
            other => other,
        }
    }

    /// Wait for network quiescence within `timeout`, falling back to a fixed
    /// delay when the driver cannot detect idleness.
    async fn settle(&mut self, timeout: Duration) -> HarnessResult<Option<String>> {
        let idle = tokio::time::timeout(
            timeout,
            self.page.wait_for_load_state(LoadState::NetworkIdle, timeout),
        )
        .await;

        match idle {
            Ok(Ok(())) => Ok(None),
            Ok(Err(HarnessError::IdleUnsupported)) => {
                let delay = self.config.fallback_delay();
                self.page.wait_for_timeout(delay).await?;
                Ok(Some(format!(
                    "idle detection unsupported; waited {} ms",
                    delay.as_millis()
                )))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // A spent bound still accepts a page that is idle right now.
                if self
                    .page
                    .wait_for_load_state(LoadState::NetworkIdle, IDLE_RECHECK)
                    .await
                    .is_ok()
                {
                    return Ok(None);
                }
                let url = self.page.url().await.unwrap_or_default();
                Err(HarnessError::NavigationTimeout {
                    url,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Re-snapshot until `check` passes or the assertion timeout expires.
    /// Non-assertion errors end the wait immediately.
    async fn until<T>(
        &mut self,
        mut check: impl FnMut(&PageSnapshot) -> HarnessResult<T>,
    ) -> HarnessResult<T> {
        let deadline = Instant::now() + self.config.assert_timeout();
        loop {
            let snapshot = self.page.snapshot().await?;
            match check(&snapshot) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_assertion() && Instant::now() < deadline => {
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn until_value(&mut self, probe: Probe, expected: &TextMatch) -> HarnessResult<()> {
        let deadline = Instant::now() + self.config.assert_timeout();
        loop {
            let actual = match probe {
                Probe::Url => self.page.url().await?,
                Probe::Title => self.page.title().await?,
            };
            if expected.matches(&actual)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let expected = expected.to_string();
                return Err(match probe {
                    Probe::Url => HarnessError::UrlMismatch { expected, actual },
                    Probe::Title => HarnessError::TitleMismatch { expected, actual },
                });
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    async fn assert_visible(&mut self, locator: &Locator) -> HarnessResult<()> {
        self.until(|snapshot| {
            let matched = resolve(locator, snapshot)?;
            let visible = matched
                .iter()
                .filter(|e| snapshot.get(**e).map(|n| n.visible).unwrap_or(false))
                .count();
            if visible > 0 {
                return Ok(());
            }
            Err(HarnessError::VisibilityAssertionFailed {
                locator: locator.to_string(),
                detail: if matched.is_empty() {
                    "no element matches".to_string()
                } else {
                    format!("{} match(es), none visible", matched.len())
                },
            })
        })
        .await
    }

    /// Text (or accessible name) of the single visible match.
    async fn assert_label(&mut self, locator: &Locator, expected: &TextMatch, by_name: bool) -> HarnessResult<()> {
        self.until(|snapshot| {
            let element = resolve_one(locator, snapshot)?;
            let node = snapshot.get(element).ok_or_else(|| HarnessError::ElementNotFound {
                locator: locator.to_string(),
            })?;
            let actual = if by_name { &node.name } else { &node.text };
            if expected.matches(actual)? {
                Ok(())
            } else {
                Err(HarnessError::TextMismatch {
                    locator: locator.to_string(),
                    expected: expected.to_string(),
                    actual: actual.clone(),
                })
            }
        })
        .await
    }

    async fn assert_attribute(&mut self, locator: &Locator, attribute: &AttributeAssertion) -> HarnessResult<()> {
        let element = self.until(|snapshot| resolve_one(locator, snapshot)).await?;
        let actual = self.page.attribute(element, &attribute.name).await?;

        let ok = match (&actual, &attribute.value, &attribute.contains) {
            (None, _, _) => false,
            (Some(actual), Some(value), _) => value.matches(actual)?,
            (Some(actual), None, Some(part)) => actual.contains(part.as_str()),
            (Some(_), None, None) => true,
        };
        if ok {
            return Ok(());
        }
        Err(HarnessError::AttributeMismatch {
            locator: locator.to_string(),
            name: attribute.name.clone(),
            expected: attribute.describe(),
            actual,
        })
    }

    /// Resolve, register the surface expectation, click, then await it.
    async fn click_popup(&mut self, locator: &Locator, expected_url: Option<&TextMatch>) -> HarnessResult<Option<String>> {
        let element = self.until(|snapshot| resolve_one(locator, snapshot)).await?;
        let waiter = self.page.expect_new_surface().await?;
        let outcome = self.page.click(element).await?;
        let surface = self
            .page
            .wait_for_surface(waiter, self.config.surface_timeout())
            .await?;
        if outcome.unclaimed_surfaces > 0 {
            return Err(HarnessError::UnregisteredSurface {
                locator: locator.to_string(),
            });
        }

        if let Some(expected) = expected_url {
            let expected = url_expectation(self.base_url, expected);
            if !expected.matches(&surface.url)? {
                return Err(HarnessError::UrlMismatch {
                    expected: expected.to_string(),
                    actual: surface.url,
                });
            }
        }
        Ok(Some(format!("surface opened at {}", surface.url)))
    }
}
