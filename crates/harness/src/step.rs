//! Executable steps
//!
//! Every step references at most one locator and yields exactly one
//! outcome. Suite-level conveniences (link tables) compile down to these in
//! [`crate::suite`].

use serde::{Deserialize, Serialize};

use crate::locator::{Locator, TextMatch};

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a URL (relative to the group base) and wait for quiescence
    Navigate { url: String },

    /// Some match of the locator is visible
    AssertVisible { locator: Locator },

    /// Rendered text of the single match equals / matches `expected`
    AssertText { locator: Locator, expected: TextMatch },

    /// Accessible name of the single match
    AssertName { locator: Locator, expected: TextMatch },

    /// Attribute presence and value
    AssertAttribute {
        locator: Locator,
        attribute: AttributeAssertion,
    },

    /// Document title
    AssertTitle { expected: TextMatch },

    /// Current URL; exact values are joined to the base, patterns may use `{base}`
    AssertUrl { expected: TextMatch },

    /// Click an element that stays in this page
    Click { locator: Locator },

    /// Click an element that opens a new browsing surface
    ClickPopup {
        locator: Locator,
        #[serde(default)]
        expected_url: Option<TextMatch>,
    },

    /// Fill an input field
    Fill { locator: Locator, value: String },

    /// Press a key on an element
    Press { locator: Locator, key: String },

    /// Wait for network quiescence
    WaitForIdle {
        #[serde(default = "default_idle_timeout")]
        timeout_ms: u64,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Wait { ms: u64 },
}

pub(crate) fn default_idle_timeout() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeAssertion {
    pub name: String,
    /// Whole-value expectation.
    #[serde(default)]
    pub value: Option<TextMatch>,
    /// Substring expectation.
    #[serde(default)]
    pub contains: Option<String>,
}

impl AttributeAssertion {
    pub fn describe(&self) -> String {
        match (&self.value, &self.contains) {
            (Some(value), _) => format!("{} = {}", self.name, value),
            (None, Some(part)) => format!("{} contains {:?}", self.name, part),
            (None, None) => format!("{} present", self.name),
        }
    }
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Navigate { .. } => "navigate",
            Step::AssertVisible { .. } => "assert_visible",
            Step::AssertText { .. } => "assert_text",
            Step::AssertName { .. } => "assert_name",
            Step::AssertAttribute { .. } => "assert_attribute",
            Step::AssertTitle { .. } => "assert_title",
            Step::AssertUrl { .. } => "assert_url",
            Step::Click { .. } => "click",
            Step::ClickPopup { .. } => "click_popup",
            Step::Fill { .. } => "fill",
            Step::Press { .. } => "press",
            Step::WaitForIdle { .. } => "wait_for_idle",
            Step::Wait { .. } => "wait",
        }
    }

    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Step::AssertVisible { locator }
            | Step::AssertText { locator, .. }
            | Step::AssertName { locator, .. }
            | Step::AssertAttribute { locator, .. }
            | Step::Click { locator }
            | Step::ClickPopup { locator, .. }
            | Step::Fill { locator, .. }
            | Step::Press { locator, .. } => Some(locator),
            Step::Navigate { .. }
            | Step::AssertTitle { .. }
            | Step::AssertUrl { .. }
            | Step::WaitForIdle { .. }
            | Step::Wait { .. } => None,
        }
    }

    /// Steps whose outcome is only meaningful once a navigation has settled.
    pub fn depends_on_navigation(&self) -> bool {
        matches!(self, Step::AssertUrl { .. } | Step::AssertTitle { .. })
    }

    /// One-line description for logs and failure details
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate {}", url),
            Step::AssertVisible { locator } => format!("assert_visible {}", locator),
            Step::AssertText { locator, expected } => format!("assert_text {} == {}", locator, expected),
            Step::AssertName { locator, expected } => format!("assert_name {} == {}", locator, expected),
            Step::AssertAttribute { locator, attribute } => {
                format!("assert_attribute {} {}", locator, attribute.describe())
            }
            Step::AssertTitle { expected } => format!("assert_title {}", expected),
            Step::AssertUrl { expected } => format!("assert_url {}", expected),
            Step::Click { locator } => format!("click {}", locator),
            Step::ClickPopup { locator, .. } => format!("click_popup {}", locator),
            Step::Fill { locator, value } => format!("fill {} with {:?}", locator, value),
            Step::Press { locator, key } => format!("press {} on {}", key, locator),
            Step::WaitForIdle { timeout_ms } => format!("wait_for_idle {}ms", timeout_ms),
            Step::Wait { ms } => format!("wait {}ms", ms),
        }
    }
}

/// Resolve `url` against `base`. Absolute URLs pass through.
pub fn join_url(base: &str, url: &str) -> String {
    let absolute = ["http://", "https://", "about:", "data:", "file://"];
    if absolute.iter().any(|scheme| url.starts_with(scheme)) {
        return url.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
}

/// Expected URL with base substitution applied.
pub fn url_expectation(base: &str, expected: &TextMatch) -> TextMatch {
    match expected {
        TextMatch::Exact(url) => TextMatch::Exact(join_url(base, url)),
        TextMatch::Pattern { pattern, ignore_case } => TextMatch::Pattern {
            pattern: pattern.replace("{base}", &regex::escape(base.trim_end_matches('/'))),
            ignore_case: *ignore_case,
        },
    }
}
