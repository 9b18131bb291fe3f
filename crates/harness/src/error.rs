//! Error types for flow verification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Element not found: {locator}")]
    ElementNotFound { locator: String },

    #[error("Locator {locator} matched {count} elements, expected exactly one")]
    AmbiguousLocator { locator: String, count: usize },

    #[error("Element not visible: {locator} ({detail})")]
    VisibilityAssertionFailed { locator: String, detail: String },

    #[error("Text mismatch on {locator}: expected {expected}, got {actual:?}")]
    TextMismatch {
        locator: String,
        expected: String,
        actual: String,
    },

    #[error("Attribute {name} mismatch on {locator}: expected {expected}, got {actual:?}")]
    AttributeMismatch {
        locator: String,
        name: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("URL mismatch: expected {expected}, got {actual}")]
    UrlMismatch { expected: String, actual: String },

    #[error("Title mismatch: expected {expected}, got {actual:?}")]
    TitleMismatch { expected: String, actual: String },

    #[error("Navigation to {url} did not settle within {timeout_ms} ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("Click on {locator} opened a new surface without a prior expectation")]
    UnregisteredSurface { locator: String },

    #[error("Scenario exceeded its {timeout_ms} ms bound")]
    ScenarioTimeout { timeout_ms: u64 },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Network idle detection is not supported by this driver")]
    IdleUnsupported,

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Suite error: {0}")]
    SuiteParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Base URL {url} unreachable after {attempts} attempts")]
    Unreachable { url: String, attempts: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl HarnessError {
    /// Short kind label used in failure details and result files.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::ElementNotFound { .. } => "ElementNotFound",
            HarnessError::AmbiguousLocator { .. } => "AmbiguousLocator",
            HarnessError::VisibilityAssertionFailed { .. } => "VisibilityAssertionFailed",
            HarnessError::TextMismatch { .. } => "TextMismatch",
            HarnessError::AttributeMismatch { .. } => "AttributeMismatch",
            HarnessError::UrlMismatch { .. } => "UrlMismatch",
            HarnessError::TitleMismatch { .. } => "TitleMismatch",
            HarnessError::NavigationTimeout { .. } => "NavigationTimeout",
            HarnessError::UnregisteredSurface { .. } => "UnregisteredSurface",
            HarnessError::ScenarioTimeout { .. } => "ScenarioTimeout",
            HarnessError::Driver(_) | HarnessError::IdleUnsupported => "DriverError",
            HarnessError::PlaywrightNotFound => "PlaywrightNotFound",
            HarnessError::InvalidStateTransition { .. } => "InvalidStateTransition",
            HarnessError::SuiteParse(_) => "SuiteParse",
            HarnessError::Config(_) => "Config",
            HarnessError::Unreachable { .. } => "Unreachable",
            HarnessError::Io(_)
            | HarnessError::Json(_)
            | HarnessError::Yaml(_)
            | HarnessError::Toml(_)
            | HarnessError::Regex(_)
            | HarnessError::Http(_) => "Internal",
        }
    }

    /// Assertion failures fail the scenario; everything else is a harness
    /// or driver problem.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            HarnessError::ElementNotFound { .. }
                | HarnessError::AmbiguousLocator { .. }
                | HarnessError::VisibilityAssertionFailed { .. }
                | HarnessError::TextMismatch { .. }
                | HarnessError::AttributeMismatch { .. }
                | HarnessError::UrlMismatch { .. }
                | HarnessError::TitleMismatch { .. }
        )
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_classification() {
        let err = HarnessError::UrlMismatch {
            expected: "https://aiaxio.com/tools/".into(),
            actual: "https://aiaxio.com/".into(),
        };
        assert_eq!(err.kind(), "UrlMismatch");
        assert!(err.is_assertion());

        let err = HarnessError::Driver("context crashed".into());
        assert_eq!(err.kind(), "DriverError");
        assert!(!err.is_assertion());
    }
}
