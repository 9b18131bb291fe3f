//! Declarative YAML suites
//!
//! One file describes one scenario group: a base URL, a viewport and an
//! ordered list of scenarios sharing a browsing context.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::driver::Viewport;
use crate::error::{HarnessError, HarnessResult};
use crate::locator::{Locator, TextMatch};
use crate::step::{default_idle_timeout, url_expectation, Step};

/// A scenario group parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioGroup {
    /// Unique name for this group
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Root every relative URL is joined to; scenarios start from here
    pub base_url: String,

    /// Tags for filtering groups
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default)]
    pub viewport: Viewport,

    /// Scenario-wide bound; falls back to the configured default
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Scenarios to execute in order
    pub scenarios: Vec<Scenario>,

    /// File this group was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Run in the group's shared context (default) or a dedicated one
    #[serde(default = "default_true")]
    pub shared_context: bool,

    /// Record as skipped without running
    #[serde(default)]
    pub skip: bool,

    pub steps: Vec<StepSpec>,
}

fn default_true() -> bool {
    true
}

/// A step as written in a suite: a plain step or a link table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StepSpec {
    Links(LinkTable),
    Step(Step),
}

impl<'de> Deserialize<'de> for StepSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        if value.get("links").is_some() {
            serde_yaml::from_value(value)
                .map(StepSpec::Links)
                .map_err(D::Error::custom)
        } else {
            serde_yaml::from_value(value)
                .map(StepSpec::Step)
                .map_err(D::Error::custom)
        }
    }
}

/// Rows of "this element leads there", each checked from `return_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkTable {
    pub links: Vec<LinkCheck>,

    /// Page to go back to between rows
    #[serde(default = "default_return_to")]
    pub return_to: String,
}

fn default_return_to() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkCheck {
    pub locator: Locator,

    /// Expected label of the element
    #[serde(default)]
    pub text: Option<TextMatch>,

    /// Expected destination
    pub url: TextMatch,

    /// Wait for quiescence between the click and the URL check
    #[serde(default = "default_true")]
    pub idle: bool,
}

impl LinkTable {
    /// Expand into primitive steps.
    pub fn compile(&self) -> Vec<Step> {
        let mut steps = Vec::new();
        for (i, row) in self.links.iter().enumerate() {
            steps.push(Step::AssertVisible {
                locator: row.locator.clone(),
            });
            if let Some(text) = &row.text {
                steps.push(Step::AssertText {
                    locator: row.locator.clone(),
                    expected: text.clone(),
                });
            }
            steps.push(Step::Click {
                locator: row.locator.clone(),
            });
            if row.idle {
                steps.push(Step::WaitForIdle {
                    timeout_ms: default_idle_timeout(),
                });
            }
            steps.push(Step::AssertUrl {
                expected: row.url.clone(),
            });
            if i + 1 < self.links.len() {
                steps.push(Step::Navigate {
                    url: self.return_to.clone(),
                });
            }
        }
        steps
    }
}

impl Scenario {
    /// Primitive steps in execution order.
    pub fn compile(&self) -> Vec<Step> {
        self.steps
            .iter()
            .flat_map(|spec| match spec {
                StepSpec::Step(step) => vec![step.clone()],
                StepSpec::Links(table) => table.compile(),
            })
            .collect()
    }
}

impl ScenarioGroup {
    /// Parse a group from YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let group: Self = serde_yaml::from_str(yaml)?;
        group.validate()?;
        Ok(group)
    }

    /// Parse a group from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut group = Self::from_yaml(&content).map_err(|e| {
            HarnessError::SuiteParse(format!("{}: {}", path.display(), e))
        })?;
        group.source = Some(path.to_path_buf());
        Ok(group)
    }

    /// Load a single file, or every `.yaml`/`.yml` file under a directory
    /// in path order.
    pub fn load(path: &Path) -> HarnessResult<Vec<Self>> {
        if path.is_file() {
            return Ok(vec![Self::from_file(path)?]);
        }

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        files.iter().map(|file| Self::from_file(file)).collect()
    }

    /// Filter groups by tag
    pub fn filter_by_tag<'a>(groups: &'a [Self], tag: &str) -> Vec<&'a Self> {
        groups.iter().filter(|g| g.tags.iter().any(|t| t == tag)).collect()
    }

    /// Narrow loaded groups to a run: by name, then by tag. Group names must
    /// be unique within a run so that `group / scenario` names every outcome.
    pub fn select(groups: Vec<Self>, name: Option<&str>, tag: Option<&str>) -> HarnessResult<Vec<Self>> {
        let mut names = BTreeSet::new();
        for group in &groups {
            if !names.insert(group.name.as_str()) {
                let source = group
                    .source
                    .as_ref()
                    .map(|p| format!(" (again in {})", p.display()))
                    .unwrap_or_default();
                return Err(HarnessError::SuiteParse(format!(
                    "duplicate group name {:?}{}",
                    group.name, source
                )));
            }
        }

        let groups: Vec<Self> = match name {
            Some(name) => groups.into_iter().filter(|g| g.name == name).collect(),
            None => groups,
        };
        Ok(match tag {
            Some(tag) => Self::filter_by_tag(&groups, tag).into_iter().cloned().collect(),
            None => groups,
        })
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> HarnessResult<()> {
        let invalid = |reason: String| HarnessError::SuiteParse(format!("group {:?}: {}", self.name, reason));

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid(format!("base_url {:?} is not an http(s) URL", self.base_url)));
        }
        if self.scenarios.is_empty() {
            return Err(invalid("no scenarios".to_string()));
        }

        let mut names = BTreeSet::new();
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(invalid(format!("duplicate scenario name {:?}", scenario.name)));
            }
            for step in scenario.compile() {
                if let Some(locator) = step.locator() {
                    locator.validate()?;
                }
                match &step {
                    Step::AssertText { expected, .. }
                    | Step::AssertName { expected, .. }
                    | Step::AssertTitle { expected } => expected.validate()?,
                    // URL patterns may use `{base}`, which only compiles once substituted.
                    Step::AssertUrl { expected }
                    | Step::ClickPopup {
                        expected_url: Some(expected),
                        ..
                    } => url_expectation(&self.base_url, expected).validate()?,
                    Step::AssertAttribute { attribute, .. } => {
                        if let Some(value) = &attribute.value {
                            value.validate()?;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAVBAR: &str = r#"
name: home
base_url: https://aiaxio.com
tags: [smoke]
scenarios:
  - name: Navbar functionalities
    steps:
      - action: assert_visible
        locator: { test_id: navbar-aiaxio }
      - links:
          - locator: { test_id: nav-link-Tools }
            text: Tools
            url: /tools/
          - locator: { test_id: nav-link-Search }
            url: /search/
            idle: false
"#;

    #[test]
    fn test_parse_group_defaults() {
        let group = ScenarioGroup::from_yaml(NAVBAR).unwrap();
        assert_eq!(group.viewport, Viewport { width: 1500, height: 800 });
        assert!(group.scenarios[0].shared_context);
        assert!(!group.scenarios[0].skip);
        assert_eq!(ScenarioGroup::filter_by_tag(std::slice::from_ref(&group), "smoke").len(), 1);
    }

    #[test]
    fn test_select_by_name_and_tag() {
        let smoke = ScenarioGroup::from_yaml(NAVBAR).unwrap();
        let mut nightly = smoke.clone();
        nightly.name = "nightly".into();
        nightly.tags = vec!["nightly".into()];
        let groups = vec![smoke, nightly];

        let picked = ScenarioGroup::select(groups.clone(), None, Some("nightly")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "nightly");

        let picked = ScenarioGroup::select(groups.clone(), Some("home"), Some("nightly")).unwrap();
        assert!(picked.is_empty());

        assert_eq!(ScenarioGroup::select(groups, None, None).unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_group_names_rejected_across_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), NAVBAR).unwrap();
        std::fs::write(dir.path().join("b.yaml"), NAVBAR).unwrap();
        let groups = ScenarioGroup::load(dir.path()).unwrap();
        assert_eq!(groups.len(), 2);

        // Rejected even when a filter would leave only one of them.
        for name in [None, Some("home")] {
            match ScenarioGroup::select(groups.clone(), name, None) {
                Err(HarnessError::SuiteParse(message)) => {
                    assert!(message.contains("duplicate group name \"home\""));
                    assert!(message.contains("b.yaml"));
                }
                other => panic!("expected duplicate name error, got {:?}", other.map(|g| g.len())),
            }
        }
    }

    #[test]
    fn test_link_table_compiles_to_primitive_steps() {
        let group = ScenarioGroup::from_yaml(NAVBAR).unwrap();
        let kinds: Vec<&str> = group.scenarios[0].compile().iter().map(Step::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "assert_visible",
                // row 1
                "assert_visible",
                "assert_text",
                "click",
                "wait_for_idle",
                "assert_url",
                "navigate",
                // row 2: no idle wait, no trailing navigate
                "assert_visible",
                "click",
                "assert_url",
            ]
        );
        assert!(group.scenarios[0]
            .compile()
            .iter()
            .all(|step| step.locator().into_iter().count() <= 1));
    }

    #[test]
    fn test_rejects_duplicate_scenarios() {
        let yaml = r#"
name: dupes
base_url: https://aiaxio.com
scenarios:
  - name: same
    steps: [{ action: navigate, url: / }]
  - name: same
    steps: [{ action: navigate, url: / }]
"#;
        let err = ScenarioGroup::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate scenario name"));
    }

    #[test]
    fn test_rejects_bad_regex_and_base() {
        let yaml = r#"
name: bad
base_url: https://aiaxio.com
scenarios:
  - name: s
    steps:
      - action: assert_title
        expected: { pattern: "(" }
"#;
        assert!(matches!(ScenarioGroup::from_yaml(yaml), Err(HarnessError::Regex(_))));

        let yaml = "name: bad\nbase_url: aiaxio.com\nscenarios: []\n";
        assert!(ScenarioGroup::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_base_placeholder_validates_after_substitution() {
        let yaml = r#"
name: filters
base_url: https://aiaxio.com
scenarios:
  - name: s
    steps:
      - action: assert_url
        expected: { pattern: '^{base}/trending/$' }
"#;
        ScenarioGroup::from_yaml(yaml).unwrap();
    }

    #[test]
    fn test_unknown_action_reports_step_error() {
        let yaml = r#"
name: bad
base_url: https://aiaxio.com
scenarios:
  - name: s
    steps:
      - action: hover
        locator: { test_id: x }
"#;
        let err = ScenarioGroup::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("hover"), "{}", err);
    }

    #[test]
    fn test_load_directory_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), NAVBAR.replace("name: home", "name: second")).unwrap();
        std::fs::write(dir.path().join("a.yml"), NAVBAR).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let groups = ScenarioGroup::load(dir.path()).unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["home", "second"]);
        assert!(groups[0].source.as_ref().unwrap().ends_with("a.yml"));
    }
}
