//! CLI Commands

pub mod check;
pub mod list;
pub mod run;

use std::path::Path;

use anyhow::{bail, Result};
use flowprobe::ScenarioGroup;

/// Load suites and apply the group/tag selection shared by all commands.
/// Duplicate group names are an error.
pub fn select_groups(path: &Path, group: Option<&str>, tag: Option<&str>) -> Result<Vec<ScenarioGroup>> {
    let groups = ScenarioGroup::select(ScenarioGroup::load(path)?, group, tag)?;
    if groups.is_empty() {
        bail!("no scenario groups selected under {}", path.display());
    }
    Ok(groups)
}
