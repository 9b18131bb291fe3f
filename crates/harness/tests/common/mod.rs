#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use flowprobe::driver::ContextOptions;
use flowprobe::driver::{Context, Driver, Page};
use flowprobe::{HarnessConfig, MemoryDriver, MemorySite, ScenarioGroup};

pub const BASE: &str = "https://aiaxio.com";

pub fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").join(relative)
}

/// The in-memory model of aiaxio.com shipped with the repository.
pub fn aiaxio_site() -> MemorySite {
    MemorySite::from_file(&repo_path("fixtures/aiaxio-site.yaml")).unwrap()
}

pub fn bundled_suite() -> ScenarioGroup {
    ScenarioGroup::from_file(&repo_path("suites/aiaxio-home.yaml")).unwrap()
}

/// Short bounds so failing assertions do not stall the test run.
pub fn fast_config() -> HarnessConfig {
    HarnessConfig {
        assert_timeout_ms: 100,
        poll_interval_ms: 5,
        navigation_timeout_ms: 500,
        fallback_delay_ms: 5,
        surface_timeout_ms: 50,
        ..Default::default()
    }
}

pub fn group(yaml: &str) -> ScenarioGroup {
    ScenarioGroup::from_yaml(yaml).unwrap()
}

pub fn memory_driver() -> Arc<MemoryDriver> {
    Arc::new(MemoryDriver::new(aiaxio_site()))
}

/// A context and page on the model site, opened at the home page.
pub async fn home_page(driver: &MemoryDriver) -> (Box<dyn Context>, Box<dyn Page>) {
    let mut context = driver.new_context(&ContextOptions::default()).await.unwrap();
    let mut page = context.new_page().await.unwrap();
    page.goto(&format!("{}/", BASE), std::time::Duration::from_secs(1))
        .await
        .unwrap();
    (context, page)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flowprobe=debug")
        .with_test_writer()
        .try_init();
}
