//! flowprobe: declarative UI-flow verification
//!
//! Scenarios are written as YAML data: locators, steps and expected URLs.
//! The harness runs them against a browser through a narrow driver
//! boundary and reports per-scenario pass/fail with step-level detail.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                           │
//! │    ├── per group: open Context + Page (shared)              │
//! │    ├── per scenario: reset to base_url, run under timeout   │
//! │    └── close Context on every exit path                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StepExecutor                                               │
//! │    ├── navigate / wait_for_idle / wait                      │
//! │    ├── click / click_popup / fill / press                   │
//! │    └── assert_{visible,text,name,attribute,title,url}       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Resolver: Locator x PageSnapshot -> [ElementRef]           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Driver / Context / Page                                    │
//! │    ├── PlaywrightDriver (Node bridge over stdio)            │
//! │    └── MemoryDriver (deterministic in-memory site)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod locator;
pub mod preflight;
pub mod report;
pub mod resolver;
pub mod runner;
pub mod step;
pub mod suite;

pub use config::HarnessConfig;
pub use driver::{Driver, MemoryDriver, MemorySite, PlaywrightDriver};
pub use error::{HarnessError, HarnessResult};
pub use executor::{FailureDetail, StepExecutor, StepRecord, StepStatus};
pub use locator::{Locator, TextMatch};
pub use report::{RunReport, ScenarioOutcome, ScenarioStatus, Summary};
pub use runner::{RunnerState, ScenarioRunner};
pub use step::Step;
pub use suite::{Scenario, ScenarioGroup};
