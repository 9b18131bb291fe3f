//! Driver capability boundary
//!
//! The harness never talks to a browser directly. It opens a [`Context`]
//! through a [`Driver`], opens a [`Page`] in it, and issues the small set of
//! calls below. Every call is an await point; nothing else in the harness
//! yields.
//!
//! Element queries work on a [`PageSnapshot`]: the driver reports the
//! elements of the current document (document order, parent links, role,
//! accessible name, text, visibility) and the resolver selects from it.
//! Actions take an [`ElementRef`] taken from the latest snapshot.

pub mod memory;
pub mod playwright;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HarnessResult;

pub use memory::{MemoryDriver, MemorySite};
pub use playwright::{Browser, PlaywrightConfig, PlaywrightDriver};

/// Options for a fresh browsing context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextOptions {
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1500,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Load,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// Index of an element in the snapshot it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub usize);

/// One element as reported by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub test_id: Option<String>,
    /// Explicit `role` attribute, if any.
    #[serde(default)]
    pub role: Option<String>,
    /// Computed accessible name.
    #[serde(default)]
    pub name: String,
    /// Rendered text of the element and its descendants.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementNode {
    /// Explicit role, else the implicit ARIA role of the tag.
    pub fn effective_role(&self) -> Option<String> {
        if let Some(role) = &self.role {
            return Some(role.to_ascii_lowercase());
        }
        let implicit = match self.tag.as_str() {
            "a" if self.attributes.contains_key("href") => "link",
            "button" => "button",
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
            "nav" => "navigation",
            "form" => "form",
            "section" => "region",
            "ul" | "ol" => "list",
            "li" => "listitem",
            "img" => "img",
            "textarea" => "textbox",
            "input" => match self.attributes.get("type").map(String::as_str) {
                None | Some("text") | Some("email") | Some("search") | Some("tel")
                | Some("url") => "textbox",
                Some("checkbox") => "checkbox",
                Some("radio") => "radio",
                Some("submit") | Some("button") => "button",
                _ => return None,
            },
            _ => return None,
        };
        Some(implicit.to_string())
    }
}

/// Elements of the current document in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub elements: Vec<ElementNode>,
}

impl PageSnapshot {
    pub fn get(&self, element: ElementRef) -> Option<&ElementNode> {
        self.elements.get(element.0)
    }

    /// Ancestors of `index`, nearest first.
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let mut current = self.elements.get(index).and_then(|e| e.parent);
        std::iter::from_fn(move || {
            let next = current?;
            current = self.elements.get(next).and_then(|e| e.parent);
            Some(next)
        })
    }
}

/// What a click did besides the click itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickOutcome {
    /// New surfaces (popups, tabs) that appeared and were not claimed by a
    /// registered [`SurfaceWaiter`].
    pub unclaimed_surfaces: usize,
}

/// A registered expectation of a new browsing surface.
///
/// Only a [`Page`] can create one, and [`Page::wait_for_surface`] consumes
/// it, so the expectation always exists before the triggering click and can
/// be awaited once.
#[derive(Debug)]
#[must_use = "a surface expectation must be awaited with Page::wait_for_surface"]
pub struct SurfaceWaiter {
    id: u64,
}

impl SurfaceWaiter {
    /// For driver implementations.
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

/// A surface that opened in response to a registered expectation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    pub url: String,
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Open an isolated browsing context.
    async fn new_context(&self, options: &ContextOptions) -> HarnessResult<Box<dyn Context>>;

    /// Release driver-wide resources (browser process). Contexts must be
    /// closed first.
    async fn shutdown(&self) -> HarnessResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Context: Send {
    /// Stable identity of this context for its whole lifetime.
    fn id(&self) -> &str;

    async fn new_page(&mut self) -> HarnessResult<Box<dyn Page>>;

    /// Close the context and all its pages. Consumes the context, so a
    /// context is closed at most once.
    async fn close(self: Box<Self>) -> HarnessResult<()>;
}

#[async_trait]
pub trait Page: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> HarnessResult<()>;

    /// Wait for `state`. Drivers without idle detection return
    /// [`crate::HarnessError::IdleUnsupported`] for [`LoadState::NetworkIdle`].
    async fn wait_for_load_state(&mut self, state: LoadState, timeout: Duration) -> HarnessResult<()>;

    async fn wait_for_timeout(&mut self, duration: Duration) -> HarnessResult<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn snapshot(&mut self) -> HarnessResult<PageSnapshot>;

    async fn click(&mut self, element: ElementRef) -> HarnessResult<ClickOutcome>;

    async fn fill(&mut self, element: ElementRef, text: &str) -> HarnessResult<()>;

    async fn press(&mut self, element: ElementRef, key: &str) -> HarnessResult<()>;

    async fn attribute(&mut self, element: ElementRef, name: &str) -> HarnessResult<Option<String>>;

    async fn url(&mut self) -> HarnessResult<String>;

    async fn title(&mut self) -> HarnessResult<String>;

    /// First phase of the surface protocol: register before the click.
    async fn expect_new_surface(&mut self) -> HarnessResult<SurfaceWaiter>;

    /// Second phase: wait for the registered surface and close it.
    async fn wait_for_surface(&mut self, waiter: SurfaceWaiter, timeout: Duration) -> HarnessResult<SurfaceInfo>;
}
