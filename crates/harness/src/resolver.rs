//! Locator resolution against a page snapshot
//!
//! Resolution is a pure function of the snapshot: it never touches the page,
//! and the same snapshot always yields the same element set in document
//! order.

use std::collections::BTreeSet;

use crate::driver::{ElementNode, ElementRef, PageSnapshot};
use crate::error::{HarnessError, HarnessResult};
use crate::locator::{Combinator, Compound, CssSelector, Locator, Strategy, TextMatch};

/// All elements matching `locator`, in document order.
pub fn resolve(locator: &Locator, snapshot: &PageSnapshot) -> HarnessResult<Vec<ElementRef>> {
    let scope: Option<BTreeSet<usize>> = match &locator.within {
        Some(within) => Some(
            resolve(within, snapshot)?
                .into_iter()
                .map(|e| e.0)
                .collect(),
        ),
        None => None,
    };

    let mut matched = Vec::new();
    for (index, node) in snapshot.elements.iter().enumerate() {
        if let Some(scope) = &scope {
            if !snapshot.ancestors(index).any(|a| scope.contains(&a)) {
                continue;
            }
        }
        if !matches_strategy(&locator.strategy, snapshot, index, node)? {
            continue;
        }
        if let Some(filter) = &locator.has_text {
            if !filter.found_in(&node.text)? {
                continue;
            }
        }
        matched.push(index);
    }

    // Text selects the innermost element carrying the text, not every wrapper.
    if matches!(locator.strategy, Strategy::Text(_)) {
        let all: BTreeSet<usize> = matched.iter().copied().collect();
        matched.retain(|index| {
            !all.iter()
                .any(|other| other != index && snapshot.ancestors(*other).any(|a| a == *index))
        });
    }

    Ok(matched.into_iter().map(ElementRef).collect())
}

/// The single interactable element for an action.
///
/// Hidden matches are ignored; no visible match is a visibility failure and
/// several visible matches are ambiguous.
pub fn resolve_one(locator: &Locator, snapshot: &PageSnapshot) -> HarnessResult<ElementRef> {
    let all = resolve(locator, snapshot)?;
    if all.is_empty() {
        return Err(HarnessError::ElementNotFound {
            locator: locator.to_string(),
        });
    }

    let visible: Vec<ElementRef> = all
        .iter()
        .copied()
        .filter(|e| snapshot.get(*e).map(|n| n.visible).unwrap_or(false))
        .collect();

    match visible.as_slice() {
        [] => Err(HarnessError::VisibilityAssertionFailed {
            locator: locator.to_string(),
            detail: format!("{} match(es), none visible", all.len()),
        }),
        [only] => Ok(*only),
        many => Err(HarnessError::AmbiguousLocator {
            locator: locator.to_string(),
            count: many.len(),
        }),
    }
}

fn matches_strategy(
    strategy: &Strategy,
    snapshot: &PageSnapshot,
    index: usize,
    node: &ElementNode,
) -> HarnessResult<bool> {
    match strategy {
        Strategy::TestId(id) => Ok(node.test_id.as_deref() == Some(id.as_str())),
        Strategy::Role { role, name } => {
            if node.effective_role().as_deref() != Some(role.to_ascii_lowercase().as_str()) {
                return Ok(false);
            }
            match name {
                Some(name) => name.matches(&node.name),
                None => Ok(true),
            }
        }
        Strategy::Text(text) => match text {
            TextMatch::Exact(_) => text.found_in(&node.text),
            TextMatch::Pattern { .. } => text.matches(&node.text),
        },
        Strategy::Css(css) => Ok(matches_css(css, snapshot, index)),
    }
}

fn matches_css(css: &CssSelector, snapshot: &PageSnapshot, index: usize) -> bool {
    matches_parts(&css.parts, snapshot, index)
}

/// Right-to-left match with backtracking over descendant combinators.
fn matches_parts(parts: &[(Combinator, Compound)], snapshot: &PageSnapshot, index: usize) -> bool {
    let Some(((combinator, compound), rest)) = parts.split_last() else {
        return true;
    };
    let Some(node) = snapshot.elements.get(index) else {
        return false;
    };
    if !matches_compound(compound, node) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }
    match combinator {
        Combinator::Child => node
            .parent
            .map(|parent| matches_parts(rest, snapshot, parent))
            .unwrap_or(false),
        Combinator::Descendant => snapshot
            .ancestors(index)
            .any(|ancestor| matches_parts(rest, snapshot, ancestor)),
    }
}

fn matches_compound(compound: &Compound, node: &ElementNode) -> bool {
    if let Some(tag) = &compound.tag {
        if !node.tag.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &compound.id {
        if node.id.as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.iter().all(|c| node.classes.contains(c)) {
        return false;
    }
    compound.attributes.iter().all(|(name, value)| {
        let actual = match name.as_str() {
            "data-testid" => node.test_id.as_ref(),
            "id" => node.id.as_ref(),
            _ => node.attributes.get(name),
        };
        match (actual, value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    })
}
