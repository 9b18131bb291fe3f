//! Semantic element locators
//!
//! A [`Locator`] names an element by what a user perceives (test id, ARIA
//! role and accessible name, visible text) or, as a last resort, by a small
//! structural CSS subset. Locators are plain data; matching them against a
//! page lives in [`crate::resolver`].
//!
//! YAML form:
//!
//! ```yaml
//! locator: { test_id: navbar-logo }
//! locator: { role: button, name: { pattern: "^Sign In$" }, within: { test_id: navbar-aiaxio } }
//! locator: { css: section, has_text: "AI Coding Tools" }
//! ```

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Expected text: an exact literal (after whitespace normalization) or a
/// regular expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextMatch {
    Exact(String),
    Pattern {
        pattern: String,
        #[serde(default)]
        ignore_case: bool,
    },
}

impl TextMatch {
    pub fn exact(text: impl Into<String>) -> Self {
        TextMatch::Exact(text.into())
    }

    pub fn pattern(pattern: impl Into<String>, ignore_case: bool) -> Self {
        TextMatch::Pattern {
            pattern: pattern.into(),
            ignore_case,
        }
    }

    /// Whole-value match: literal equality or a regex hit anywhere in `actual`.
    pub fn matches(&self, actual: &str) -> HarnessResult<bool> {
        let actual = normalize_text(actual);
        match self {
            TextMatch::Exact(expected) => Ok(normalize_text(expected) == actual),
            TextMatch::Pattern { pattern, ignore_case } => Ok(RegexBuilder::new(pattern)
                .case_insensitive(*ignore_case)
                .build()?
                .is_match(&actual)),
        }
    }

    /// Substring semantics for filters: a literal only needs to occur in
    /// `actual` (case-insensitive); patterns behave as in [`TextMatch::matches`].
    pub fn found_in(&self, actual: &str) -> HarnessResult<bool> {
        match self {
            TextMatch::Exact(needle) => Ok(normalize_text(actual)
                .to_lowercase()
                .contains(&normalize_text(needle).to_lowercase())),
            TextMatch::Pattern { .. } => self.matches(actual),
        }
    }

    /// Compile patterns so malformed regexes surface at load time.
    pub fn validate(&self) -> HarnessResult<()> {
        if let TextMatch::Pattern { pattern, ignore_case } = self {
            RegexBuilder::new(pattern)
                .case_insensitive(*ignore_case)
                .build()?;
        }
        Ok(())
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextMatch::Exact(text) => write!(f, "{:?}", text),
            TextMatch::Pattern { pattern, ignore_case: true } => write!(f, "/{}/i", pattern),
            TextMatch::Pattern { pattern, .. } => write!(f, "/{}/", pattern),
        }
    }
}

impl From<&str> for TextMatch {
    fn from(text: &str) -> Self {
        TextMatch::Exact(text.to_string())
    }
}

/// Collapse whitespace runs and trim, the way rendered text is compared.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How the candidate set is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    TestId(String),
    Role {
        role: String,
        name: Option<TextMatch>,
    },
    Text(TextMatch),
    Css(CssSelector),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LocatorSpec", into = "LocatorSpec")]
pub struct Locator {
    pub strategy: Strategy,
    /// Keep only candidates whose text contains this.
    pub has_text: Option<TextMatch>,
    /// Ancestor scope.
    pub within: Option<Box<Locator>>,
}

impl Locator {
    fn from_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            has_text: None,
            within: None,
        }
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Self::from_strategy(Strategy::TestId(id.into()))
    }

    pub fn role(role: impl Into<String>, name: impl Into<TextMatchArg>) -> Self {
        Self::from_strategy(Strategy::Role {
            role: role.into(),
            name: name.into().0,
        })
    }

    pub fn text(text: impl Into<TextMatch>) -> Self {
        Self::from_strategy(Strategy::Text(text.into()))
    }

    pub fn css(selector: &str) -> HarnessResult<Self> {
        Ok(Self::from_strategy(Strategy::Css(CssSelector::parse(selector)?)))
    }

    pub fn with_text(mut self, text: impl Into<TextMatch>) -> Self {
        self.has_text = Some(text.into());
        self
    }

    pub fn within(mut self, scope: Locator) -> Self {
        self.within = Some(Box::new(scope));
        self
    }

    /// Compile every pattern in the chain.
    pub fn validate(&self) -> HarnessResult<()> {
        match &self.strategy {
            Strategy::Role { name: Some(name), .. } => name.validate()?,
            Strategy::Text(text) => text.validate()?,
            _ => {}
        }
        if let Some(text) = &self.has_text {
            text.validate()?;
        }
        if let Some(scope) = &self.within {
            scope.validate()?;
        }
        Ok(())
    }
}

/// Optional accessible name argument for [`Locator::role`].
pub struct TextMatchArg(Option<TextMatch>);

impl From<&str> for TextMatchArg {
    fn from(name: &str) -> Self {
        TextMatchArg(Some(TextMatch::exact(name)))
    }
}

impl From<TextMatch> for TextMatchArg {
    fn from(name: TextMatch) -> Self {
        TextMatchArg(Some(name))
    }
}

impl From<Option<TextMatch>> for TextMatchArg {
    fn from(name: Option<TextMatch>) -> Self {
        TextMatchArg(name)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scope) = &self.within {
            write!(f, "{} >> ", scope)?;
        }
        match &self.strategy {
            Strategy::TestId(id) => write!(f, "test_id={:?}", id)?,
            Strategy::Role { role, name: Some(name) } => write!(f, "role={}[name={}]", role, name)?,
            Strategy::Role { role, name: None } => write!(f, "role={}", role)?,
            Strategy::Text(text) => write!(f, "text={}", text)?,
            Strategy::Css(css) => write!(f, "css={}", css.source)?,
        }
        if let Some(text) = &self.has_text {
            write!(f, " >> has_text={}", text)?;
        }
        Ok(())
    }
}

/// Serialized form of a [`Locator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<TextMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_text: Option<TextMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within: Option<Box<LocatorSpec>>,
}

impl TryFrom<LocatorSpec> for Locator {
    type Error = HarnessError;

    fn try_from(spec: LocatorSpec) -> HarnessResult<Self> {
        if spec.name.is_some() && spec.role.is_none() {
            return Err(HarnessError::SuiteParse(
                "locator `name` is only valid together with `role`".to_string(),
            ));
        }

        let strategy = match (spec.test_id, spec.role, spec.text, spec.css) {
            (Some(id), None, None, None) => Strategy::TestId(id),
            (None, Some(role), None, None) => Strategy::Role { role, name: spec.name },
            (None, None, Some(text), None) => Strategy::Text(text),
            (None, None, None, Some(css)) => Strategy::Css(CssSelector::parse(&css)?),
            _ => {
                return Err(HarnessError::SuiteParse(
                    "locator needs exactly one of test_id, role, text, css".to_string(),
                ))
            }
        };

        let within = match spec.within {
            Some(scope) => Some(Box::new(Locator::try_from(*scope)?)),
            None => None,
        };

        Ok(Locator {
            strategy,
            has_text: spec.has_text,
            within,
        })
    }
}

impl From<Locator> for LocatorSpec {
    fn from(locator: Locator) -> Self {
        let mut spec = LocatorSpec {
            has_text: locator.has_text,
            within: locator.within.map(|scope| Box::new(LocatorSpec::from(*scope))),
            ..Default::default()
        };
        match locator.strategy {
            Strategy::TestId(id) => spec.test_id = Some(id),
            Strategy::Role { role, name } => {
                spec.role = Some(role);
                spec.name = name;
            }
            Strategy::Text(text) => spec.text = Some(text),
            Strategy::Css(css) => spec.css = Some(css.source),
        }
        spec
    }
}

/// Structural selector subset: compound selectors of tag, `#id`, `.class`
/// and `[attr]` / `[attr=value]`, joined by descendant and child combinators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssSelector {
    pub source: String,
    /// Left to right; the first entry's combinator is ignored.
    pub parts: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<(String, Option<String>)>,
}

impl CssSelector {
    pub fn parse(source: &str) -> HarnessResult<Self> {
        let invalid = |reason: &str| {
            HarnessError::SuiteParse(format!("invalid css selector {:?}: {}", source, reason))
        };

        let mut parts = Vec::new();
        let mut pending = Combinator::Descendant;

        for token in tokenize(source).map_err(|r| invalid(&r))? {
            if token == ">" {
                if parts.is_empty() {
                    return Err(invalid("leading combinator"));
                }
                pending = Combinator::Child;
                continue;
            }
            parts.push((pending, parse_compound(&token).map_err(|r| invalid(&r))?));
            pending = Combinator::Descendant;
        }

        if parts.is_empty() {
            return Err(invalid("empty selector"));
        }
        if pending == Combinator::Child {
            return Err(invalid("trailing combinator"));
        }

        Ok(Self {
            source: source.trim().to_string(),
            parts,
        })
    }
}

/// Split on whitespace and `>` outside attribute brackets. Bracket bodies,
/// quoted values included, stay inside their compound token.
fn tokenize(source: &str) -> Result<Vec<String>, String> {
    fn flush(current: &mut String, tokens: &mut Vec<String>) {
        if !current.is_empty() {
            tokens.push(std::mem::take(current));
        }
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    let mut quote: Option<char> = None;

    for c in source.chars() {
        if in_brackets {
            current.push(c);
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                None if c == ']' => in_brackets = false,
                None if c == '[' => return Err("nested '['".into()),
                None => {}
            }
            continue;
        }
        match c {
            '[' => {
                in_brackets = true;
                current.push(c);
            }
            '>' => {
                flush(&mut current, &mut tokens);
                tokens.push(">".to_string());
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }

    if quote.is_some() {
        return Err("unterminated quoted value".into());
    }
    if in_brackets {
        return Err("missing ']'".into());
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner;
        }
    }
    value
}

fn parse_compound(token: &str) -> Result<Compound, String> {
    let mut compound = Compound::default();
    let mut chars = token.chars().peekable();

    let tag = read_ident(&mut chars);
    if !tag.is_empty() {
        compound.tag = Some(tag.to_ascii_lowercase());
    } else if chars.peek() == Some(&'*') {
        chars.next();
    }

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let class = read_ident(&mut chars);
                if class.is_empty() {
                    return Err("empty class name".into());
                }
                compound.classes.push(class);
            }
            '#' => {
                let id = read_ident(&mut chars);
                if id.is_empty() {
                    return Err("empty id".into());
                }
                compound.id = Some(id);
            }
            '[' => {
                let mut body = String::new();
                let mut quote = None;
                let mut closed = false;
                for c in chars.by_ref() {
                    match quote {
                        Some(q) if c == q => quote = None,
                        Some(_) => {}
                        None if c == ']' => {
                            closed = true;
                            break;
                        }
                        None if c == '"' || c == '\'' => quote = Some(c),
                        None => {}
                    }
                    body.push(c);
                }
                if !closed {
                    return Err("missing ']'".into());
                }
                let (name, value) = match body.split_once('=') {
                    Some((name, value)) => (name.trim().to_string(), Some(unquote(value).to_string())),
                    None => (body.trim().to_string(), None),
                };
                if name.is_empty() {
                    return Err("empty attribute name".into());
                }
                compound.attributes.push((name, value));
            }
            other => return Err(format!("unsupported character {:?}", other)),
        }
    }

    Ok(compound)
}

fn read_ident(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    ident
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  AI Coding\n   Tools "), "AI Coding Tools");
    }

    #[test]
    fn test_text_match_exact_and_pattern() {
        assert!(TextMatch::exact("Sign In").matches(" Sign  In ").unwrap());
        assert!(!TextMatch::exact("Sign In").matches("Sign Up").unwrap());
        let title = TextMatch::pattern("AIAXIO - AI Matched To Your Need", true);
        assert!(title.matches("aiaxio - ai matched to your need | home").unwrap());
    }

    #[test]
    fn test_has_text_is_substring() {
        let filter = TextMatch::exact("AI Writing AssistantsView AllView");
        assert!(filter
            .found_in("AI Writing AssistantsView AllView Tools Load more")
            .unwrap());
    }

    #[test]
    fn test_parse_locator_yaml() {
        let yaml = r#"
role: button
name:
  pattern: "^Sign In$"
within:
  test_id: navbar-aiaxio
"#;
        let locator: Locator = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            locator.to_string(),
            r#"test_id="navbar-aiaxio" >> role=button[name=/^Sign In$/]"#
        );
    }

    #[test]
    fn test_locator_requires_single_strategy() {
        let yaml = "test_id: a\ncss: section\n";
        assert!(serde_yaml::from_str::<Locator>(yaml).is_err());
        assert!(serde_yaml::from_str::<Locator>("name: Foo\ntext: Foo\n").is_err());
    }

    #[test]
    fn test_parse_css() {
        let css = CssSelector::parse(".flex.flex-col > svg").unwrap();
        assert_eq!(css.parts.len(), 2);
        assert_eq!(css.parts[0].1.classes, vec!["flex", "flex-col"]);
        assert_eq!(css.parts[1].0, Combinator::Child);
        assert_eq!(css.parts[1].1.tag.as_deref(), Some("svg"));

        let attr = CssSelector::parse("form input[type=email]").unwrap();
        assert_eq!(
            attr.parts[1].1.attributes,
            vec![("type".to_string(), Some("email".to_string()))]
        );

        assert!(CssSelector::parse("> svg").is_err());
        assert!(CssSelector::parse("section:hover").is_err());
    }

    #[test]
    fn test_parse_css_keeps_attribute_values_whole() {
        let css = CssSelector::parse(r#"a[title="a > b c"]>span"#).unwrap();
        assert_eq!(css.parts.len(), 2);
        assert_eq!(
            css.parts[0].1.attributes,
            vec![("title".to_string(), Some("a > b c".to_string()))]
        );
        assert_eq!(css.parts[1].0, Combinator::Child);
        assert_eq!(css.parts[1].1.tag.as_deref(), Some("span"));

        let css = CssSelector::parse("a[href='/x?a=1'] .label").unwrap();
        assert_eq!(
            css.parts[0].1.attributes,
            vec![("href".to_string(), Some("/x?a=1".to_string()))]
        );
        assert_eq!(css.parts[1].0, Combinator::Descendant);
    }

    #[test_case("a[href" ; "missing bracket")]
    #[test_case(r#"a[title="x]"# ; "unterminated quote")]
    #[test_case("a[b[c]]" ; "nested bracket")]
    #[test_case("a >" ; "trailing combinator")]
    fn test_parse_css_rejects(source: &str) {
        assert!(matches!(CssSelector::parse(source), Err(HarnessError::SuiteParse(_))));
    }
}
