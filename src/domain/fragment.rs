use std::fmt;

use html_escape::encode_double_quoted_attribute;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::template::{execute_template_with, OptionalIncludePolicy, Resolver, TemplateError};

/// Ordered attribute list of an HTML tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value of the named attribute.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Render as `name="value"` pairs separated by spaces.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", name, encode_double_quoted_attribute(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromIterator<(String, String)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A `<script>` element collected out of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptElement {
    pub attrs: Attributes,
    /// Inline body, `None` for external scripts.
    pub text: Option<String>,
}

impl ScriptElement {
    pub fn src(&self) -> Option<&str> {
        self.attrs.get("src")
    }

    pub fn render(&self) -> String {
        let text = self.text.as_deref().unwrap_or("");
        if self.attrs.is_empty() {
            format!("<script>{}</script>", text)
        } else {
            format!("<script {}>{}</script>", self.attrs.render(), text)
        }
    }
}

/// Render a collected stylesheet as a `<link>` tag.
pub fn render_stylesheet(attrs: &Attributes) -> String {
    format!("<link {}>", attrs.render())
}

/// An executable template unit.
pub trait Fragment: Send + Sync + fmt::Debug {
    /// Template text with embedded placeholders.
    fn content(&self) -> &str;

    fn stylesheets(&self) -> &[Attributes] {
        &[]
    }

    fn scripts(&self) -> &[ScriptElement] {
        &[]
    }

    /// Approximate heap footprint, used for cache accounting.
    fn memory_size(&self) -> usize {
        let links: usize = self
            .stylesheets()
            .iter()
            .flat_map(|a| a.iter())
            .map(|(n, v)| n.len() + v.len())
            .sum();
        let scripts: usize = self
            .scripts()
            .iter()
            .map(|s| {
                s.text.as_ref().map_or(0, String::len)
                    + s.attrs.iter().map(|(n, v)| n.len() + v.len()).sum::<usize>()
            })
            .sum();
        self.content().len() + links + scripts
    }

    /// Expand the template into `out`, resolving nested fragments through `resolver`.
    fn execute(
        &self,
        out: &mut dyn fmt::Write,
        data: &Map<String, Value>,
        policy: OptionalIncludePolicy,
        resolver: &mut Resolver<'_>,
    ) -> Result<(), TemplateError> {
        execute_template_with(out, self.content(), data, policy, resolver)
    }
}

/// A fragment backed by an owned string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringFragment {
    content: String,
    stylesheets: Vec<Attributes>,
    scripts: Vec<ScriptElement>,
}

impl StringFragment {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stylesheets: Vec::new(),
            scripts: Vec::new(),
        }
    }

    pub fn with_assets(
        content: impl Into<String>,
        stylesheets: Vec<Attributes>,
        scripts: Vec<ScriptElement>,
    ) -> Self {
        Self {
            content: content.into(),
            stylesheets,
            scripts,
        }
    }
}

impl Fragment for StringFragment {
    fn content(&self) -> &str {
        &self.content
    }

    fn stylesheets(&self) -> &[Attributes] {
        &self.stylesheets
    }

    fn scripts(&self) -> &[ScriptElement] {
        &self.scripts
    }
}
