//! Markup parser for composable documents.
//!
//! Walks the token stream of a document and extracts:
//!
//! - the `<head>` fragment and the `<body>` attributes
//! - named body fragments (`<uic-fragment name="...">`) and the tail (`<uic-tail>`)
//! - dependencies declared with `<uic-fetch>` and `<uic-include>`
//! - page metadata from `<script type="text/uic-meta">`
//!
//! Includes are replaced by placeholder markers that the merge engine
//! resolves at render time.

pub mod tokenizer;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::domain::{Attributes, FetchDefinition, Fragment, MemoryContent, ScriptElement, StringFragment};
use crate::template::{optional_close_marker, optional_open_marker, required_marker};

pub use tokenizer::{tokenize, Tag, Token};

pub const META_SCRIPT_TYPE: &str = "text/uic-meta";
const PARAM_PREFIX: &str = "param-";

/// Maximum nesting of fragments, tails and optional includes.
pub const MAX_NESTING_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unterminated tag on line {line}")]
    UnterminatedTag { line: u64 },

    #[error("unterminated comment on line {line}")]
    UnterminatedComment { line: u64 },

    #[error("composition elements nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("missing closing </{tag}>")]
    UnclosedElement { tag: String },

    #[error("expected text content inside <{tag}>")]
    ExpectedText { tag: String },

    #[error("invalid uic-meta JSON: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("uic-meta content must be a JSON object")]
    MetaNotObject,

    #[error("invalid value {value:?} for attribute {attr} on <{tag}>")]
    InvalidAttribute {
        tag: String,
        attr: String,
        value: String,
    },

    #[error("<{tag}> requires a src attribute")]
    MissingSrc { tag: String },

    #[error("invalid src {src:?}: {source}")]
    InvalidUrl {
        src: String,
        #[source]
        source: url::ParseError,
    },
}

/// Turns a document into parsed content.
pub trait ContentParser: Send + Sync {
    fn parse(&self, content: &mut MemoryContent, input: &str) -> Result<(), ParseError>;
}

/// Parser for the `uic-*` composition markup.
#[derive(Debug, Clone, Copy)]
pub struct HtmlContentParser {
    collect_links: bool,
    collect_scripts: bool,
    all_links: bool,
}

impl Default for HtmlContentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlContentParser {
    /// Collects stylesheets and scripts.
    pub fn new() -> Self {
        Self {
            collect_links: true,
            collect_scripts: true,
            all_links: false,
        }
    }

    pub fn with_collection(collect_links: bool, collect_scripts: bool) -> Self {
        Self {
            collect_links,
            collect_scripts,
            all_links: false,
        }
    }

    /// Collect every `<link>`, not only stylesheets.
    pub fn with_all_links(mut self, all_links: bool) -> Self {
        self.all_links = all_links;
        self
    }

    fn collects_link(&self, tag: &Tag) -> bool {
        self.collect_links && (self.all_links || is_stylesheet(tag))
    }
}

impl ContentParser for HtmlContentParser {
    fn parse(&self, content: &mut MemoryContent, input: &str) -> Result<(), ParseError> {
        let base_url = Url::parse(&content.url).ok();
        let mut state = ParseState {
            tokens: tokenize(input)?.into_iter(),
            content,
            base_url,
            options: *self,
            depth: 0,
        };
        state.parse_document()
    }
}

/// Text and assets collected for one fragment.
#[derive(Debug, Default)]
struct FragmentParts {
    text: String,
    stylesheets: Vec<Attributes>,
    scripts: Vec<ScriptElement>,
}

impl FragmentParts {
    fn has_assets(&self) -> bool {
        !self.stylesheets.is_empty() || !self.scripts.is_empty()
    }

    fn into_fragment(self) -> Arc<dyn Fragment> {
        Arc::new(StringFragment::with_assets(
            self.text,
            self.stylesheets,
            self.scripts,
        ))
    }
}

struct ParseState<'c> {
    tokens: std::vec::IntoIter<Token>,
    content: &'c mut MemoryContent,
    base_url: Option<Url>,
    options: HtmlContentParser,
    depth: usize,
}

impl ParseState<'_> {
    fn next(&mut self) -> Result<Option<Token>, ParseError> {
        Ok(self.tokens.next())
    }

    fn parse_document(&mut self) -> Result<(), ParseError> {
        let mut top = FragmentParts::default();
        let mut saw_body = false;

        while let Some(token) = self.next()? {
            match token {
                Token::StartTag(tag) if tag.name == "head" => self.parse_head()?,
                Token::StartTag(tag) if tag.name == "body" => {
                    saw_body = true;
                    self.parse_body(tag)?;
                }
                Token::StartTag(tag) if tag.name == "html" => {}
                Token::EndTag(name) if matches!(name.as_str(), "html" | "head" | "body") => {}
                Token::Doctype(_) => {}
                other => self.handle(other, &mut top)?,
            }
        }

        if !saw_body {
            self.set_default_fragment(top);
        }
        Ok(())
    }

    fn parse_head(&mut self) -> Result<(), ParseError> {
        let mut parts = self.parse_fragment("head", true)?;
        parts.text = parts.text.trim().to_string();
        if !parts.text.is_empty() || parts.has_assets() {
            self.content.head = Some(parts.into_fragment());
        }
        Ok(())
    }

    fn parse_body(&mut self, tag: Tag) -> Result<(), ParseError> {
        if !tag.attrs.is_empty() {
            self.content.body_attributes = Some(Arc::new(StringFragment::new(tag.attrs.render())));
        }
        if tag.self_closing {
            return Ok(());
        }
        let parts = self.parse_fragment("body", true)?;
        self.set_default_fragment(parts);
        Ok(())
    }

    /// Residual body text becomes the default fragment unless the document
    /// declared one, or declared others and the residue is blank.
    fn set_default_fragment(&mut self, parts: FragmentParts) {
        if self.content.body.contains_key("") {
            if !parts.text.trim().is_empty() {
                tracing::debug!("Ignoring text outside the declared default fragment of {}", self.content.url);
            }
            return;
        }
        let blank = parts.text.trim().is_empty() && !parts.has_assets();
        if blank && !self.content.body.is_empty() {
            return;
        }
        self.content.body.insert(String::new(), parts.into_fragment());
    }

    /// Parse until the closing tag `until`. EOF ends the element only when `lenient`.
    fn parse_fragment(&mut self, until: &str, lenient: bool) -> Result<FragmentParts, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let parts = self.parse_until(until, lenient);
        self.depth -= 1;
        parts
    }

    fn parse_until(&mut self, until: &str, lenient: bool) -> Result<FragmentParts, ParseError> {
        let mut parts = FragmentParts::default();
        loop {
            match self.next()? {
                None if lenient => return Ok(parts),
                None => {
                    return Err(ParseError::UnclosedElement {
                        tag: until.to_string(),
                    })
                }
                Some(Token::EndTag(name)) if name == until => return Ok(parts),
                Some(token) => self.handle(token, &mut parts)?,
            }
        }
    }

    fn handle(&mut self, token: Token, parts: &mut FragmentParts) -> Result<(), ParseError> {
        let tag = match token {
            Token::StartTag(tag) => tag,
            Token::Text(text) => {
                parts.text.push_str(&text);
                return Ok(());
            }
            other => {
                parts.text.push_str(&other.render());
                return Ok(());
            }
        };

        let name = tag.name.clone();
        match name.as_str() {
            "uic-remove" => {
                if !tag.self_closing {
                    self.skip_removed()?;
                }
            }
            "script" if tag.attrs.get("type") == Some(META_SCRIPT_TYPE) => self.parse_meta(&tag)?,
            "script" if self.options.collect_scripts => {
                let script = self.parse_script(tag)?;
                parts.scripts.push(script);
            }
            "link" if self.options.collects_link(&tag) => {
                parts.stylesheets.push(tag.attrs);
            }
            "uic-fragment" => {
                let name = tag.attrs.get("name").unwrap_or("").to_string();
                let fragment = if tag.self_closing {
                    FragmentParts::default()
                } else {
                    self.parse_fragment("uic-fragment", false)?
                };
                self.content.body.insert(name, fragment.into_fragment());
            }
            "uic-tail" => {
                let tail = if tag.self_closing {
                    FragmentParts::default()
                } else {
                    self.parse_fragment("uic-tail", false)?
                };
                self.content.tail = Some(tail.into_fragment());
            }
            "uic-fetch" => {
                let def = self.fetch_definition(&tag)?;
                self.content.required_content.push(def);
                if !tag.self_closing {
                    self.skip_until("uic-fetch")?;
                }
            }
            "uic-include" => self.parse_include(tag, parts)?,
            _ => parts.text.push_str(&tag.render()),
        }
        Ok(())
    }

    /// Drop everything up to the matching `</uic-remove>`.
    fn skip_removed(&mut self) -> Result<(), ParseError> {
        let mut depth = 1;
        while let Some(token) = self.next()? {
            match token {
                Token::StartTag(tag) if tag.name == "uic-remove" && !tag.self_closing => depth += 1,
                Token::EndTag(name) if name == "uic-remove" => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(ParseError::UnclosedElement {
            tag: "uic-remove".into(),
        })
    }

    fn skip_until(&mut self, until: &str) -> Result<(), ParseError> {
        let mut depth = 1;
        while let Some(token) = self.next()? {
            match token {
                Token::StartTag(tag) if tag.name == until && !tag.self_closing => depth += 1,
                Token::EndTag(name) if name == until => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(ParseError::UnclosedElement {
            tag: until.to_string(),
        })
    }

    fn parse_meta(&mut self, tag: &Tag) -> Result<(), ParseError> {
        if tag.self_closing {
            return Err(ParseError::ExpectedText {
                tag: "script".into(),
            });
        }
        let text = match self.next()? {
            Some(Token::Text(text)) => text,
            _ => {
                return Err(ParseError::ExpectedText {
                    tag: "script".into(),
                })
            }
        };

        match serde_json::from_str::<Value>(&text)? {
            Value::Object(map) => self.content.meta.extend(map),
            _ => return Err(ParseError::MetaNotObject),
        }

        self.expect_end("script")
    }

    fn parse_script(&mut self, tag: Tag) -> Result<ScriptElement, ParseError> {
        if tag.self_closing {
            return Ok(ScriptElement {
                attrs: tag.attrs,
                text: None,
            });
        }

        let text = match self.next()? {
            Some(Token::Text(text)) => {
                self.expect_end("script")?;
                Some(text)
            }
            Some(Token::EndTag(name)) if name == "script" => None,
            _ => {
                return Err(ParseError::ExpectedText {
                    tag: "script".into(),
                })
            }
        };

        let text = text.filter(|t| tag.attrs.get("src").is_none() || !t.trim().is_empty());
        Ok(ScriptElement {
            attrs: tag.attrs,
            text,
        })
    }

    fn expect_end(&mut self, name: &str) -> Result<(), ParseError> {
        match self.next()? {
            Some(Token::EndTag(end)) if end == name => Ok(()),
            _ => Err(ParseError::UnclosedElement {
                tag: name.to_string(),
            }),
        }
    }

    fn parse_include(&mut self, tag: Tag, parts: &mut FragmentParts) -> Result<(), ParseError> {
        let src = tag
            .attrs
            .get("src")
            .ok_or_else(|| ParseError::MissingSrc {
                tag: "uic-include".into(),
            })?
            .to_string();
        let required = bool_attr(&tag, "required")?.unwrap_or(false);

        let location = src.split_once('#').map_or(src.as_str(), |(location, _)| location);
        if !location.is_empty() {
            let params: BTreeMap<String, String> = tag
                .attrs
                .iter()
                .filter_map(|(name, value)| {
                    name.strip_prefix(PARAM_PREFIX)
                        .map(|param| (param.to_string(), value.to_string()))
                })
                .collect();

            let mut def = FetchDefinition::new(self.resolve(location)?)
                .with_name(location)
                .with_required(required)
                .with_params(params);
            def.timeout = duration_attr(&tag, "timeout")?.unwrap_or(def.timeout);
            self.content.required_content.push(def);
        }

        if required {
            parts.text.push_str(&required_marker(&src));
            if !tag.self_closing {
                self.skip_until("uic-include")?;
            }
            return Ok(());
        }

        parts.text.push_str(&optional_open_marker(&src));
        if !tag.self_closing {
            let fallback = self.parse_fragment("uic-include", false)?;
            parts.text.push_str(&fallback.text);
            parts.stylesheets.extend(fallback.stylesheets);
            parts.scripts.extend(fallback.scripts);
        }
        parts.text.push_str(&optional_close_marker(&src));
        Ok(())
    }

    fn fetch_definition(&self, tag: &Tag) -> Result<FetchDefinition, ParseError> {
        let src = tag.attrs.get("src").ok_or_else(|| ParseError::MissingSrc {
            tag: "uic-fetch".into(),
        })?;

        let mut def = FetchDefinition::new(self.resolve(src)?)
            .with_name(tag.attrs.get("name").unwrap_or(src))
            .with_required(bool_attr(tag, "required")?.unwrap_or(false));
        if let Some(timeout) = duration_attr(tag, "timeout")? {
            def.timeout = timeout;
        }
        if let Some(priority) = int_attr(tag, "priority")? {
            def.priority = priority;
        }
        def.discovered_by = tag.attrs.get("discoveredby").map(str::to_string);
        Ok(def)
    }

    /// Resolve relative sources against the document URL.
    fn resolve(&self, src: &str) -> Result<String, ParseError> {
        if Url::parse(src).is_ok() {
            return Ok(src.to_string());
        }
        match &self.base_url {
            Some(base) => base
                .join(src)
                .map(|u| u.to_string())
                .map_err(|source| ParseError::InvalidUrl {
                    src: src.to_string(),
                    source,
                }),
            None => Ok(src.to_string()),
        }
    }
}

fn is_stylesheet(tag: &Tag) -> bool {
    tag.attrs
        .get("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
}

fn invalid(tag: &Tag, attr: &str, value: &str) -> ParseError {
    ParseError::InvalidAttribute {
        tag: tag.name.clone(),
        attr: attr.to_string(),
        value: value.to_string(),
    }
}

/// Boolean attribute; a bare attribute counts as `true`.
fn bool_attr(tag: &Tag, attr: &str) -> Result<Option<bool>, ParseError> {
    match tag.attrs.get(attr) {
        None => Ok(None),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "" | "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(invalid(tag, attr, value)),
        },
    }
}

fn int_attr(tag: &Tag, attr: &str) -> Result<Option<i32>, ParseError> {
    tag.attrs
        .get(attr)
        .map(|value| value.trim().parse::<i32>().map_err(|_| invalid(tag, attr, value)))
        .transpose()
}

/// Timeout in milliseconds.
fn duration_attr(tag: &Tag, attr: &str) -> Result<Option<Duration>, ParseError> {
    tag.attrs
        .get(attr)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| invalid(tag, attr, value))
        })
        .transpose()
}
