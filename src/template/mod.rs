//! Placeholder substitution.
//!
//! Templates are plain text interspersed with `§[ ... ]§` markers:
//!
//! - `§[ path.to.value ]§` looks up a value in the data map
//! - `§[> name]§` expands the named fragment through a resolver
//! - `§[#> name]§ fallback §[/name]§` marks an optional include
//!
//! The parser emits fragment markers, the merge engine resolves them.

use std::fmt::{self, Write};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const MARKER_OPEN: &str = "§[";
pub const MARKER_CLOSE: &str = "]§";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder at byte {offset}")]
    Unterminated { offset: usize },

    #[error("optional include {name} has no closing §[/{name}]§")]
    UnclosedSection { name: String },

    #[error("fragment {name:?} not found, known fragments: {known:?}")]
    MissingFragment { name: String, known: Vec<String> },

    #[error("fragment {name:?} includes itself")]
    FragmentCycle { name: String },

    #[error("fragment reference {name:?} is not allowed here")]
    UnexpectedFragment { name: String },

    #[error("failed to write output")]
    Write(#[from] fmt::Error),
}

/// Callback expanding a nested fragment reference into the output.
pub type Resolver<'a> = dyn FnMut(&str, &mut dyn Write) -> Result<(), TemplateError> + 'a;

/// How `§[#> name]§ ... §[/name]§` sections render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionalIncludePolicy {
    /// The opening marker is an ordinary (unresolvable) variable: the fallback
    /// text always renders and the include target is never substituted.
    #[default]
    Literal,
    /// Render the include target when it resolves, the fallback otherwise.
    PreferFragment,
}

/// A fragment reference found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub optional: bool,
}

pub fn required_marker(name: &str) -> String {
    format!("{}> {}{}", MARKER_OPEN, name, MARKER_CLOSE)
}

pub fn optional_open_marker(name: &str) -> String {
    format!("{}#> {}{}", MARKER_OPEN, name, MARKER_CLOSE)
}

pub fn optional_close_marker(name: &str) -> String {
    format!("{}/{}{}", MARKER_OPEN, name, MARKER_CLOSE)
}

/// Expand `template` with the default [`OptionalIncludePolicy::Literal`] policy.
pub fn execute_template(
    out: &mut dyn Write,
    template: &str,
    data: &Map<String, Value>,
    resolver: &mut Resolver<'_>,
) -> Result<(), TemplateError> {
    execute_template_with(out, template, data, OptionalIncludePolicy::Literal, resolver)
}

pub fn execute_template_with(
    out: &mut dyn Write,
    template: &str,
    data: &Map<String, Value>,
    policy: OptionalIncludePolicy,
    resolver: &mut Resolver<'_>,
) -> Result<(), TemplateError> {
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(MARKER_OPEN) {
        out.write_str(&rest[..start])?;

        let inner_start = start + MARKER_OPEN.len();
        let len = rest[inner_start..]
            .find(MARKER_CLOSE)
            .ok_or(TemplateError::Unterminated {
                offset: offset + start,
            })?;
        let marker = rest[inner_start..inner_start + len].trim();
        let consumed = inner_start + len + MARKER_CLOSE.len();
        rest = &rest[consumed..];
        offset += consumed;

        if let Some(name) = marker.strip_prefix('>') {
            resolver(name.trim(), out)?;
            continue;
        }

        if policy == OptionalIncludePolicy::PreferFragment {
            if let Some(name) = marker.strip_prefix("#>") {
                let name = name.trim();
                let (fallback, remainder, skipped) = split_section(rest, name)?;
                let mut rendered = String::new();
                match resolver(name, &mut rendered) {
                    Ok(()) => out.write_str(&rendered)?,
                    Err(TemplateError::MissingFragment { .. }) => {
                        execute_template_with(out, fallback, data, policy, resolver)?
                    }
                    Err(e) => return Err(e),
                }
                rest = remainder;
                offset += skipped;
                continue;
            }
        }

        if let Some(value) = lookup(data, marker) {
            write_value(out, value)?;
        }
    }

    out.write_str(rest)?;
    Ok(())
}

/// Split off the fallback body of an optional section.
///
/// Returns the fallback, the text after the closing marker and the number of
/// bytes consumed.
fn split_section<'t>(rest: &'t str, name: &str) -> Result<(&'t str, &'t str, usize), TemplateError> {
    let mut search = 0;
    while let Some(found) = rest[search..].find(MARKER_OPEN) {
        let start = search + found;
        let inner_start = start + MARKER_OPEN.len();
        let Some(len) = rest[inner_start..].find(MARKER_CLOSE) else {
            break;
        };
        let end = inner_start + len + MARKER_CLOSE.len();
        let marker = rest[inner_start..inner_start + len].trim();
        if marker.strip_prefix('/').map(str::trim) == Some(name) {
            return Ok((&rest[..start], &rest[end..], end));
        }
        search = end;
    }
    Err(TemplateError::UnclosedSection {
        name: name.to_string(),
    })
}

/// Fragment references of a template, in order of appearance.
pub fn fragment_references(template: &str) -> Result<Vec<Reference>, TemplateError> {
    let mut references = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(MARKER_OPEN) {
        let inner_start = start + MARKER_OPEN.len();
        let len = rest[inner_start..]
            .find(MARKER_CLOSE)
            .ok_or(TemplateError::Unterminated {
                offset: offset + start,
            })?;
        let marker = rest[inner_start..inner_start + len].trim();

        if let Some(name) = marker.strip_prefix("#>") {
            references.push(Reference {
                name: name.trim().to_string(),
                optional: true,
            });
        } else if let Some(name) = marker.strip_prefix('>') {
            references.push(Reference {
                name: name.trim().to_string(),
                optional: false,
            });
        }

        let consumed = inner_start + len + MARKER_CLOSE.len();
        rest = &rest[consumed..];
        offset += consumed;
    }

    Ok(references)
}

/// Resolve a dotted path: the whole path as a literal key first, then by descent.
pub fn lookup<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a value; multi-valued entries render their first value.
fn write_value(out: &mut dyn Write, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => out.write_str(s),
        Value::Number(n) => write!(out, "{}", n),
        Value::Bool(b) => write!(out, "{}", b),
        Value::Array(values) => match values.first() {
            Some(first) => write_value(out, first),
            None => Ok(()),
        },
        Value::Null | Value::Object(_) => Ok(()),
    }
}
