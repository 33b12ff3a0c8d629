//! Merges fetched contents into one HTML document.
//!
//! Contents are added in ascending priority order. Body fragments are
//! registered under their local name and under `<content>#<local>`; on a
//! name collision the fragment with the higher (or equal, later) priority
//! wins. Rendering expands the default fragment, resolving nested
//! `§[> name]§` references against the registered fragments.

pub mod dedup;

pub use dedup::{DeduplicationMode, DeduplicationStrategy, HrefSrcDeduplication, IdentityDeduplication};

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};
use std::io;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::app::ComposeError;
use crate::domain::{render_stylesheet, Content, Fragment};
use crate::template::{fragment_references, OptionalIncludePolicy, TemplateError};

/// Render failures share the template error type.
pub type MergeError = TemplateError;

pub const MAX_RENDER_DEPTH: usize = 64;

struct Registered {
    priority: i32,
    fragment: Arc<dyn Fragment>,
}

pub struct ContentMerge {
    meta: Map<String, Value>,
    head: Vec<Arc<dyn Fragment>>,
    body_attributes: Vec<Arc<dyn Fragment>>,
    tail: Vec<Arc<dyn Fragment>>,
    body: HashMap<String, Registered>,
    dedup: Arc<dyn DeduplicationStrategy>,
    policy: OptionalIncludePolicy,
    buffered: bool,
}

impl Default for ContentMerge {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentMerge {
    /// Identity deduplication, literal optional includes, buffered output.
    pub fn new() -> Self {
        Self {
            meta: Map::new(),
            head: Vec::new(),
            body_attributes: Vec::new(),
            tail: Vec::new(),
            body: HashMap::new(),
            dedup: Arc::new(IdentityDeduplication),
            policy: OptionalIncludePolicy::Literal,
            buffered: true,
        }
    }

    pub fn with_deduplication(mut self, dedup: Arc<dyn DeduplicationStrategy>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_policy(mut self, policy: OptionalIncludePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Render into a buffer before writing (default) or stream directly.
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    pub fn add_content(&mut self, name: &str, content: &dyn Content, priority: i32) {
        if let Some(meta) = content.meta() {
            self.meta.extend(meta.clone());
        }
        if let Some(head) = content.head() {
            self.head.push(Arc::clone(head));
        }
        if let Some(attrs) = content.body_attributes() {
            self.body_attributes.push(Arc::clone(attrs));
        }
        if let Some(tail) = content.tail() {
            self.tail.push(Arc::clone(tail));
        }

        if let Some(body) = content.body() {
            for (local, fragment) in body {
                self.add_fragment(local.clone(), Arc::clone(fragment), priority);
                self.add_fragment(format!("{}#{}", name, local), Arc::clone(fragment), priority);
            }
        }
    }

    /// Register a body fragment unless one with a higher priority holds the name.
    pub fn add_fragment(&mut self, name: impl Into<String>, fragment: Arc<dyn Fragment>, priority: i32) {
        let name = name.into();
        if let Some(existing) = self.body.get(&name) {
            if existing.priority > priority {
                return;
            }
        }
        self.body.insert(name, Registered { priority, fragment });
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.meta
    }

    /// Registered fragment names, sorted.
    pub fn fragment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.body.keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Option<&Arc<dyn Fragment>> {
        if let Some(found) = self.body.get(name) {
            return Some(&found.fragment);
        }
        let fallback = match name.split_once('#') {
            // `main` addresses the default fragment of content `main`.
            None => format!("{}#", name),
            // `#b` and `other#b` fall back to the local name.
            Some((_, local)) => local.to_string(),
        };
        self.body.get(&fallback).map(|r| &r.fragment)
    }

    pub fn get_body_fragment_by_name(&self, name: &str) -> Result<Arc<dyn Fragment>, MergeError> {
        self.lookup(name)
            .cloned()
            .ok_or_else(|| self.missing(name))
    }

    fn missing(&self, name: &str) -> MergeError {
        TemplateError::MissingFragment {
            name: name.to_string(),
            known: self.fragment_names(),
        }
    }

    /// Render the document into a string.
    pub fn get_html(&self) -> Result<String, MergeError> {
        let mut out = String::new();
        self.write_html(&mut out)?;
        Ok(out)
    }

    /// Render the document. Every referenced fragment is resolved before
    /// the first byte is written.
    pub fn write_html(&self, out: &mut dyn Write) -> Result<(), MergeError> {
        let referenced = self.referenced_fragments()?;
        if self.buffered {
            let mut buffer = String::new();
            self.render(&mut buffer, &referenced)?;
            out.write_str(&buffer)?;
            return Ok(());
        }
        self.render(out, &referenced)
    }

    /// Render into an [`io::Write`] sink.
    pub fn stream_html(&self, sink: &mut dyn io::Write) -> crate::app::Result<()> {
        let mut adapter = IoAdapter { sink, error: None };
        match self.write_html(&mut adapter) {
            Ok(()) => Ok(()),
            Err(e) => match adapter.error.take() {
                Some(io_error) => Err(io_error.into()),
                None => Err(ComposeError::Template(e)),
            },
        }
    }

    /// Fragments the document renders, in emission order (head first).
    fn referenced_fragments(&self) -> Result<Vec<Arc<dyn Fragment>>, MergeError> {
        let mut walk = Walk::default();

        for head in &self.head {
            self.visit("<head>", head, &mut walk)?;
        }
        for attrs in &self.body_attributes {
            self.visit("<body>", attrs, &mut walk)?;
        }
        let default = self.get_body_fragment_by_name("")?;
        self.visit("", &default, &mut walk)?;
        for tail in &self.tail {
            self.visit("<tail>", tail, &mut walk)?;
        }

        Ok(walk.referenced)
    }

    fn visit(&self, name: &str, fragment: &Arc<dyn Fragment>, walk: &mut Walk) -> Result<(), MergeError> {
        let id = fragment_id(fragment);
        if walk.stack.contains(&id) || walk.stack.len() >= MAX_RENDER_DEPTH {
            return Err(TemplateError::FragmentCycle {
                name: name.to_string(),
            });
        }
        if !walk.seen.insert(id) {
            return Ok(());
        }
        walk.referenced.push(Arc::clone(fragment));

        walk.stack.push(id);
        for reference in fragment_references(fragment.content())? {
            if reference.optional && self.policy == OptionalIncludePolicy::Literal {
                continue;
            }
            let Some(nested) = self.lookup(&reference.name).map(Arc::clone) else {
                if reference.optional {
                    continue;
                }
                return Err(self.missing(&reference.name));
            };
            if reference.optional {
                self.visit_optional(&reference.name, &nested, walk)?;
            } else {
                self.visit(&reference.name, &nested, walk)?;
            }
        }
        walk.stack.pop();
        Ok(())
    }

    /// A missing fragment below an optional include selects its fallback,
    /// so the branch is dropped from the walk instead of failing it.
    fn visit_optional(&self, name: &str, fragment: &Arc<dyn Fragment>, walk: &mut Walk) -> Result<(), MergeError> {
        let stack = walk.stack.len();
        let referenced = walk.referenced.len();
        match self.visit(name, fragment, walk) {
            Err(TemplateError::MissingFragment { .. }) => {
                walk.stack.truncate(stack);
                for dropped in walk.referenced.drain(referenced..) {
                    walk.seen.remove(&fragment_id(&dropped));
                }
                Ok(())
            }
            other => other,
        }
    }

    fn render(&self, out: &mut dyn Write, referenced: &[Arc<dyn Fragment>]) -> Result<(), MergeError> {
        out.write_str("<html><head>")?;
        for head in &self.head {
            self.render_fragment("<head>", head.as_ref(), out, 0)?;
        }

        let links = self.dedup.stylesheets(
            referenced
                .iter()
                .flat_map(|f| f.stylesheets().iter().cloned())
                .collect(),
        );
        for link in &links {
            out.write_str(&render_stylesheet(link))?;
        }
        let scripts = self.dedup.scripts(
            referenced
                .iter()
                .flat_map(|f| f.scripts().iter().cloned())
                .collect(),
        );
        for script in &scripts {
            out.write_str(&script.render())?;
        }

        out.write_str("</head><body")?;
        for attrs in &self.body_attributes {
            out.write_char(' ')?;
            self.render_fragment("<body>", attrs.as_ref(), out, 0)?;
        }
        out.write_char('>')?;

        let default = self.get_body_fragment_by_name("")?;
        self.render_fragment("", default.as_ref(), out, 0)?;
        for tail in &self.tail {
            self.render_fragment("<tail>", tail.as_ref(), out, 0)?;
        }
        out.write_str("</body></html>")?;
        Ok(())
    }

    fn render_fragment(
        &self,
        name: &str,
        fragment: &dyn Fragment,
        out: &mut dyn Write,
        depth: usize,
    ) -> Result<(), MergeError> {
        if depth > MAX_RENDER_DEPTH {
            return Err(TemplateError::FragmentCycle {
                name: name.to_string(),
            });
        }
        let mut resolver = |nested: &str, out: &mut dyn Write| -> Result<(), TemplateError> {
            let fragment = self.get_body_fragment_by_name(nested)?;
            self.render_fragment(nested, fragment.as_ref(), out, depth + 1)
        };
        fragment.execute(out, &self.meta, self.policy, &mut resolver)
    }
}

#[derive(Default)]
struct Walk {
    stack: Vec<usize>,
    seen: HashSet<usize>,
    referenced: Vec<Arc<dyn Fragment>>,
}

fn fragment_id(fragment: &Arc<dyn Fragment>) -> usize {
    Arc::as_ptr(fragment) as *const () as usize
}

/// Adapts an `io::Write` sink to `fmt::Write`, keeping the first I/O error.
struct IoAdapter<'a> {
    sink: &'a mut dyn io::Write,
    error: Option<io::Error>,
}

impl Write for IoAdapter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sink.write_all(s.as_bytes()).map_err(|e| {
            if self.error.is_none() {
                self.error = Some(e);
            }
            fmt::Error
        })
    }
}
