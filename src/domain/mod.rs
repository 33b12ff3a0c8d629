pub mod content;
pub mod definition;
pub mod fragment;
pub mod headers;

pub use content::{Content, MemoryContent, RawContent};
pub use definition::{FetchDefinition, RawResponse, ResponseProcessor, DEFAULT_TIMEOUT};
pub use fragment::{render_stylesheet, Attributes, Fragment, ScriptElement, StringFragment};
