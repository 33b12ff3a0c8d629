pub mod compose;
pub mod context;
pub mod error;

pub use compose::{Composer, Composition};
pub use context::AppContext;
pub use error::{ComposeError, Result};
