//! Tether - live-binding template engine
//!
//! Templates compile to immutable [`Program`]s. Rendering one against a
//! [`Scope`] yields a DOM fragment whose text, attributes and sections stay
//! in sync with the observable data they read.

pub mod batch;
pub mod bindings;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod dom;
pub mod error;
pub mod expression;
pub mod loader;
pub mod observable;
pub mod pending;
pub mod registry;
pub mod render;
pub mod scope;
pub mod template;
pub mod value;
pub mod view;

pub use batch::{Batch, BatchGuard};
pub use cache::TemplateCache;
pub use compiler::{Program, Renderer, SubRenderer};
pub use config::ViewConfig;
pub use dom::{Detach, Node};
pub use error::{FixSuggestion, TetherError};
pub use loader::{DefaultLoader, FsLoader, HttpLoader, MemoryLoader, TemplateLoader};
pub use observable::{ObservableList, ObservableMap, Subscription};
pub use pending::{Deferred, PendingSource, PendingState, Rejection};
pub use registry::{Hookup, Matcher, Registry, TagData};
pub use scope::{ReadOptions, Scope};
pub use value::{Func, Value};
pub use view::{
    batch_start, batch_stop, compile, register_attribute, register_tag, Rendered, TemplateSource,
    View,
};
