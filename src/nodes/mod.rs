//! Node handlers for the plugin graph.
//!
//! Each node kind in a plugin graph is backed by exactly one handler.
//! Handlers are pure with respect to the graph: they read their node's
//! configuration and upstream outputs and return their own outputs.
//! Only the entrypoint handler touches the outside world.

mod arguments;
mod conditional;
mod context;
mod entrypoint;
mod export;
mod exposure;
mod for_each;
mod modifier;
mod registry;
mod schema;
mod types;
mod visualizers;

pub use arguments::ArgumentsHandler;
pub use conditional::ConditionalHandler;
pub use context::ContextHandler;
pub use entrypoint::EntrypointHandler;
pub use export::ExportHandler;
pub use exposure::ExposureHandler;
pub use for_each::ForEachHandler;
pub use modifier::ModifierHandler;
pub use registry::NodeRegistry;
pub use schema::SchemaHandler;
pub use types::{NodeHandler, NodeOutputs, UpstreamOutputs};
pub use visualizers::VisualizersHandler;
