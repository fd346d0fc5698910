mod context;
mod context_builder;

pub use context::{Context, Kind};
pub use context_builder::{ContextBuilder, MultiContextBuilder};
