pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod eval;
pub mod metrics;
pub mod open;
pub mod output;
pub mod query;
pub mod runtime;
pub mod screenshot;
pub mod tabs;

pub use context::{CliContext, Page};
pub use output::OutputFormat;
