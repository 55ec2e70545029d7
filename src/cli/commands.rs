use clap::Subcommand;

use super::eval::EvalArgs;
use super::open::OpenArgs;
use super::query::QueryArgs;
use super::screenshot::ScreenshotArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Load a page and report where it ended up
    Open(OpenArgs),

    /// Load a page and evaluate a script expression in it
    Eval(EvalArgs),

    /// Load a page and save a screenshot
    Screenshot(ScreenshotArgs),

    /// Load a page and describe the elements matching a CSS selector
    Query(QueryArgs),

    /// List the browser's open tabs
    Tabs,
}
