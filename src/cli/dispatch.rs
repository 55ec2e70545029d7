use super::eval::cmd_eval;
use super::open::cmd_open;
use super::query::cmd_query;
use super::screenshot::cmd_screenshot;
use super::tabs::cmd_tabs;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(command: Commands, ctx: &CliContext) -> Result<()> {
    match command {
        Commands::Open(args) => cmd_open(args, ctx).await,
        Commands::Eval(args) => cmd_eval(args, ctx).await,
        Commands::Screenshot(args) => cmd_screenshot(args, ctx).await,
        Commands::Query(args) => cmd_query(args, ctx).await,
        Commands::Tabs => cmd_tabs(ctx).await,
    }
}
