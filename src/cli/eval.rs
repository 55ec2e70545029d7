use anyhow::{Context, Result};
use clap::Args;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct EvalArgs {
    /// URL to load before evaluating
    pub url: String,

    /// JavaScript expression to evaluate in the page
    pub expression: String,

    /// Wait for a returned promise to settle
    #[arg(long = "await")]
    pub await_promise: bool,
}

pub async fn cmd_eval(args: EvalArgs, ctx: &CliContext) -> Result<()> {
    let page = ctx.open_page(&args.url).await?;
    let value = page
        .session
        .evaluate(&args.expression, args.await_promise)
        .await;
    page.close().await;
    let value = value.context("Evaluation failed")?;

    ctx.output().print(&value, |v| match v {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    })
}
