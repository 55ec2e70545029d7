use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct OpenArgs {
    /// URL to load
    pub url: String,
}

#[derive(Debug, Serialize)]
struct OpenReport {
    url: String,
    title: String,
    phase: String,
}

pub async fn cmd_open(args: OpenArgs, ctx: &CliContext) -> Result<()> {
    let page = ctx.open_page(&args.url).await?;
    let entry = page.session.navigation_entry().await;
    let phase = format!("{:?}", page.phase);
    page.close().await;
    let entry = entry?;

    let report = OpenReport {
        url: entry.url,
        title: entry.title,
        phase,
    };
    ctx.output().print(&report, |r| {
        if r.title.is_empty() {
            r.url.clone()
        } else {
            format!("{}\n{}", r.title, r.url)
        }
    })
}
