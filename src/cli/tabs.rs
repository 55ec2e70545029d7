use anyhow::{Context, Result};
use cdp_adapter::TargetInfo;

use super::context::CliContext;

pub async fn cmd_tabs(ctx: &CliContext) -> Result<()> {
    let client = ctx.connect().await?;
    let targets = client.targets().await;
    client.shutdown().await;
    let tabs: Vec<TargetInfo> = targets
        .context("Failed to enumerate targets")?
        .into_iter()
        .filter(TargetInfo::is_page)
        .collect();

    ctx.output().print(&tabs, |tabs| {
        tabs.iter()
            .map(|tab| format!("{}\t{}\t{}", tab.target_id, tab.title, tab.url))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
