use anyhow::{Context, Result};
use cdp_adapter::{Element, Session};
use clap::Args;
use serde::Serialize;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct QueryArgs {
    /// URL to load before querying
    pub url: String,

    /// CSS selector
    pub selector: String,

    /// Poll until the selector matches (bounded by the implicit wait)
    #[arg(long)]
    pub wait: bool,

    /// Require the match to be visible; implies --wait
    #[arg(long)]
    pub visible: bool,
}

#[derive(Debug, Serialize)]
struct ElementReport {
    description: String,
    text: String,
}

async fn describe(element: &Element) -> Result<ElementReport> {
    Ok(ElementReport {
        description: element.description().unwrap_or_default().to_string(),
        text: element.text().await.context("Failed to read element text")?,
    })
}

async fn collect(session: &Session, args: &QueryArgs) -> Result<Vec<ElementReport>> {
    let elements = if args.wait || args.visible {
        let element = session
            .find_ready(&args.selector, args.visible)
            .await
            .with_context(|| format!("{} never became ready", args.selector))?;
        vec![element]
    } else {
        session.query_all(&args.selector).await
    };

    let mut reports = Vec::with_capacity(elements.len());
    for element in &elements {
        reports.push(describe(element).await?);
    }
    Ok(reports)
}

pub async fn cmd_query(args: QueryArgs, ctx: &CliContext) -> Result<()> {
    let page = ctx.open_page(&args.url).await?;
    let reports = collect(&page.session, &args).await;
    page.close().await;
    let reports = reports?;

    ctx.output().print(&reports, |found| {
        if found.is_empty() {
            return format!("no elements match {}", args.selector);
        }
        found
            .iter()
            .map(|r| format!("{}\t{}", r.description, r.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
