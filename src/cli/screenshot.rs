use std::path::PathBuf;

use anyhow::{Context, Result};
use cdp_adapter::{ScreenshotFormat, ScreenshotOptions};
use clap::Args;
use serde::Serialize;
use tokio::fs;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ScreenshotArgs {
    /// URL to load before capturing
    pub url: String,

    /// File to write the image to
    pub out: PathBuf,

    /// Capture the whole document rather than the viewport
    #[arg(long)]
    pub full_page: bool,

    /// Image format (png, jpeg, webp)
    #[arg(long, default_value = "png")]
    pub format: ScreenshotFormat,

    /// Compression quality 0-100 (jpeg and webp only)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub quality: Option<u8>,
}

impl ScreenshotArgs {
    fn options(&self) -> ScreenshotOptions {
        ScreenshotOptions {
            format: self.format,
            quality: self.quality,
            clip: None,
            full_page: self.full_page,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScreenshotReport {
    path: PathBuf,
    format: ScreenshotFormat,
    bytes: usize,
}

pub async fn cmd_screenshot(args: ScreenshotArgs, ctx: &CliContext) -> Result<()> {
    let page = ctx.open_page(&args.url).await?;
    let image = page.session.take_screenshot(&args.options()).await;
    page.close().await;
    let image = image.context("Screenshot failed")?;

    fs::write(&args.out, &image)
        .await
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    let report = ScreenshotReport {
        path: args.out.clone(),
        format: args.format,
        bytes: image.len(),
    };
    ctx.output().print(&report, |r| {
        format!("wrote {} ({} bytes, {})", r.path.display(), r.bytes, r.format.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::env::CliArgs;
    use crate::cli::commands::Commands;
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<ScreenshotArgs, clap::Error> {
        let cli = CliArgs::try_parse_from(args)?;
        match cli.command {
            Commands::Screenshot(args) => Ok(args),
            _ => panic!("expected screenshot command"),
        }
    }

    #[test]
    fn parses_format_and_quality() {
        let args = parse(&[
            "tabwright", "screenshot", "https://a.test/", "a.jpg", "--format", "jpg", "--quality", "70",
            "--full-page",
        ])
        .unwrap();
        let options = args.options();
        assert_eq!(options.format, ScreenshotFormat::Jpeg);
        assert_eq!(options.quality, Some(70));
        assert!(options.full_page);
    }

    #[test]
    fn rejects_out_of_range_quality_and_unknown_format() {
        assert!(parse(&["tabwright", "screenshot", "u", "o.png", "--quality", "101"]).is_err());
        assert!(parse(&["tabwright", "screenshot", "u", "o.png", "--format", "gif"]).is_err());
    }
}
