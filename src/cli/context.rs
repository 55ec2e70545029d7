use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::{CdpClient, NavigationPhase, Session};
use tracing::{debug, info};

use super::output::OutputFormat;
use crate::config::Config;

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> &OutputFormat {
        &self.output
    }

    pub async fn connect(&self) -> Result<CdpClient> {
        debug!(config = %self.config_path.display(), "connecting to browser");
        CdpClient::connect(self.config.browser.clone())
            .await
            .context("Failed to connect to the browser")
    }

    /// Connect, take the browser's first tab and load `url` in it.
    pub async fn open_page(&self, url: &str) -> Result<Page> {
        let client = self.connect().await?;
        let loaded = async {
            let session = client
                .initial_session()
                .await
                .context("Failed to attach to a tab")?;
            let phase = session
                .navigate(url)
                .await
                .with_context(|| format!("Failed to load {url}"))?;
            Ok::<_, anyhow::Error>((session, phase))
        }
        .await;

        match loaded {
            Ok((session, phase)) => {
                info!(url, ?phase, "page ready");
                Ok(Page {
                    client,
                    session,
                    phase,
                })
            }
            Err(err) => {
                client.shutdown().await;
                Err(err)
            }
        }
    }
}

/// A loaded tab plus the client that owns its connection.
pub struct Page {
    pub client: CdpClient,
    pub session: Session,
    pub phase: NavigationPhase,
}

impl Page {
    pub async fn close(self) {
        self.client.shutdown().await;
    }
}
