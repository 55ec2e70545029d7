//! File-backed settings for the `tabwright` binary.

use cdp_adapter::CdpConfig;
use serde::{Deserialize, Serialize};

/// Top-level YAML document.
///
/// ```yaml
/// browser:
///   headless: false
///   navigation_timeout_ms: 15000
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: CdpConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_browser_section_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "browser:\n  headless: false\n  navigation_timeout_ms: 1500\n",
        )
        .unwrap();
        assert!(!config.browser.headless);
        assert_eq!(config.browser.navigation_timeout_ms, 1500);
        assert_eq!(config.browser.implicit_wait_ms, 10_000);
        assert_eq!(config.browser.poll_interval_ms, 100);
        assert!(config.browser.websocket_url.is_none());
    }

    #[test]
    fn empty_document_is_default() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.browser.navigation_timeout_ms, 30_000);
    }
}
