use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};

/// Prometheus text exposition of the client's counters.
pub fn render_metrics() -> Result<String> {
    let registry = Registry::new();
    cdp_adapter::metrics::register_metrics(&registry);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("metrics text is not utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_command_counters() {
        cdp_adapter::metrics::record_command("Page.navigate");
        let text = render_metrics().unwrap();
        assert!(text.contains("tabwright_cdp_commands_total"), "{text}");
        assert!(text.contains("method=\"Page.navigate\""), "{text}");
    }
}
