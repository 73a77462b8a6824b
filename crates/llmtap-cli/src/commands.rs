use anyhow::{Context, Result};
use llmtap_engine::ApiFormat;
use llmtap_proxy::ProxyConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub async fn proxy(
    target: String,
    port: u16,
    output: PathBuf,
    timeout_secs: u64,
    reassemble: bool,
) -> Result<()> {
    llmtap_proxy::run_proxy(ProxyConfig {
        port,
        target,
        output,
        timeout: Duration::from_secs(timeout_secs),
        reassemble,
    })
    .await
}

pub fn cook(input: &Path, output: &Path, format: ApiFormat) -> Result<()> {
    let (records, diagnostics) = llmtap_engine::load_records(input)
        .with_context(|| format!("read {}", input.display()))?;
    for diagnostic in &diagnostics {
        eprintln!("skipping {}", diagnostic);
    }

    let outcome = llmtap_engine::cook(&records, format);
    for skipped in &outcome.skipped {
        eprintln!("skipping {}", skipped);
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
    }
    let rendered =
        serde_json::to_string_pretty(&outcome.bundle).context("serialize bundle")?;
    std::fs::write(output, rendered).with_context(|| format!("write {}", output.display()))?;

    eprintln!("Processed {} records", records.len());
    eprintln!("  Messages: {} (deduplicated)", outcome.bundle.messages.len());
    eprintln!("  Tools: {} (deduplicated)", outcome.bundle.tools.len());
    eprintln!("  Requests: {}", outcome.bundle.requests.len());
    eprintln!("Output written to: {}", output.display());
    Ok(())
}

pub async fn viewer(trace: &Path, port: u16, assets: Option<PathBuf>) -> Result<()> {
    if let Some(dir) = &assets {
        if !dir.is_dir() {
            anyhow::bail!("viewer assets directory not found: {}", dir.display());
        }
    }
    llmtap_proxy::run_viewer(trace, port, assets).await
}
