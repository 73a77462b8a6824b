mod args;
mod commands;

pub use args::{Cli, Commands, FormatArg};

use anyhow::Result;

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Proxy {
            target,
            port,
            output,
            timeout_secs,
            reassemble,
        } => commands::proxy(target, port, output, timeout_secs, reassemble).await,
        Commands::Cook {
            input,
            output,
            format,
        } => commands::cook(&input, &output, format.into()),
        Commands::Viewer {
            trace,
            port,
            assets,
        } => commands::viewer(&trace, port, assets).await,
    }
}
