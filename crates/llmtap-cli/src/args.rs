use clap::{Parser, Subcommand, ValueEnum};
use llmtap_engine::ApiFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llmtap")]
#[command(about = "Record and visualize LLM API traffic", long_about = None)]
#[command(version)]
pub struct Cli {
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Run the transparent capture proxy",
        long_about = "Run the transparent capture proxy.

Point your client library's base URL at the proxy; every request is forwarded
verbatim to --target and each completed exchange is appended to the capture
log. SSE responses are streamed through with the raw events captured for the
cook pass (use --reassemble to store the reassembled response instead)."
    )]
    Proxy {
        #[arg(long, help = "Upstream base URL (scheme + host, optional base path)")]
        target: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        #[arg(long, default_value = "capture.jsonl", help = "Capture log path")]
        output: PathBuf,

        #[arg(long, default_value_t = 600, help = "Per-exchange upstream timeout")]
        timeout_secs: u64,

        #[arg(long, help = "Reassemble SSE streams at capture time")]
        reassemble: bool,
    },

    #[command(about = "Normalize a capture log into a viewer bundle")]
    Cook {
        #[arg(help = "Capture log (JSONL) or JSON array of records")]
        input: PathBuf,

        #[arg(short, long, help = "Bundle output path")]
        output: PathBuf,

        #[arg(long, default_value = "auto", help = "API format of the records")]
        format: FormatArg,
    },

    #[command(about = "Serve the viewer UI for a trace file (auto-cooks .jsonl input)")]
    Viewer {
        #[arg(help = "Trace file: capture log or cooked bundle")]
        trace: PathBuf,

        #[arg(long, default_value_t = 8765)]
        port: u16,

        #[arg(long, help = "Directory holding the built viewer front-end")]
        assets: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Auto,
    Openai,
    Claude,
    Gemini,
}

impl From<FormatArg> for ApiFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Auto => ApiFormat::Auto,
            FormatArg::Openai => ApiFormat::Openai,
            FormatArg::Claude => ApiFormat::Claude,
            FormatArg::Gemini => ApiFormat::Gemini,
        }
    }
}
