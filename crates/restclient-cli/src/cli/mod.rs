//! CLI for the restclient HTTP job runner.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use restclient_core::config::RestClientConfig;
use std::path::PathBuf;

use commands::{run_request, run_smoke, Verb};

/// Top-level CLI for restclient.
#[derive(Debug, Parser)]
#[command(name = "restclient")]
#[command(about = "restclient: keep-alive HTTP/1.1 client and per-host job runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// GET a URL and print the body (or save it with --output).
    Get {
        /// HTTP/HTTPS URL; a bare hostname means https.
        url: String,
        /// Write the body to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// DELETE a URL.
    Delete {
        url: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// PUT a body to a URL.
    Put {
        url: String,
        /// Request body; empty when omitted.
        #[arg(long, short)]
        data: Option<String>,
    },

    /// POST a body to a URL.
    Post {
        url: String,
        #[arg(long, short)]
        data: Option<String>,
    },

    /// PATCH a URL with a body.
    Patch {
        url: String,
        #[arg(long, short)]
        data: Option<String>,
    },

    /// Run the built-in request jobs against an httpbin-compatible server.
    Smoke {
        /// Base URL of the server.
        #[arg(long, default_value = "https://httpbin.org")]
        base: String,
        /// Directory for the download job; skipped when omitted.
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
        /// Only run jobs whose name contains one of these substrings.
        filters: Vec<String>,
    },
}

impl CliCommand {
    pub async fn run_from_args(cfg: RestClientConfig) -> Result<()> {
        let cli = Cli::parse();
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get { url, output } => {
                run_request(&cfg, Verb::Get, &url, None, output.as_deref()).await?
            }
            CliCommand::Delete { url, output } => {
                run_request(&cfg, Verb::Delete, &url, None, output.as_deref()).await?
            }
            CliCommand::Put { url, data } => run_request(&cfg, Verb::Put, &url, data, None).await?,
            CliCommand::Post { url, data } => {
                run_request(&cfg, Verb::Post, &url, data, None).await?
            }
            CliCommand::Patch { url, data } => {
                run_request(&cfg, Verb::Patch, &url, data, None).await?
            }
            CliCommand::Smoke {
                base,
                save_dir,
                filters,
            } => run_smoke(cfg, &base, save_dir, &filters).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
