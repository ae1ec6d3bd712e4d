use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing::{info, warn};

use perl_language_server::config::ServerConfig;
use perl_language_server::logging::init_logger;
use perl_language_server::lsp::backend::PerlBackend;

/// Hover and symbol provider for Perl, speaking LSP over stdio.
#[derive(Parser, Debug)]
#[command(name = "perl-language-server", version, about)]
struct Args {
    /// Log level for stderr (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Disable ANSI colors in stderr output
    #[arg(long)]
    no_color: bool,

    /// Do not write a session log under the user cache directory
    #[arg(long)]
    no_file_logging: bool,

    /// Interval between document index checks, in milliseconds
    #[arg(long)]
    index_poll_ms: Option<u64>,

    /// Number of index checks before a document is reported missing
    #[arg(long)]
    index_max_attempts: Option<u32>,

    /// Exit when this process (the editor) goes away
    #[arg(long)]
    client_process_id: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = init_logger(args.no_color, args.log_level.as_deref(), !args.no_file_logging)?;

    let config = ServerConfig::from_env_or_default(args.index_poll_ms, args.index_max_attempts);
    info!(
        "Starting {} {} (index wait bound {:?})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.index_wait.total_bound()
    );

    if let Some(pid) = args.client_process_id {
        watch_client_process(pid);
    }

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| PerlBackend::new(client, config));

    Server::new(stdin, stdout, socket)
        .serve(service)
        .await;

    info!("Server stopped");
    Ok(())
}

/// Exits the process once the client process has terminated.
fn watch_client_process(pid: u32) {
    let proc_path = std::path::PathBuf::from(format!("/proc/{}", pid));
    if !cfg!(target_os = "linux") || !proc_path.exists() {
        warn!("Cannot monitor client process {}; continuing without it", pid);
        return;
    }

    info!("Monitoring client process {}", pid);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            if !proc_path.exists() {
                warn!("Client process {} exited; shutting down", pid);
                std::process::exit(0);
            }
        }
    });
}
