//! Quickdev CLI
//!
//! Drives the in-memory dev server against a directory on disk, which is
//! useful for inspecting what a preview would receive.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use regex::Regex;
use tracing_subscriber::EnvFilter;

use quickdev::prelude::*;
use quickdev::VERSION;

static MODULE_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script\b[^>]*\btype=["']module["'][^>]*\bsrc=["']([^"']+)["']"#).expect("module script pattern")
});

#[derive(Parser)]
#[command(name = "quickdev")]
#[command(author, version, about = "In-memory dev server with hot module replacement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one request against a directory and print the response
    Request {
        /// Project root
        dir: PathBuf,
        /// Request URL, e.g. /src/app
        url: String,
        /// Print the status line and headers too
        #[arg(short = 'i', long)]
        include_headers: bool,
    },

    /// Request the given URLs and print the resulting module graph
    Graph {
        dir: PathBuf,
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print the HMR client script
    Client,

    /// Rewrite a file in memory and print the HMR payloads it produces
    Touch {
        dir: PathBuf,
        /// File to change, relative to the project root
        path: String,
        /// New content; the current content is rewritten unchanged when absent
        #[arg(long)]
        content: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => DevServerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DevServerConfig::default(),
    };

    match cli.command {
        Commands::Request {
            dir,
            url,
            include_headers,
        } => run_request(&dir, &url, include_headers, config),
        Commands::Graph { dir, urls } => run_graph(&dir, &urls, config),
        Commands::Client => {
            let server = DevServer::new(FileMap::new(), config);
            println!("{}", server.hmr_client_code());
            Ok(())
        }
        Commands::Touch { dir, path, content } => run_touch(&dir, &path, content, config),
    }
}

fn setup_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn start(dir: &Path, config: DevServerConfig) -> anyhow::Result<DevServer> {
    let files = FileMap::load_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut server = DevServer::new(files, config);
    server.add_plugin(StylesheetPlugin::new())?;
    server.add_plugin(ComponentRefreshPlugin::new())?;
    server.listen()?;
    Ok(server)
}

fn run_request(dir: &Path, url: &str, include_headers: bool, config: DevServerConfig) -> anyhow::Result<()> {
    let server = start(dir, config)?;
    let res = server.handle_request(&VirtualRequest::get(url));
    if include_headers {
        println!("HTTP/1.1 {} {}", res.status, quickdev::server::reason_phrase(res.status));
        let mut headers: Vec<_> = res.headers.iter().collect();
        headers.sort();
        for (name, value) in headers {
            println!("{}: {}", name, value);
        }
        println!();
    }
    println!("{}", res.body);
    if !res.is_success() && res.status != 304 {
        bail!("request for {} failed with status {}", url, res.status);
    }
    Ok(())
}

fn run_graph(dir: &Path, urls: &[String], config: DevServerConfig) -> anyhow::Result<()> {
    let server = start(dir, config)?;
    for url in urls {
        let count = server.warm_up(url)?;
        tracing::info!(url = %url, modules = count, "warmed");
    }
    let summaries = server.graph().summaries();
    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

fn run_touch(dir: &Path, path: &str, content: Option<String>, config: DevServerConfig) -> anyhow::Result<()> {
    let server = start(dir, config)?;

    // Prime the graph from the entry document's module scripts
    if let Some(html) = server.files().get("/index.html") {
        for caps in MODULE_SCRIPT.captures_iter(&html) {
            server.warm_up(&caps[1])?;
        }
    }

    let content = match content.or_else(|| server.files().get(path)) {
        Some(content) => content,
        None => bail!("{} does not exist in {}", path, dir.display()),
    };
    let conn = server.connect_hmr()?;
    conn.drain();

    let sent = server.write_file(path, content)?;
    if sent.is_empty() {
        eprintln!("no HMR payload for {} (quickdev {})", path, VERSION);
    }
    for payload in &sent {
        println!("{}", payload.to_json()?);
    }
    Ok(())
}
