//! Mock Response Resolver - CLI Entry Point
//!
//! Resolves a single request against the mocks in a configuration file and
//! prints the response that would be sent.

use anyhow::Result;
use clap::Parser;
use mock_resolver::log_sink::ChannelLogSink;
use mock_resolver::{
    EndpointCache, InMemoryEndpointStore, RequestView, ResolutionEngine, ResolverConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-resolver",
    about = "Resolve requests against hosted mock definitions - condition matching, weighted responses, templating",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-resolver.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Project slug the mock belongs to
    #[arg(long, default_value = "demo")]
    project: String,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Path pattern of the mock endpoint, e.g. /users/{id}
    #[arg(long)]
    endpoint: Option<String>,

    /// Concrete request path, e.g. /users/42
    #[arg(long)]
    path: Option<String>,

    /// Raw query string
    #[arg(long, default_value = "")]
    query: String,

    /// Request header as 'Name: value' (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long)]
    body: Option<String>,

    /// Seed for weighted selection
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ResolverConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no mocks)");
        ResolverConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} projects, {} mocks defined)",
            config.projects.len(),
            config.mock_count()
        );
        return Ok(());
    }

    let path = match (&args.path, &args.endpoint) {
        (Some(path), _) => path.clone(),
        (None, Some(endpoint)) => endpoint.clone(),
        (None, None) => anyhow::bail!("--path or --endpoint is required"),
    };
    let endpoint_path = args.endpoint.clone().unwrap_or_else(|| path.clone());

    let mut builder = RequestView::builder(&args.method, &path)
        .query_string(&args.query)
        .path_template(&endpoint_path);
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid header {:?}, expected 'Name: value'", header))?;
        builder = builder.header(name.trim(), value.trim());
    }
    if let Some(body) = &args.body {
        builder = builder.body(body.as_bytes());
    }
    let view = builder.build();

    let store = InMemoryEndpointStore::from_config(&config);
    let (sink, writer) = ChannelLogSink::spawn(config.settings.log_channel_capacity);
    let sink = Arc::new(sink);

    let mut engine = ResolutionEngine::new(config.settings.clone(), sink.clone());
    if let Some(seed) = args.seed {
        engine = engine.with_seed(seed);
    }
    let cache = EndpointCache::new(store, Arc::clone(engine.settings()));

    let resolution = engine
        .resolve_request(&cache, &args.project, &endpoint_path, &view)
        .await;
    let outcome = resolution.outcome;
    let (status, headers, body) = resolution.result.into_http_parts();

    println!("HTTP {}", status);
    for (name, value) in headers.iter() {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", String::from_utf8_lossy(&body));

    // Close the log channel so the writer drains and exits
    drop(engine);
    drop(sink);
    let written = writer.await?;
    info!(outcome = outcome.as_str(), records = written, "Done");

    Ok(())
}
