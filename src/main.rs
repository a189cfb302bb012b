use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::{error, info};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use opwatch::network::{self, metrics, AdminState, ScrapeStats};
use opwatch::operations::{self, CollectContext};
use opwatch::Config;

struct RotatingFile {
    path: String,
    max_size: u64,
    max_files: u32,
    file: File,
    current_size: u64,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    if let Ok(path) = std::env::var("OPWATCH_LOG_FILE") {
        // log records go to the rotated file through env_logger and bypass
        // the tracing layer.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

        let max_size_mb = std::env::var("OPWATCH_LOG_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(10);
        let max_files = std::env::var("OPWATCH_LOG_MAX_FILES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3);

        if let Ok(rot) = RotatingFile::new(path, max_size_mb * 1024 * 1024, max_files) {
            builder.target(env_logger::Target::Pipe(Box::new(rot)));
        }

        let _ = builder.try_init();
    } else {
        let _ = LogTracer::init();
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

impl RotatingFile {
    fn new(path: String, max_size: u64, max_files: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_size,
            max_files,
            file,
            current_size,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        // path.N-1 -> path.N, ..., path -> path.1
        for i in (1..self.max_files).rev() {
            let src = format!("{}.{}", self.path, i);
            let dst = format!("{}.{}", self.path, i + 1);
            let _ = std::fs::rename(&src, &dst);
        }

        let _ = std::fs::rename(&self.path, format!("{}.1", self.path));

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.current_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Parser)]
#[command(name = "opwatch")]
#[command(about = "Exports MongoDB long-running operation and index build metrics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct Overrides {
    /// JSON config file; environment and flags override its values
    #[arg(short, long)]
    config: Option<String>,

    /// MongoDB connection string
    #[arg(long)]
    mongodb_uri: Option<String>,

    /// Metric name prefix
    #[arg(long)]
    namespace: Option<String>,

    /// Deadline for one collection cycle, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve /metrics and /health over HTTP
    Serve {
        #[command(flatten)]
        overrides: Overrides,

        /// Address to listen on, e.g. 0.0.0.0:9216
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Run one collection cycle and print the metrics
    Collect {
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn load_config(overrides: &Overrides, listen: Option<String>) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &overrides.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;

    if let Some(uri) = &overrides.mongodb_uri {
        config.mongodb_uri = uri.clone();
    }
    if let Some(namespace) = &overrides.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(timeout_ms) = overrides.timeout_ms {
        config.collect_timeout_ms = timeout_ms;
    }
    if let Some(listen) = listen {
        config.listen_address = listen;
    }

    config.validate()?;
    Ok(config)
}

async fn collect_once(config: &Config) -> anyhow::Result<()> {
    let client = network::mongo::connect(&config.mongodb_uri, "opwatch").await?;
    let ctx = CollectContext::with_timeout(config.collect_timeout());
    let stats = ScrapeStats::default();

    let status = operations::get_operations_status(&client, &ctx).await;
    stats.record(status.is_some());
    print!("{}", metrics::render(&config.namespace, status.as_ref(), &stats));

    if status.is_none() {
        anyhow::bail!("no operations status collected");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { overrides, listen } => {
            let config = load_config(&overrides, listen)?;
            let addr = config.listen_addr()?;

            info!(
                "Starting opwatch for namespace '{}' (timeout={}ms)",
                config.namespace, config.collect_timeout_ms
            );

            let client = network::mongo::connect(&config.mongodb_uri, "opwatch").await?;
            let state = AdminState::new(Arc::new(client), &config.namespace, config.collect_timeout());

            network::run_http_admin(addr, state).await?;
        }
        Command::Collect { overrides } => {
            let config = load_config(&overrides, None)?;
            if let Err(e) = collect_once(&config).await {
                error!("{e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
