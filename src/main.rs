use std::path::PathBuf;

use channel_signal::Relay;
use clap::{Args, Parser, Subcommand};
use signal_relay::{
    config::{EnvConfigManager, load_relay_config},
    logger::{LogConfig, init_tracing},
    output::JsonRpcStdoutSink,
    schema::write_schema,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "signal-relay",
    about = "Relays a Signal receive stream as JSON-RPC messageIn notifications on stdout",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay (default)
    Run(RunArgs),

    /// Emit JSON-Schema for the events written to stdout
    Schema(SchemaArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Optional .env file with SIGNAL_* settings
    #[arg(long, env = "SIGNAL_ENV_FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Log filter (e.g. error, warn, info, debug, trace)
    #[arg(long, env = "SIGNAL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Write daily rolling log files here instead of stderr
    #[arg(long, env = "SIGNAL_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// OpenTelemetry collector (e.g. http://localhost:4318)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otel_endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Output directory
    #[arg(long, default_value = "schemas")]
    out: PathBuf,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run(cli.run)) {
        Commands::Run(args) => run(args).await,
        Commands::Schema(args) => {
            for path in write_schema(&args.out)? {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let _telemetry = init_tracing(&LogConfig {
        log_level: args.log_level,
        log_dir: args.log_dir,
        json: args.log_json,
        otel_endpoint: args.otel_endpoint,
    })?;

    let settings = EnvConfigManager::new(Some(args.env_file));
    let config = load_relay_config(&settings).await?;
    info!(?config, "starting signal relay");

    let (sink, writer) = JsonRpcStdoutSink::stdout();
    let relay = Relay::new(config, sink).start()?;

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");
    relay.shutdown().await;

    // the relay owned the last sink, so the writer drains and exits
    if let Err(err) = writer.await {
        warn!(error = %err, "stdout writer ended abnormally");
    }
    Ok(())
}
