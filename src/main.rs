use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use upload_abort::http::AuthServer;
use upload_abort::{BodyStrategy, Harness, HarnessConfig};

/// Early 401 upload reproduction harness
#[derive(Parser)]
#[command(name = "upload-abort")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run only the authenticating server
    Serve(ServerArgs),
    /// Run the reproduction against an in-process server
    Run(RunArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "UPLOAD_ABORT_BIND", default_value = "127.0.0.1:9999")]
    bind: SocketAddr,

    #[arg(long, env = "UPLOAD_ABORT_REALM", default_value = "MyRealm")]
    realm: String,

    #[arg(long, env = "UPLOAD_ABORT_USER", default_value = "user")]
    user: String,

    #[arg(long, env = "UPLOAD_ABORT_PASSWORD", default_value = "pwd")]
    password: String,

    /// Seconds to keep draining an unread body after an early response
    #[arg(long, env = "UPLOAD_ABORT_LINGER_SECS", default_value_t = 2)]
    linger_secs: u64,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    server: ServerArgs,

    /// Body strategy to exercise; repeat for several, omit for all
    #[arg(long = "strategy", env = "UPLOAD_ABORT_STRATEGY", value_enum, value_delimiter = ',')]
    strategies: Vec<StrategyArg>,

    /// Uploads per strategy
    #[arg(long, env = "UPLOAD_ABORT_ITERATIONS", default_value_t = 5)]
    iterations: usize,

    /// Seconds to wait for a response
    #[arg(long, env = "UPLOAD_ABORT_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    #[arg(long, env = "UPLOAD_ABORT_CHUNK_SIZE", default_value_t = upload_abort::body::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Payload size the pattern is repeated up to
    #[arg(long, env = "UPLOAD_ABORT_FIXTURE_SIZE", default_value_t = upload_abort::config::DEFAULT_FIXTURE_SIZE)]
    fixture_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    FileRegion,
    ChunkedFile,
    ChunkedMappedFile,
    All,
}

impl StrategyArg {
    fn strategies(self) -> &'static [BodyStrategy] {
        match self {
            StrategyArg::FileRegion => &[BodyStrategy::FileRegion],
            StrategyArg::ChunkedFile => &[BodyStrategy::ChunkedFile],
            StrategyArg::ChunkedMappedFile => &[BodyStrategy::ChunkedMappedFile],
            StrategyArg::All => &BodyStrategy::ALL,
        }
    }
}

/// Strategies named on the command line, in order and without repeats
fn selected_strategies(args: &[StrategyArg]) -> Vec<BodyStrategy> {
    if args.is_empty() {
        return BodyStrategy::ALL.to_vec();
    }

    let mut selected = Vec::new();
    for strategy in args.iter().flat_map(|arg| arg.strategies()) {
        if !selected.contains(strategy) {
            selected.push(*strategy);
        }
    }
    selected
}

impl ServerArgs {
    fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new()
            .bind(self.bind)
            .linger_timeout(Duration::from_secs(self.linger_secs))
            .credentials(&self.user, &self.password);
        config.realm = self.realm.clone();
        config
    }
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    match Cli::parse().command {
        Commands::Serve(args) => serve(args),
        Commands::Run(args) => run(args),
    }
}

fn serve(args: ServerArgs) -> Result<()> {
    let config = args.config();
    config.validate()?;

    let _server = AuthServer::start(config.server_config())
        .with_context(|| format!("failed to start server on {}", args.bind))?;

    loop {
        std::thread::park();
    }
}

fn run(args: RunArgs) -> Result<()> {
    let config = args
        .server
        .config()
        .iterations(args.iterations)
        .response_timeout(Duration::from_secs(args.timeout_secs))
        .chunk_size(args.chunk_size)
        .fixture_size(args.fixture_size);

    let strategies = selected_strategies(&args.strategies);

    let harness = Harness::new(config).context("failed to set up harness")?;
    tracing::info!(
        path = %harness.fixture().path().display(),
        len = harness.fixture().len(),
        "payload ready"
    );

    for strategy in strategies {
        harness
            .run_and_verify(strategy)
            .with_context(|| format!("strategy {} failed", strategy))?;
        tracing::info!(%strategy, "all uploads answered with 401");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["upload-abort", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Run(args) => args,
            Commands::Serve(_) => panic!("parsed as serve"),
        }
    }

    #[test]
    fn test_strategy_all() {
        let args = run_args(&["--strategy", "all"]);
        assert_eq!(args.strategies, vec![StrategyArg::All]);
        assert_eq!(selected_strategies(&args.strategies), BodyStrategy::ALL.to_vec());
    }

    #[test]
    fn test_strategy_list() {
        let args = run_args(&["--strategy", "chunked-mapped-file,file-region"]);
        assert_eq!(
            selected_strategies(&args.strategies),
            vec![BodyStrategy::ChunkedMappedFile, BodyStrategy::FileRegion]
        );

        let args = run_args(&["--strategy", "chunked-file", "--strategy", "all"]);
        assert_eq!(
            selected_strategies(&args.strategies),
            vec![
                BodyStrategy::ChunkedFile,
                BodyStrategy::FileRegion,
                BodyStrategy::ChunkedMappedFile
            ]
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(Cli::try_parse_from(["upload-abort", "run", "--strategy", "zero-copy"]).is_err());
    }
}
