#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gas_station::config::{load_config, load_config_strict, AppConfig, DEFAULT_CONFIG_FILE};
use gas_station::{metrics_http, simulation, AllocationPolicy, FuelType, Station};

#[derive(Parser)]
#[command(name = "gas-station")]
#[command(about = "Concurrent gas station simulator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (e.g. debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Config file (defaults to ./gas-station.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run randomized clients against a station and print a JSON report
    Simulate {
        /// Number of clients (overrides config)
        #[arg(long)]
        clients: Option<usize>,
        /// What a client does when the only suitable pump is busy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Give up waiting for a busy pump after this many milliseconds
        #[arg(long)]
        wait_timeout_ms: Option<u64>,
        /// Size of the client worker pool
        #[arg(long)]
        workers: Option<usize>,
        /// Seed for a reproducible workload
        #[arg(long)]
        seed: Option<u64>,
        /// Serve Prometheus metrics on this address while running
        #[arg(long)]
        metrics_addr: Option<String>,
    },

    /// Make a single purchase against a freshly configured station
    Buy {
        /// Fuel type (REGULAR, SUPER, DIESEL)
        #[arg(long)]
        category: FuelType,
        /// Litres to buy
        #[arg(long)]
        amount: f64,
        /// Highest acceptable price per litre
        #[arg(long)]
        max_price: f64,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration
    Init,
    /// Print the effective configuration (the default when no action is given)
    Show,
    /// Show path to the config file
    Path,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Wait,
    NeverWait,
}

impl From<PolicyArg> for AllocationPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Wait => AllocationPolicy::WaitForBusy,
            PolicyArg::NeverWait => AllocationPolicy::NeverWait,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    match cli.command {
        Commands::Simulate {
            clients,
            policy,
            wait_timeout_ms,
            workers,
            seed,
            metrics_addr,
        } => {
            let mut config = read_config(cli.config.is_some(), &config_path)?;
            if let Some(clients) = clients {
                config.simulation.clients = clients;
            }
            if let Some(policy) = policy {
                config.station.policy = policy.into();
            }
            if wait_timeout_ms.is_some() {
                config.simulation.wait_timeout_ms = wait_timeout_ms;
            }
            if workers.is_some() {
                config.simulation.worker_threads = workers;
            }
            if seed.is_some() {
                config.simulation.seed = seed;
            }
            config.validate()?;
            handle_simulate(config, metrics_addr)
        }
        Commands::Buy {
            category,
            amount,
            max_price,
        } => {
            let config = read_config(cli.config.is_some(), &config_path)?;
            handle_buy(&config, category, amount, max_price)
        }
        Commands::Config { action } => handle_config(action, &config_path),
    }
}

/// Text logs on stderr by default; `GAS_STATION_LOG_JSON=1` switches to JSON.
fn init_logging(level: &str) {
    let json_logging = std::env::var("GAS_STATION_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("gas_station={}", level).into());

    if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// An explicitly passed config must load cleanly; the implicit one may be absent.
fn read_config(explicit: bool, path: &Path) -> anyhow::Result<AppConfig> {
    if explicit {
        load_config_strict(path)
    } else {
        let config = load_config(path);
        config.validate()?;
        Ok(config)
    }
}

// === CLI handlers ===

fn handle_simulate(config: AppConfig, metrics_addr: Option<String>) -> anyhow::Result<()> {
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let workers = config.simulation.worker_threads.unwrap_or(num_cpus);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads((num_cpus / 2).max(2))
        .max_blocking_threads(workers)
        .thread_name("gas-station-worker")
        .enable_all()
        .build()?;

    rt.block_on(async {
        let station = Arc::new(Station::from_config(&config.station)?);

        let cancel = CancellationToken::new();
        let metrics_task = metrics_addr.map(|addr| {
            let station = Arc::clone(&station);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                metrics_http::serve_metrics(&addr, station, cancel).await;
            })
        });

        let report = simulation::run_simulation(Arc::clone(&station), &config.simulation).await;

        cancel.cancel();
        if let Some(task) = metrics_task {
            task.await?;
        }

        let report = report?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok::<(), anyhow::Error>(())
    })
}

fn handle_buy(
    config: &AppConfig,
    category: FuelType,
    amount: f64,
    max_price: f64,
) -> anyhow::Result<()> {
    let station = Station::from_config(&config.station)?;
    match station.buy_gas(category, amount, max_price) {
        Ok(paid) => {
            println!("Paid {:.2} for {} litres of {}", paid, amount, category);
            Ok(())
        }
        Err(e) if e.is_business_rejection() => {
            println!("Rejected ({}): {}", e.kind(), e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn handle_config(action: Option<ConfigAction>, config_path: &Path) -> anyhow::Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            println!("{}", config_path.display());
        }
        Some(ConfigAction::Init) => {
            if config_path.exists() {
                eprintln!("Config already exists: {}", config_path.display());
                return Ok(());
            }
            std::fs::write(config_path, AppConfig::default().to_toml_string()?)?;
            println!("Created: {}", config_path.display());
        }
        Some(ConfigAction::Show) | None => {
            let config = load_config(config_path);
            println!("# Effective config ({})\n", config_path.display());
            println!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
