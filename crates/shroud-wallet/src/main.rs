#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rpassword::prompt_password;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use shroud_compliance::{MaskedCommitmentRegistry, SledRegistry};
use shroud_core::{Blake3Provider, ComplianceMode, DigestProver, PoolConfig};
use shroud_wallet::{ComplianceArtifacts, Keystore, RpcClient, ShieldedWallet};

#[derive(Parser, Debug)]
#[command(name = "shroud-wallet", version)]
struct Cli {
    #[arg(long, default_value = "shroud.keystore.db")]
    keystore: PathBuf,
    /// Pool configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Node RPC address.
    #[arg(long, default_value = "127.0.0.1:27447")]
    rpc: String,
    #[arg(long)]
    rpc_auth: Option<String>,
    /// Public ledger account that pays for deposits.
    #[arg(long)]
    account: Option<String>,
    /// Masked-commitment registry mirror, read in compliance modes.
    #[arg(long, default_value = "shroud.registry.db")]
    registry_db: PathBuf,
    #[arg(long)]
    start_block: Option<u64>,
    #[arg(long, value_enum)]
    compliance: Option<Mode>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    None,
    ExactSmt,
    ProbabilisticBloom,
}

impl From<Mode> for ComplianceMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::None => ComplianceMode::None,
            Mode::ExactSmt => ComplianceMode::ExactSmt,
            Mode::ProbabilisticBloom => ComplianceMode::ProbabilisticBloom,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init,
    Address,
    Balance,
    ListUtxos,
    /// Print the default private key as hex.
    ExportKey,
    /// Store a hex private key read from the terminal.
    ImportKey,
    /// Prepare a deposit from `--account` and print it as JSON.
    Deposit {
        amount: u64,
    },
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(cli: &Cli) -> Result<PoolConfig> {
    let mut cfg = match &cli.config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::default(),
    };
    if let Some(start) = cli.start_block {
        cfg.start_block = start;
    }
    if let Some(mode) = cli.compliance {
        cfg.compliance_mode = mode.into();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn open_wallet(cli: &Cli, keystore: &Keystore) -> Result<ShieldedWallet> {
    let crypto = Blake3Provider::shared();
    let cfg = load_config(cli)?;
    let password = prompt_password("Password: ")?;
    let keypair = keystore.unlock(crypto.as_ref(), &password)?;
    let ledger = Arc::new(RpcClient::new(
        &cli.rpc,
        cli.rpc_auth.clone(),
        &cfg.pool_address,
        &cfg.registry_address,
    ));
    let registry: Option<Arc<dyn MaskedCommitmentRegistry>> =
        if cfg.compliance_mode == ComplianceMode::None {
            None
        } else {
            Some(Arc::new(SledRegistry::open(&cli.registry_db)?))
        };
    Ok(ShieldedWallet::new(
        cfg,
        crypto,
        keypair,
        cli.account.as_deref().unwrap_or(""),
        ledger,
        Arc::new(DigestProver),
        registry,
    )?)
}

fn new_password() -> Result<String> {
    let password = prompt_password("New password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        return Err(anyhow!("passwords do not match"));
    }
    Ok(password)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let keystore = Keystore::open(&cli.keystore)?;

    match &cli.command {
        Commands::Init => {
            let password = new_password()?;
            let address = keystore.init(&Blake3Provider, &password)?;
            println!("Initialized keystore. Shielded address: {address}");
        }
        Commands::Address => {
            println!("{}", keystore.address()?);
        }
        Commands::Balance => {
            let wallet = open_wallet(&cli, &keystore)?;
            let snapshot = wallet.snapshot()?;
            let unspent = wallet.unspent_at(&snapshot)?;
            let total: u128 = unspent.iter().map(|u| u128::from(u.amount())).sum();
            println!(
                "Balance: {total} ({} notes, block {})",
                unspent.len(),
                snapshot.latest_block
            );
        }
        Commands::ListUtxos => {
            let wallet = open_wallet(&cli, &keystore)?;
            let unspent = wallet.unspent()?;
            if unspent.is_empty() {
                println!("No unspent notes.");
            }
            for u in unspent {
                let index = u
                    .index()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "-".into());
                println!("leaf {index} amount {} blinding {}", u.amount(), u.blinding());
            }
        }
        Commands::ExportKey => {
            let password = prompt_password("Password: ")?;
            println!("{}", keystore.export_key_hex(&Blake3Provider, &password)?);
        }
        Commands::ImportKey => {
            let key_hex = prompt_password("Private key (hex): ")?;
            let password = new_password()?;
            let address = keystore.import_key_hex(&Blake3Provider, &key_hex, &password)?;
            println!("Imported key. Shielded address: {address}");
        }
        Commands::Deposit { amount } => {
            if cli.account.is_none() {
                return Err(anyhow!("deposit needs --account"));
            }
            let wallet = open_wallet(&cli, &keystore)?;
            let prepared = wallet.deposit(*amount)?;
            let registration = match &prepared.compliance {
                ComplianceArtifacts::Registration { record } => Some(record),
                _ => None,
            };
            let out = json!({
                "args": prepared.args,
                "extData": prepared.ext_data,
                "registration": registration,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
