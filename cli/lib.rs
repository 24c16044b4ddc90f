use std::path::{Path, PathBuf};

use anyhow::Context as _;
use bitcoin::Amount;
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use pczt::{
    api,
    chain::{ChainOracle as _, MemoryChain},
    proof::LocalParameters,
    roles::{FundingPolicy, Skeleton},
    types::{
        Note, PaymentAddress, Pool, Rseed, Transaction,
        consensus::DEFAULT_TX_EXPIRY_DELTA,
    },
    wallet::MemoryWallet,
};
use tracing_subscriber::{filter as tracing_filter, layer::SubscriberExt as _};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum AddressKind {
    Sapling,
    Orchard,
    Transparent,
}

#[derive(Clone, Debug, Subcommand)]
#[command(arg_required_else_help(true))]
pub enum Command {
    /// Create a new wallet and an empty chain. Prints the mnemonic seed
    /// phrase.
    Init {
        /// Restore from an existing mnemonic seed phrase
        #[arg(long)]
        mnemonic: Option<String>,
        /// Replace an existing state file
        #[arg(long)]
        force: bool,
    },
    /// Get a new wallet address
    NewAddress { kind: AddressKind },
    /// Mine a note paying `value_sats` to `address`
    Mint {
        address: PaymentAddress,
        #[arg(long)]
        value_sats: u64,
    },
    /// Create an empty bundle
    Create {
        #[arg(default_value_t = 5, long)]
        tx_version: u32,
        #[arg(default_value_t = 0, long)]
        lock_time: u32,
        /// Defaults to the chain tip plus the default expiry delta
        #[arg(long)]
        expiry_height: Option<u32>,
    },
    /// Append an output to a hex encoded bundle
    AddOutput {
        pczt: String,
        /// Shielded or transparent address
        destination: String,
        #[arg(long)]
        value_sats: u64,
        #[arg(long)]
        memo: Option<String>,
    },
    /// Fund a hex encoded bundle from a wallet address
    Fund {
        pczt: String,
        identity: PaymentAddress,
        #[arg(long)]
        fee_sats: Option<u64>,
        /// Leave any surplus as fee
        #[arg(long)]
        no_change: bool,
    },
    /// Show a hex encoded bundle as json
    Decode { pczt: String },
    /// Merge copies of one bundle
    Combine {
        #[arg(required = true)]
        pczts: Vec<String>,
    },
    /// Prove, sign, finalize and extract. Prints the raw transaction.
    Finalize {
        pczt: String,
        /// Mine the transaction and scan it with the wallet, printing the
        /// txid instead
        #[arg(long)]
        broadcast: bool,
    },
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Wallet and chain state file, defaults to `pczt/state.json` in the
    /// user data directory
    #[arg(long)]
    pub state: Option<PathBuf>,
    /// Log level, defaults to [`tracing::Level::Warn`]
    #[arg(default_value_t = tracing::Level::WARN, long)]
    pub log_level: tracing::Level,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: tracing::Level,
    pub state_path: PathBuf,
}

impl Cli {
    pub fn get_config(&self) -> anyhow::Result<Config> {
        let state_path = match &self.state {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .context("couldn't get default data dir, specify --state")?
                .join("pczt")
                .join("state.json"),
        };
        Ok(Config {
            log_level: self.log_level,
            state_path,
        })
    }

    pub fn run(self) -> anyhow::Result<String> {
        let config = self.get_config()?;
        handle_command(&config, self.command)
    }
}

/// Wallet and chain, persisted between invocations
#[derive(Debug, Deserialize, Serialize)]
pub struct State {
    pub wallet: MemoryWallet,
    pub chain: MemoryChain,
}

impl State {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path).with_context(|| {
            format!("failed to open {}, run `init` first", path.display())
        })?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        tracing::debug!(path = %path.display(), "saved state");
        Ok(())
    }
}

fn decode_hex(pczt: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(pczt.trim()).context("bundle is not valid hex")
}

/// Handle a command, returning CLI output
fn handle_command(config: &Config, command: Command) -> anyhow::Result<String> {
    let path = config.state_path.as_path();
    Ok(match command {
        Command::Init { mnemonic, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to replace it",
                    path.display()
                );
            }
            let mnemonic = match mnemonic {
                Some(phrase) => phrase,
                None => bip39::Mnemonic::new(
                    bip39::MnemonicType::Words12,
                    bip39::Language::English,
                )
                .into_phrase(),
            };
            let state = State {
                wallet: MemoryWallet::from_mnemonic(&mnemonic)?,
                chain: MemoryChain::new(),
            };
            state.save(path)?;
            mnemonic
        }
        Command::NewAddress { kind } => {
            let mut state = State::load(path)?;
            let address = match kind {
                AddressKind::Sapling => state.wallet.new_address(Pool::Sapling)?.to_string(),
                AddressKind::Orchard => state.wallet.new_address(Pool::Orchard)?.to_string(),
                AddressKind::Transparent => {
                    state.wallet.new_transparent_address()?.to_string()
                }
            };
            state.save(path)?;
            address
        }
        Command::Mint {
            address,
            value_sats,
        } => {
            let mut state = State::load(path)?;
            let note = Note {
                recipient: address,
                value: Amount::from_sat(value_sats),
                rseed: Rseed::random(&mut OsRng),
            };
            let positions = state
                .chain
                .mine_block([(address.pool(), note.commitment())])?;
            // Notes to other wallets are only recorded on chain
            if let Err(err) = state.wallet.add_note(note, positions[0]) {
                tracing::debug!(%err, "minted note is not ours");
            }
            state.wallet.sync(&state.chain);
            state.save(path)?;
            note.commitment().to_string()
        }
        Command::Create {
            tx_version,
            lock_time,
            expiry_height,
        } => {
            let state = State::load(path)?;
            let tip_height = state.chain.tip_height();
            let skeleton = Skeleton {
                tx_version,
                lock_time,
                expiry_height: expiry_height
                    .unwrap_or(tip_height.saturating_add(DEFAULT_TX_EXPIRY_DELTA)),
            };
            hex::encode(api::createpczt(&skeleton, &state.chain)?)
        }
        Command::AddOutput {
            pczt,
            destination,
            value_sats,
            memo,
        } => {
            let pczt = api::pczt_addoutput(
                &decode_hex(&pczt)?,
                &destination,
                Amount::from_sat(value_sats),
                memo.as_deref(),
            )?;
            hex::encode(pczt)
        }
        Command::Fund {
            pczt,
            identity,
            fee_sats,
            no_change,
        } => {
            let state = State::load(path)?;
            let policy = FundingPolicy {
                fee: fee_sats.map_or(FundingPolicy::DEFAULT_FEE, Amount::from_sat),
                change: !no_change,
            };
            let pczt = api::pczt_fund_with(
                &decode_hex(&pczt)?,
                &identity,
                &policy,
                &state.wallet,
                &state.chain,
            )?;
            hex::encode(pczt)
        }
        Command::Decode { pczt } => {
            let decoded = api::decodepczt(&decode_hex(&pczt)?)?;
            serde_json::to_string_pretty(&decoded)?
        }
        Command::Combine { pczts } => {
            let pczts = pczts
                .iter()
                .map(|pczt| decode_hex(pczt))
                .collect::<Result<Vec<_>, _>>()?;
            hex::encode(api::combinepczt(&pczts)?)
        }
        Command::Finalize { pczt, broadcast } => {
            let mut state = State::load(path)?;
            let raw = api::finalizepczt(
                &decode_hex(&pczt)?,
                &state.wallet,
                &state.chain,
                &LocalParameters,
            )?;
            if !broadcast {
                return Ok(raw);
            }
            let tx = Transaction::from_bytes(&hex::decode(&raw)?)?;
            let positions = state.chain.apply_transaction(&tx)?;
            let received = state.wallet.scan(&tx, &positions)?;
            state.wallet.sync(&state.chain);
            state.save(path)?;
            tracing::info!(txid = %tx.txid(), received, "broadcast transaction");
            tx.txid().to_string()
        }
    })
}

pub fn set_tracing_subscriber(log_level: tracing::Level) -> anyhow::Result<()> {
    let targets_filter = tracing_filter::Targets::new().with_targets([
        ("pczt", log_level),
        ("pczt_cli", log_level),
        ("pczt_cli_lib", log_level),
    ]);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_line_number(true)
        .with_writer(std::io::stderr);
    let subscriber = tracing_subscriber::registry()
        .with(targets_filter)
        .with(stderr_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
