//! Capsule CLI
//!
//! Seal a message that nobody can read before a chosen time, then reveal it.

mod when;
mod wiring;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use capsule_cipher::CapsuleKey;
use capsule_config::CapsuleConfig;
use capsule_core::{CapsuleRef, Error, Gate, Principal};
use capsule_lifecycle::{
    mint, Credentials, DecryptAttempt, EngineSettings, IdentityProvider, RevealEngine, RevealSession,
    RevealState, SealMode, SealRequest, SessionIdentity,
};

use crate::when::{human, parse_when};
use crate::wiring::Wiring;

#[derive(Parser)]
#[command(name = "capsule")]
#[command(about = "Time capsules: seal a message now, reveal it later")]
#[command(version)]
struct Cli {
    /// Config file (default: $CONFIG_DIR/capsule/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a message until a future time
    Seal {
        /// The message (at most 7777 characters)
        message: String,

        /// Reveal time: RFC 3339 timestamp or offset like 90s, 2h, 3d
        #[arg(short, long)]
        at: String,

        /// Author address
        #[arg(short, long)]
        principal: String,

        /// Display name shown to readers
        #[arg(long, default_value = "anonymous")]
        author: String,

        /// Make the capsule private, readable by token holders with this password
        #[arg(long, conflicts_with = "keyed")]
        password: Option<String>,

        /// Encrypt under a fresh key that is printed once and never stored
        #[arg(long)]
        keyed: bool,

        /// Access tokens that can be minted
        #[arg(long)]
        max_supply: Option<u64>,
    },

    /// Decrypt a capsule
    Reveal {
        /// Capsule id, short id or uuid
        reference: String,

        /// Password for private capsules
        #[arg(long)]
        password: Option<String>,

        /// Base64 key for keyed capsules
        #[arg(long)]
        key: Option<String>,

        /// Reader address, needed for private capsules
        #[arg(short, long)]
        principal: Option<String>,

        /// Keep waiting until the capsule opens
        #[arg(short, long)]
        wait: bool,
    },

    /// Show a capsule's record and reveal state
    Status {
        /// Capsule id, short id or uuid
        reference: String,
    },

    /// Mint an access token
    Mint {
        /// Capsule id, short id or uuid
        reference: String,

        /// Recipient address
        #[arg(long)]
        to: String,
    },

    /// Show beacon rounds
    Round {
        /// Also show the round that opens at this time
        #[arg(long)]
        at: Option<String>,
    },

    /// Configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.unwrap_or_else(CapsuleConfig::default_path);
    if let Commands::Config { command } = cli.command {
        return cmd_config(command, &config_path);
    }

    let config = load_config(&config_path)?;
    let wiring = Wiring::from_config(&config)?;

    match cli.command {
        Commands::Seal {
            message,
            at,
            principal,
            author,
            password,
            keyed,
            max_supply,
        } => {
            let mode = match (password, keyed) {
                (_, true) => SealMode::Keyed,
                (Some(password), false) => SealMode::Private { password },
                (None, false) => SealMode::Public,
            };
            cmd_seal(&config, &wiring, message, &at, &principal, author, mode, max_supply).await
        }
        Commands::Reveal {
            reference,
            password,
            key,
            principal,
            wait,
        } => cmd_reveal(&config, &wiring, &reference, password, key, principal, wait).await,
        Commands::Status { reference } => cmd_status(&wiring, &reference).await,
        Commands::Mint { reference, to } => cmd_mint(&wiring, &reference, &to).await,
        Commands::Round { at } => cmd_round(&wiring, at.as_deref()).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "warn,capsule={level},capsule_lifecycle={level},capsule_ledger={level},capsule_timelock={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<CapsuleConfig> {
    CapsuleConfig::load_layered(path, |key| std::env::var(key).ok())
        .with_context(|| format!("loading {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
async fn cmd_seal(
    config: &CapsuleConfig,
    wiring: &Wiring,
    message: String,
    at: &str,
    principal: &str,
    author: String,
    mode: SealMode,
    max_supply: Option<u64>,
) -> Result<()> {
    let principal = Principal::new(principal)?;
    let reveal_at = parse_when(at, Utc::now())?;

    let mut sealer = wiring.sealer(config);
    if let Some(max_supply) = max_supply {
        sealer = sealer.with_max_supply(max_supply);
    }
    let receipt = sealer
        .seal(SealRequest {
            message,
            author,
            principal,
            reveal_at,
            mode,
        })
        .await?;

    println!("\n  CAPSULE SEALED");
    println!("  ==============");
    println!("  Id:        {}", receipt.id);
    println!("  Short id:  {}", receipt.short_id);
    println!("  UUID:      {}", receipt.uuid);
    println!("  Sealed:    {}", receipt.sealed_at.to_rfc3339());
    println!("  Opens:     {}", reveal_at.to_rfc3339());
    println!("  Round:     {}", receipt.reveal_round);
    if let Some(key) = &receipt.key {
        println!();
        println!("  Key:       {}", key.to_base64());
        println!("  This key is shown once and stored nowhere.");
    }
    println!();
    Ok(())
}

async fn cmd_reveal(
    config: &CapsuleConfig,
    wiring: &Wiring,
    reference: &str,
    password: Option<String>,
    key: Option<String>,
    principal: Option<String>,
    wait: bool,
) -> Result<()> {
    let reference: CapsuleRef = reference.parse()?;
    let mut credentials = Credentials::none();
    if let Some(password) = password {
        credentials = credentials.with_password(password);
    }
    if let Some(key) = key {
        credentials = credentials.with_key(CapsuleKey::from_base64(&key)?);
    }

    let session = Arc::new(RevealSession::open(&reference, wiring.services.clone()).await?);
    let identity = SessionIdentity::new();
    if let Some(principal) = principal {
        identity.sign_in(Principal::new(principal)?);
        session.set_identity(identity.current()).await?;
    }

    if !wait {
        return match session.decrypt(&credentials).await {
            Ok(DecryptAttempt::Done(text)) => {
                print_plaintext(&session, &text);
                Ok(())
            }
            Ok(DecryptAttempt::Coalesced) => bail!("a decrypt is already running for this capsule"),
            Err(e) => Err(explain(e)),
        };
    }

    let settings = EngineSettings {
        poll_interval: config.reveal.poll_interval(),
        supply_interval: config.reveal.supply_interval(),
        credentials: credentials.clone(),
        auto_decrypt: true,
    };
    let mut engine = RevealEngine::spawn(session.clone(), settings);
    engine.watch_identity(identity.subscribe());

    if let Some(left) = session.capsule().and_then(|c| c.time_until_reveal(Utc::now())) {
        eprintln!("  Sealed for another {}, waiting...", human(left));
    }

    let mut ticker = tokio::time::interval(config.reveal.poll_interval());
    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break Err(anyhow!("interrupted")),
        }
        if matches!(
            session.state(),
            RevealState::SealedFuture | RevealState::RevealPending | RevealState::Decrypting
        ) {
            continue;
        }
        match session.decrypt(&credentials).await {
            Ok(DecryptAttempt::Done(text)) => break Ok(text),
            Ok(DecryptAttempt::Coalesced) => continue,
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, "not yet");
                continue;
            }
            Err(e) => break Err(explain(e)),
        }
    };
    engine.shutdown();

    let text = result?;
    print_plaintext(&session, &text);
    Ok(())
}

fn print_plaintext(session: &RevealSession, text: &str) {
    if let Some(capsule) = session.capsule() {
        println!("\n  CAPSULE #{} by {}", capsule.id(), capsule.author());
        println!("  sealed {}\n", capsule.sealed_at().to_rfc3339());
    }
    println!("{text}");
}

/// Attach the next step for errors a reader can act on.
fn explain(err: Error) -> anyhow::Error {
    let hint = match err.gate() {
        Some(Gate::Timelock) if err.is_retryable() => "run again later, or pass --wait",
        Some(Gate::Password) => "check --password",
        Some(Gate::Key) => "check --key",
        Some(Gate::Access) => "pass --principal of an access token holder, or mint one",
        _ => return err.into(),
    };
    anyhow!("{err} ({hint})")
}

async fn cmd_status(wiring: &Wiring, reference: &str) -> Result<()> {
    let reference: CapsuleRef = reference.parse()?;
    let session = RevealSession::open(&reference, wiring.services.clone()).await?;
    let capsule = session.capsule().context("capsule record missing")?;
    let now = Utc::now();

    println!("\n  CAPSULE #{}", capsule.id());
    println!("  ==========");
    println!("  Short id:    {}", capsule.short_id());
    println!("  UUID:        {}", capsule.uuid());
    println!("  Author:      {} ({})", capsule.author(), capsule.author_principal());
    println!("  Sealed:      {}", capsule.sealed_at().to_rfc3339());
    println!("  Opens:       {}", capsule.reveal_at().to_rfc3339());
    if let Some(left) = capsule.time_until_reveal(now) {
        println!("  Opens in:    {}", human(left));
    }
    if let Some(round) = session.reveal_round() {
        println!("  Round:       {}", round);
    }
    println!(
        "  Visibility:  {}",
        if capsule.visibility().is_private() { "private" } else { "public" }
    );
    println!("  State:       {}", session.state().description());
    println!(
        "  Supply:      {} of {} minted, {} left",
        capsule.minted(),
        capsule.max_supply(),
        capsule.remaining_supply()
    );
    println!();
    Ok(())
}

async fn cmd_mint(wiring: &Wiring, reference: &str, to: &str) -> Result<()> {
    let reference: CapsuleRef = reference.parse()?;
    let recipient = Principal::new(to)?;
    let receipt = mint(&wiring.services, &reference, &recipient).await?;
    println!(
        "  Minted access token for capsule #{} to {} ({} of {} left)",
        receipt.id,
        recipient,
        receipt.remaining,
        receipt.minted + receipt.remaining
    );
    Ok(())
}

async fn cmd_round(wiring: &Wiring, at: Option<&str>) -> Result<()> {
    let chain = wiring.services.beacon.chain_info().await?;
    let now = Utc::now();
    let current = chain.round_at(now);

    println!("\n  BEACON");
    println!("  ======");
    println!("  Chain:       {}", chain.hash_hex());
    println!("  Scheme:      {}", chain.scheme_id());
    println!("  Period:      {}s", chain.period());
    println!("  Current:     round {current}");
    if let Some(at) = at {
        let at = parse_when(at, now)?;
        let round = chain.target_round(at);
        println!(
            "  Opens at:    round {round} ({})",
            chain.round_time(round).to_rfc3339()
        );
    }
    println!();
    Ok(())
}

fn cmd_config(command: ConfigCommands, path: &Path) -> Result<()> {
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            let config = load_config(path)?;
            print!("{}", config.to_yaml()?);
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            CapsuleConfig::default().save_to(path)?;
            println!("  Wrote {}", path.display());
        }
    }
    Ok(())
}
