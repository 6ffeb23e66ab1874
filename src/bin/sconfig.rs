//! sconfig CLI - seal, inspect and clean config files with machine-bound secrets

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

use sconfig::fingerprint;
use sconfig::{
    ConfigLoader, EnvConfig, LoadOptions, Locale, Result, VaultContext, VersionScope,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "sconfig")]
#[command(version)]
#[command(about = "Config files with machine-bound password encryption.", long_about = None)]
struct Cli {
    /// Use this machine identifier instead of fingerprinting the hardware
    #[arg(long, global = true, value_name = "ID")]
    hardware_id: Option<u64>,

    /// Language of the marker written into sealed password fields (en, de)
    #[arg(long, global = true, value_name = "LANG")]
    lang: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal new plaintext passwords in a JSON config file
    #[command(alias = "s")]
    Seal {
        /// Path to the JSON config file
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Expected config version; a differing top-level Version field is updated
        #[arg(long, value_name = "N")]
        config_version: Option<i64>,

        /// Reconcile Version fields at every depth, not only the top level
        #[arg(long)]
        all_versions: bool,

        /// Fail on SecurePassword fields without a Password sibling
        #[arg(long)]
        strict: bool,
    },

    /// Seal, then print the config with decrypted passwords
    Show {
        /// Path to the JSON config file
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Expected config version
        #[arg(long, value_name = "N")]
        config_version: Option<i64>,
    },

    /// Write the passwords back to the file in plaintext
    Clean {
        /// Path to the JSON config file
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Expected config version
        #[arg(long, value_name = "N")]
        config_version: Option<i64>,
    },

    /// Seal new plaintext passwords in a .env file
    Env {
        /// Path to the .env file
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,

        /// Let file values replace variables already set in the environment
        #[arg(long = "override")]
        override_env: bool,

        /// Write the passwords back to the file in plaintext
        #[arg(long)]
        clean: bool,

        /// Print the (decrypted) value of this key
        #[arg(long, value_name = "KEY")]
        get: Option<String>,
    },

    /// Print this machine's identifier
    HardwareId,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", render_error(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::HardwareId = cli.command {
        let id = match cli.hardware_id {
            Some(id) => id,
            None => fingerprint::machine_id()?,
        };
        println!("{:016x}", id);
        return Ok(());
    }

    let locale = match cli.lang.as_deref() {
        Some(tag) => Locale::from_tag(tag).unwrap_or_default(),
        None => Locale::from_env(),
    };
    let ctx = match cli.hardware_id {
        Some(id) => VaultContext::from_hardware_id(id, locale),
        None => VaultContext::from_system(locale)?,
    };

    match cli.command {
        Commands::Seal {
            file,
            config_version,
            all_versions,
            strict,
        } => {
            let options = LoadOptions {
                version_scope: if all_versions {
                    VersionScope::Everywhere
                } else {
                    VersionScope::TopLevel
                },
                strict_pairs: strict,
                ..LoadOptions::default()
            };
            let report = load_json(&ctx, &file, config_version, options)?.1;
            if report.rewritten {
                eprintln!("{} updated", file.display());
            }
        }
        Commands::Show {
            file,
            config_version,
        } => {
            let (config, _) = load_json(&ctx, &file, config_version, LoadOptions::default())?;
            println!("{}", pretty(&config));
        }
        Commands::Clean {
            file,
            config_version,
        } => {
            let options = LoadOptions {
                clean_config: true,
                ..LoadOptions::default()
            };
            load_json(&ctx, &file, config_version, options)?;
        }
        Commands::Env {
            file,
            override_env,
            clean,
            get,
        } => {
            let env = EnvConfig::load(&ctx, &file, override_env, clean)?;
            if let Some(key) = get {
                println!("{}", env.get(&key, ""));
            }
        }
        Commands::HardwareId => {}
    }
    Ok(())
}

/// Load an arbitrary JSON config. Without an explicit version the file's own
/// version is kept.
fn load_json(
    ctx: &VaultContext,
    file: &Path,
    config_version: Option<i64>,
    options: LoadOptions,
) -> Result<(Value, sconfig::LoadReport)> {
    let version = match config_version {
        Some(v) => v,
        None => current_version(file)?,
    };
    let mut config = Value::Object(Default::default());
    let report = ConfigLoader::with_options(ctx, options).load(&mut config, version, file)?;
    Ok((config, report))
}

fn current_version(file: &Path) -> Result<i64> {
    let Some(raw) = sconfig::file_ops::read_config(file)? else {
        return Ok(0);
    };
    let value: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
    Ok(["Version", "version"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_i64))
        .unwrap_or(0))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn render_error(err: &sconfig::SconfigError) -> String {
    let mut msg = err.to_string();
    let mut source = err.source_error().map(|s| s as &(dyn std::error::Error + 'static));
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
