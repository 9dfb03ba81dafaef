//! Contract Signer CLI
//!
//! Signs, verifies and resets the signature manifest of a contract template.
//!
//! ## Secrets
//!
//! Keystore passwords are read from `--password-file`, `--password-stdin`,
//! or `CONTRACT_SIGNER_KEYSTORE_PASSWORD`, in that order. They are never
//! accepted as arguments.
//!
//! ## Exit status
//!
//! - 0: success
//! - 1: a signature failed verification, or the audit chain is broken
//! - 2: invalid input or configuration
//! - 3: keystore could not be decrypted
//! - 4: template, manifest, or keystore not found
//! - 5: manifest corrupt or of an unsupported schema version
//! - 10: anything else

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contract_signer::{
    ContractError, Settings, SigningCoordinator, VerifyMode, open_audit_logger,
    audit::ChainStatus,
    crypto::{
        KeystorePassword,
        keystore::{password_from_env, read_password, read_password_file},
    },
    manifest::SignerRole,
    telemetry,
};

/// Contract Signer - multi-party signing of smart legal contract templates
#[derive(Parser)]
#[command(name = "contract-signer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a template and append the signature to its manifest
    Sign {
        /// Party name or template author identifier
        signer: String,

        /// Template directory name
        template: String,

        /// Role the signer acts in
        #[arg(long, default_value = "party")]
        role: SignerRole,

        /// Read the keystore password from the first line of this file
        #[arg(long, conflicts_with = "password_stdin")]
        password_file: Option<PathBuf>,

        /// Read the keystore password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },

    /// Verify every signature in a template's manifest
    Verify {
        /// Template directory name
        template: String,

        /// Report every failing signature instead of stopping at the first
        #[arg(long)]
        collect_all: bool,
    },

    /// Clear a template's manifest
    Reset {
        /// Template directory name
        template: String,
    },

    /// Show signing progress against the configured signer policy
    Status {
        /// Template directory name
        template: String,
    },

    /// Print the current content hash of a template
    Hash {
        /// Template directory name
        template: String,
    },

    /// Inspect the audit log
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Check the hash chain and signatures of every entry
    Verify,

    /// Print entries as JSON lines
    List {
        /// First sequence number
        #[arg(long, default_value_t = 1)]
        from: u64,

        /// Last sequence number (default: latest)
        #[arg(long)]
        to: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    // Initialize tracing first
    telemetry::init_tracing(settings.log_format());

    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        return ExitCode::from(ContractError::Config(message).exit_code());
    }

    match run(cli.command, &settings) {
        Ok(code) => code,
        Err(err) => {
            let contract_error = err.downcast_ref::<ContractError>();
            let code = contract_error.map_or(10, ContractError::exit_code);
            let error_code = contract_error.map_or("INTERNAL_ERROR", ContractError::error_code);
            tracing::error!(error_code, "{err:#}");
            ExitCode::from(code)
        }
    }
}

fn acquire_password(
    password_file: Option<PathBuf>,
    password_stdin: bool,
) -> Result<KeystorePassword> {
    if let Some(path) = password_file {
        return Ok(read_password_file(&path)?);
    }
    if password_stdin {
        return Ok(read_password(std::io::stdin().lock())?);
    }
    password_from_env().ok_or_else(|| {
        ContractError::InvalidInput(
            "No keystore password. Use --password-file, --password-stdin, \
             or CONTRACT_SIGNER_KEYSTORE_PASSWORD."
                .to_string(),
        )
        .into()
    })
}

fn run(command: Commands, settings: &Settings) -> Result<ExitCode> {
    // Built per command so the audit subcommands own the database
    let coordinator = || SigningCoordinator::from_settings(settings);

    match command {
        Commands::Sign {
            signer,
            template,
            role,
            password_file,
            password_stdin,
        } => {
            let password = acquire_password(password_file, password_stdin)?;
            let record = coordinator()?.sign(&signer, role, &password, &template)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&record).context("Failed to print record")?
            );
        }

        Commands::Verify {
            template,
            collect_all,
        } => {
            let mode = if collect_all {
                VerifyMode::CollectAll
            } else {
                settings.verify_mode()
            };
            let report = coordinator()?.verify(&template, mode)?;

            for outcome in &report.outcomes {
                println!(
                    "{} ({}): {}",
                    outcome.signer_id, outcome.role, outcome.status
                );
            }
            if report.outcomes.is_empty() {
                println!("No signatures to verify; manifest of {template} is empty");
            } else if report.skipped() > 0 {
                println!(
                    "Stopped at first failure; {} signature(s) not evaluated",
                    report.skipped()
                );
            } else if report.is_valid() {
                println!("All {} signature(s) valid", report.outcomes.len());
            }

            report.into_result()?;
        }

        Commands::Reset { template } => {
            coordinator()?.reset(&template)?;
            println!("Manifest of {template} reset");
        }

        Commands::Status { template } => {
            let status = coordinator()?.status(&template, settings.policy())?;
            println!(
                "{}: {} ({} parties, {} template authors)",
                status.template, status.state, status.parties, status.template_authors
            );
            for (role, signer) in &status.missing {
                println!("missing {role} {signer}");
            }
        }

        Commands::Hash { template } => {
            println!("{}", coordinator()?.hash_template(&template)?);
        }

        Commands::Audit { command } => return run_audit(command, settings),
    }

    Ok(ExitCode::SUCCESS)
}

fn run_audit(command: AuditCommands, settings: &Settings) -> Result<ExitCode> {
    let logger = open_audit_logger(settings)?;

    match command {
        AuditCommands::Verify => match logger.verify_all()? {
            ChainStatus::Intact { entries } => {
                println!("Audit log intact ({entries} entries)");
            }
            ChainStatus::Broken { seq, reason } => {
                println!("Audit log broken at entry {seq}: {reason}");
                return Ok(ExitCode::from(1));
            }
        },
        AuditCommands::List { from, to } => {
            let to = to.unwrap_or_else(|| logger.current_seq());
            for entry in logger.list_entries(from, to)? {
                println!(
                    "{}",
                    serde_json::to_string(&entry).context("Failed to print entry")?
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
