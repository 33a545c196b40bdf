//! CLI surface for retcond.
//!
//! One executable, four subcommands, each naming a foreign key as
//! `ENTITY SOURCE KEY`. Exit codes: 0 success, 1 configuration error,
//! 2 reconciliation error.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::Config;
use crate::core::{EntityName, ForeignKey, SourceName};
use crate::kernel::trace::LogSink;
use crate::kernel::{self, Context, Outcome, Request};
use crate::store::SqliteStore;
use crate::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "retcond",
    version,
    about = "Retcon reconciliation engine",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Configuration file (default: /etc/retcond/retcond.toml, or
    /// $RETCON_CONFIG when set).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Notify retcon that a record was created in a source.
    Create(KeyArgs),

    /// Probe the current per-source views of a record.
    Read(KeyArgs),

    /// Notify retcon that a record changed in a source.
    Update(KeyArgs),

    /// Notify retcon that a record was deleted from a source.
    Delete(KeyArgs),
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Entity name from the configuration.
    pub entity: String,

    /// Source name from the entity's enabled list.
    pub source: String,

    /// Source-local foreign key text.
    pub key: String,
}

impl KeyArgs {
    fn foreign_key(&self) -> Result<ForeignKey> {
        let entity = EntityName::new(self.entity.clone())?;
        let source = SourceName::new(self.source.clone())?;
        Ok(ForeignKey::new(entity, source, self.key.clone())?)
    }
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: &Cli, config: &Config) -> Result<()> {
    let database = config
        .server
        .database
        .as_ref()
        .ok_or(crate::config::ConfigError::Missing {
            field: "server.database",
        })?;
    let store = SqliteStore::open(database)?;
    let mut context = Context::from_config(config, Arc::new(store))?;
    if cli.verbose > 0 {
        context = context.with_trace(Arc::new(LogSink));
    }

    let request = match &cli.command {
        Commands::Create(args) => Request::Create(args.foreign_key()?),
        Commands::Read(args) => Request::Read(args.foreign_key()?),
        Commands::Update(args) => Request::Update(args.foreign_key()?),
        Commands::Delete(args) => Request::Delete(args.foreign_key()?),
    };

    let outcome = kernel::run(&context, &request)?;
    render(&outcome);
    Ok(())
}

fn render(outcome: &Outcome) {
    match outcome {
        Outcome::NoOp => println!("nothing to do"),
        Outcome::Reconciled(summary) => {
            if summary.deleted {
                println!("{}: deleted", summary.ik);
            } else {
                println!(
                    "{}: reconciled ({})",
                    summary.ik,
                    serde_json::to_string(&summary.new_initial.to_json())
                        .unwrap_or_else(|_| "<unrenderable>".into())
                );
            }
            for (source, status) in &summary.sources {
                println!("  {source}: {status}");
            }
            for source in &summary.rejected_sources {
                println!("  {source}: patch rejected");
            }
        }
        Outcome::Probed(views) => {
            for (source, view) in views {
                match view {
                    Ok(doc) => println!(
                        "{source}: {}",
                        serde_json::to_string(&doc.to_json())
                            .unwrap_or_else(|_| "<unrenderable>".into())
                    ),
                    Err(reason) => println!("{source}: {reason}"),
                }
            }
        }
    }
}

/// Process exit code for an error, per the CLI contract.
pub fn exit_code(error: &Error) -> i32 {
    match error {
        Error::Config(_) => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands_and_globals() {
        let cli = parse_from([
            "retcond", "--config", "/tmp/r.toml", "-v", "update", "customer", "data", "K1",
        ]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/r.toml")));
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Update(args) => {
                assert_eq!(args.entity, "customer");
                assert_eq!(args.source, "data");
                assert_eq!(args.key, "K1");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_errors_exit_one_everything_else_two() {
        let config_err = Error::Config(crate::config::ConfigError::Missing { field: "x" });
        assert_eq!(exit_code(&config_err), 1);
        let store_err = Error::Store(crate::store::StoreError::Busy {
            reason: "test".into(),
        });
        assert_eq!(exit_code(&store_err), 2);
    }
}
