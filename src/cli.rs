//! Command-line surface
//!
//! One flat command. Seed selection (`--pks` vs `--timeframe`) is
//! mutually exclusive; inspection flags bypass traversal entirely. The
//! password never crosses the command line: it comes from `PGPASSWORD`
//! (or a `.env` file).

use crate::config::{
    Action, DumpSpec, OutputTarget, RunConfig, SeedSelection, Settings, TruncateArg,
};
use crate::connection::{ConnectionParams, ReadOnlyPolicy};
use crate::error::{usage_error, Result};
use crate::traverse::TraversalMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pgcarve",
    version,
    about = "Carve a referentially-closed subset out of a PostgreSQL database",
    long_about = None
)]
pub struct Cli {
    /// Source database host
    #[arg(long)]
    pub host: Option<String>,

    /// Source database port
    #[arg(long)]
    pub port: Option<u16>,

    /// Source database user
    #[arg(long)]
    pub user: Option<String>,

    /// Source database name
    #[arg(long)]
    pub database: Option<String>,

    /// Schema to carve from
    #[arg(long, default_value = "public")]
    pub schema: String,

    /// Seed table
    #[arg(long)]
    pub table: Option<String>,

    /// Seed primary keys, comma-separated; composite tuples use ':'
    /// between components
    #[arg(long, value_delimiter = ',', conflicts_with = "timeframe")]
    pub pks: Option<Vec<String>>,

    /// Seed every row of the table inside col:lo:hi (inclusive)
    #[arg(long)]
    pub timeframe: Option<String>,

    /// Timeframe scope on a related table, as table:col:lo:hi (repeatable)
    #[arg(long = "truncate")]
    pub truncates: Vec<String>,

    /// Follow self-referencing foreign keys everywhere, not just from seeds
    #[arg(long)]
    pub wide: bool,

    /// Keep source primary-key values instead of remapping them
    #[arg(long)]
    pub keep_pks: bool,

    /// Emit idempotent schema-creation DDL before the data
    #[arg(long)]
    pub create_schema: bool,

    /// Write the replay script to this file or directory instead of
    /// standard output; bare --output uses the default dump directory
    #[arg(long, num_args = 0..=1)]
    pub output: Option<Option<PathBuf>>,

    /// Fail unless the session can be made read-only
    #[arg(long, conflicts_with = "allow_write_connection")]
    pub require_read_only: bool,

    /// Skip the read-only session setup entirely
    #[arg(long)]
    pub allow_write_connection: bool,

    /// Skip the schema cache for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Drop every cached schema graph before running
    #[arg(long)]
    pub clear_cache: bool,

    /// List tables in the schema and exit
    #[arg(long)]
    pub tables: bool,

    /// Describe one table and exit
    #[arg(long, value_name = "TABLE")]
    pub describe: Option<String>,

    /// Print the foreign-key graph and exit
    #[arg(long)]
    pub graph: bool,

    /// Log level (off unless given or LOG_LEVEL is set)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Stop expanding records beyond this traversal depth
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Treat dangling foreign-key references as fatal
    #[arg(long)]
    pub strict_refs: bool,
}

impl Cli {
    /// Effective log level: flag wins over environment.
    pub fn effective_log_level(&self, settings: &Settings) -> Option<String> {
        self.log_level.clone().or_else(|| settings.log_level.clone())
    }

    /// Merge flags with environment settings into a validated RunConfig.
    pub fn into_run_config(self, settings: &Settings) -> Result<RunConfig> {
        let action = self.resolve_action()?;

        let database = self
            .database
            .or_else(|| settings.database.database.clone())
            .ok_or_else(|| usage_error("no database given (--database or DB_NAME)"))?;

        let params = ConnectionParams {
            host: self.host.unwrap_or_else(|| settings.database.host.clone()),
            port: self.port.unwrap_or(settings.database.port),
            user: self.user.unwrap_or_else(|| settings.database.user.clone()),
            password: settings.database.password.clone(),
            database,
        };

        let read_only = if self.require_read_only {
            ReadOnlyPolicy::Require
        } else if self.allow_write_connection {
            ReadOnlyPolicy::Allow
        } else {
            ReadOnlyPolicy::Advisory
        };

        Ok(RunConfig {
            params,
            schema: self.schema,
            action,
            cache: crate::config::CacheConfig {
                enabled: settings.cache.enabled && !self.no_cache,
                ttl_hours: settings.cache.ttl_hours,
            },
            clear_cache: self.clear_cache,
            read_only,
            statement_timeout_minutes: settings.connection_ttl_minutes,
            dump_dir: settings.dump_dir.clone(),
        })
    }

    fn resolve_action(&self) -> Result<Action> {
        if self.tables {
            return Ok(Action::ListTables);
        }
        if let Some(table) = &self.describe {
            return Ok(Action::Describe(table.clone()));
        }
        if self.graph {
            return Ok(Action::Graph);
        }

        let Some(table) = &self.table else {
            if self.clear_cache {
                return Ok(Action::ClearCacheOnly);
            }
            return Err(usage_error(
                "nothing to do: give --table with --pks/--timeframe, or an inspection flag",
            ));
        };

        let seed = match (&self.pks, &self.timeframe) {
            (Some(pks), None) => SeedSelection::Pks(
                pks.iter()
                    .map(|raw| raw.split(':').map(|s| s.trim().to_string()).collect())
                    .collect(),
            ),
            (None, Some(spec)) => {
                let (column, lower, upper) = parse_timeframe(spec)?;
                SeedSelection::Timeframe { column, lower, upper }
            }
            (Some(_), Some(_)) => {
                return Err(usage_error("--pks and --timeframe are mutually exclusive"))
            }
            (None, None) => {
                return Err(usage_error("--table requires --pks or --timeframe"))
            }
        };

        let truncates = self
            .truncates
            .iter()
            .map(|raw| parse_truncate(raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(Action::Dump(Box::new(DumpSpec {
            table: table.clone(),
            seed,
            truncates,
            mode: if self.wide {
                TraversalMode::Wide
            } else {
                TraversalMode::Strict
            },
            remap: !self.keep_pks,
            create_schema: self.create_schema,
            output: match &self.output {
                None => OutputTarget::Stdout,
                Some(None) => OutputTarget::DumpDir,
                Some(Some(path)) => OutputTarget::Path(path.clone()),
            },
            max_depth: self.max_depth,
            strict_refs: self.strict_refs,
        })))
    }
}

/// `col:lo:hi` with inclusive date/time bounds.
fn parse_timeframe(raw: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(usage_error(format!(
            "malformed timeframe '{}': expected col:lo:hi with date bounds",
            raw
        )));
    }
    Ok((parts[0].to_string(), parts[1].to_string(), parts[2].to_string()))
}

/// `table:col:lo:hi`.
fn parse_truncate(raw: &str) -> Result<TruncateArg> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return Err(usage_error(format!(
            "malformed truncate '{}': expected table:col:lo:hi with date bounds",
            raw
        )));
    }
    Ok(TruncateArg {
        table: parts[0].to_string(),
        column: parts[1].to_string(),
        lower: parts[2].to_string(),
        upper: parts[3].to_string(),
    })
}
