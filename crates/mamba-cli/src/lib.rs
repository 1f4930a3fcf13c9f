//! micromamba - conda environments from the command line
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! A thin front-end over `mamba-core`: arguments become a [`Config`], the
//! console reporter and terminal prompt are plugged into the core seams,
//! and core errors become process exit codes.
//!
//! # Directory Layout
//!
//! ```text
//! $MAMBA_ROOT_PREFIX/
//! ├── pkgs/        # Extracted packages and archives
//! │   └── cache/   # Cached repodata.json per subdir
//! └── envs/        # Named environments
//!     └── <name>/conda-meta/
//! ```

pub mod cmd;
pub mod ops;
pub mod ui;

use clap::{ArgAction, Args, Parser, Subcommand};
use mamba_core::config::Flags;
use mamba_core::{Config, Error};
use mamba_schema::Platform;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the root prefix.
pub const ROOT_PREFIX_ENV: &str = "MAMBA_ROOT_PREFIX";

/// Environment variable naming the active environment.
pub const ACTIVE_PREFIX_ENV: &str = "CONDA_PREFIX";

#[derive(Debug, Parser)]
#[command(name = "micromamba")]
#[command(author, version, about = "Create conda environments and install packages into them")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new environment
    Create {
        #[command(flatten)]
        target: TargetArgs,
        /// Packages to install, as match specs (e.g. python=3.8 "numpy>=1.20")
        specs: Vec<String>,
    },
    /// Install packages into an existing environment
    Install {
        #[command(flatten)]
        target: TargetArgs,
        /// Packages to install, as match specs
        #[arg(required = true)]
        specs: Vec<String>,
    },
    /// List packages installed in an environment
    List {
        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
#[allow(clippy::struct_excessive_bools)]
pub struct GlobalArgs {
    /// Root prefix holding the package cache and named environments
    #[arg(short = 'r', long, global = true, env = "MAMBA_ROOT_PREFIX")]
    pub root_prefix: Option<PathBuf>,

    /// Channel to search, highest priority first (repeatable)
    #[arg(short = 'c', long = "channel", global = true)]
    pub channels: Vec<String>,

    /// Base URL that bare channel names resolve against
    #[arg(long, global = true)]
    pub channel_alias: Option<String>,

    /// Platform subdir to solve for (defaults to the host)
    #[arg(long, global = true)]
    pub platform: Option<Platform>,

    /// Additional package cache directory, searched after <root>/pkgs (repeatable)
    #[arg(long = "pkgs-dir", global = true)]
    pub pkgs_dirs: Vec<PathBuf>,

    /// Use cached metadata and packages only
    #[arg(long, global = true)]
    pub offline: bool,

    /// Show the transaction without executing it
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Never replace an installed package with an older version
    #[arg(long, global = true)]
    pub no_allow_downgrade: bool,

    /// Treat cached repodata younger than this as fresh
    #[arg(long, global = true, value_name = "SECONDS")]
    pub repodata_ttl: Option<u64>,

    /// Maximum concurrent downloads
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Verify TLS certificates (true or false)
    #[arg(long, alias = "ssl_verify", global = true, value_name = "BOOL")]
    pub ssl_verify: Option<bool>,

    /// PEM bundle of additional CA certificates to trust
    #[arg(long, alias = "cacert_path", global = true)]
    pub cacert_path: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl GlobalArgs {
    /// The root prefix, falling back to `~/micromamba`.
    pub fn root_prefix(&self) -> Result<PathBuf, Error> {
        self.root_prefix
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join("micromamba")))
            .map(|root| absolute(&root))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "cannot determine the root prefix; set {ROOT_PREFIX_ENV} or pass --root-prefix"
                ))
            })
    }

    /// Build the run configuration for `target_prefix`.
    pub fn config(&self, root_prefix: PathBuf, target_prefix: PathBuf) -> Config {
        let mut config = Config::new(root_prefix, target_prefix);
        config.channels.clone_from(&self.channels);
        if let Some(alias) = &self.channel_alias {
            config.channel_alias.clone_from(alias);
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        config.extra_pkgs_dirs.clone_from(&self.pkgs_dirs);
        config.flags = Flags {
            offline: self.offline,
            dry_run: self.dry_run,
            always_yes: self.yes,
            json: self.json,
            quiet: self.quiet,
            allow_downgrade: !self.no_allow_downgrade,
        };
        config.fetch.local_repodata_ttl = self.repodata_ttl.map(Duration::from_secs);
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency.max(1);
        }
        if let Some(verify) = self.ssl_verify {
            config.fetch.ssl_verify = verify;
        }
        config.fetch.cacert_path = self.cacert_path.as_deref().map(absolute);
        config
    }
}

/// Which environment a subcommand acts on.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Environment name, under <root>/envs
    #[arg(short = 'n', long, conflicts_with = "prefix")]
    pub name: Option<String>,

    /// Environment path
    #[arg(short = 'p', long)]
    pub prefix: Option<PathBuf>,
}

impl TargetArgs {
    /// Resolve the environment path; `fallback` applies when neither
    /// `--name` nor `--prefix` was given.
    pub fn resolve(&self, root: &Path, fallback: Option<PathBuf>) -> Result<PathBuf, Error> {
        if let Some(prefix) = &self.prefix {
            return Ok(absolute(prefix));
        }
        if let Some(name) = &self.name {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(Error::InvalidInput(format!("invalid environment name '{name}'")));
            }
            return Ok(root.join("envs").join(name));
        }
        fallback.ok_or_else(|| {
            Error::InvalidInput("no target environment; pass -n <name> or -p <path>".to_string())
        })
    }
}

/// The currently activated environment, if any.
pub fn active_prefix() -> Option<PathBuf> {
    std::env::var_os(ACTIVE_PREFIX_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
