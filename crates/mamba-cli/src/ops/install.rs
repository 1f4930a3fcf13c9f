//! The create/install pipeline.
//!
//! Prefix check, metadata fetch, index build, solve, diff, plan, confirm,
//! execute. Nothing is written to the prefix or the package cache before
//! the user confirms.

use super::Context;
use mamba_core::Error;
use mamba_core::fetch::{FetchCoordinator, SubdirData};
use mamba_core::pool::{Pool, PoolBuilder};
use mamba_core::prefix::{PrefixData, check_creatable, check_existing};
use mamba_core::solver::{SolveError, SolverFlags, SolverJob, solve};
use mamba_core::transaction::{Confirm, ExecutionSummary, Transaction, TransactionPlan};
use mamba_schema::{Channel, MatchSpec, Platform};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Which command is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The prefix must not exist yet.
    Create,
    /// The prefix must already be an environment.
    Install,
}

/// How a run ended, short of an error.
#[derive(Debug)]
pub enum Outcome {
    /// The prefix already satisfies every spec.
    NothingToDo { prefix: PathBuf },
    /// `--dry-run`: the plan was shown and nothing else happened.
    DryRun(TransactionPlan),
    /// The user answered no.
    Declined(TransactionPlan),
    /// The transaction was applied.
    Completed {
        plan: TransactionPlan,
        summary: ExecutionSummary,
    },
}

/// Parse user specs, rejecting the whole request on the first bad one.
pub fn parse_specs(specs: &[String]) -> Result<Vec<MatchSpec>, Error> {
    specs
        .iter()
        .map(|s| {
            s.parse::<MatchSpec>()
                .map_err(|e| Error::InvalidInput(format!("invalid spec '{s}': {e}")))
        })
        .collect()
}

/// Resolve the configured channels in priority order.
pub fn resolve_channels(ctx: &Context) -> Result<Vec<Channel>, Error> {
    ctx.config
        .channels
        .iter()
        .map(|c| {
            Channel::resolve(c, &ctx.config.channel_alias)
                .map_err(|e| Error::InvalidInput(format!("invalid channel '{c}': {e}")))
        })
        .collect()
}

/// One [`SubdirData`] per channel and platform, in priority order.
pub fn subdirs_for(ctx: &Context, channels: &[Channel]) -> Vec<SubdirData> {
    let cache_dir = ctx.config.repodata_cache_dir();
    channels
        .iter()
        .enumerate()
        .flat_map(|(index, channel)| {
            ctx.config
                .platform
                .search_order()
                .into_iter()
                .map(move |platform| (index, channel, platform))
        })
        .map(|(index, channel, platform)| SubdirData::new(channel, index, platform, &cache_dir))
        .collect()
}

/// Fetch metadata for every subdir and build the index.
///
/// Earlier channels get higher priority; within a channel the platform
/// subdir outranks `noarch`.
async fn load_pool(
    ctx: &Context,
    channels: &[Channel],
    installed: &PrefixData,
) -> Result<Pool, Error> {
    ctx.reporter.section("Fetching channel metadata");
    let coordinator = FetchCoordinator::new(
        ctx.client.clone(),
        ctx.config.fetch.clone(),
        ctx.config.flags.offline,
        ctx.reporter.clone(),
    );
    let outcome = coordinator.fetch_all(subdirs_for(ctx, channels)).await;
    if !outcome.is_complete() {
        return Err(Error::FetchFailed(outcome.failures));
    }

    let mut builder = PoolBuilder::new();
    builder.add_installed(installed.records().map(|r| r.record.clone()));

    let n_channels = i32::try_from(channels.len()).unwrap_or(i32::MAX);
    for loaded in outcome.loaded {
        let index = i32::try_from(loaded.subdir.channel_index).unwrap_or(i32::MAX);
        let priority = n_channels - index;
        let subpriority = i32::from(loaded.subdir.platform != Platform::NoArch);
        let name = loaded.subdir.name().to_string();
        builder.add_repo(&name, priority, subpriority, loaded.into_records());
    }
    Ok(builder.finish())
}

/// Solve on a blocking thread; the pool is shared back for reading the
/// solution.
async fn solve_blocking(
    pool: Arc<Pool>,
    jobs: Vec<SolverJob>,
    flags: SolverFlags,
) -> Result<Vec<mamba_schema::PackageRecord>, Error> {
    let solved = tokio::task::spawn_blocking(move || {
        solve(&pool, &jobs, flags).map(|solution| solution.records(&pool))
    })
    .await
    .map_err(|e| SolveError::Internal(e.to_string()))?;
    Ok(solved?)
}

/// Run the create/install pipeline for `specs`.
///
/// # Errors
///
/// Prefix problems are reported before any network access. Fetch,
/// solve and execution failures are returned as [`Error`]; a declined
/// prompt is not an error.
pub async fn install_specs(
    ctx: &Context,
    specs: &[String],
    mode: Mode,
    confirm: &dyn Confirm,
) -> Result<Outcome, Error> {
    let started = Instant::now();
    let config = &ctx.config;
    let prefix = &config.target_prefix;

    match mode {
        Mode::Create => check_creatable(prefix)?,
        Mode::Install => check_existing(prefix)?,
    }
    let requested = parse_specs(specs)?;
    if mode == Mode::Install && requested.is_empty() {
        return Err(Error::InvalidInput("no packages requested".to_string()));
    }

    if requested.is_empty() {
        if !config.flags.dry_run {
            PrefixData::create_layout(prefix)?;
        }
        ctx.reporter.success(&format!("Empty environment created at {}", prefix.display()));
        return Ok(Outcome::NothingToDo {
            prefix: prefix.clone(),
        });
    }

    let channels = resolve_channels(ctx)?;
    if channels.is_empty() {
        return Err(Error::InvalidInput(
            "no channels configured; pass -c <channel>".to_string(),
        ));
    }

    let installed = PrefixData::load(prefix)?;
    let pool = Arc::new(load_pool(ctx, &channels, &installed).await?);

    ctx.reporter.section("Solving");
    tracing::info!("solving {} specs against {} records", requested.len(), pool.len());
    let jobs = requested.iter().cloned().map(SolverJob::install).collect();
    let flags = SolverFlags {
        allow_downgrade: config.flags.allow_downgrade,
    };
    let solution = solve_blocking(pool, jobs, flags).await?;

    let transaction = Transaction::from_solution(&installed, &solution, &requested);
    if transaction.is_empty() {
        if mode == Mode::Create && !config.flags.dry_run {
            PrefixData::create_layout(prefix)?;
        }
        ctx.reporter.success("All requested packages already installed");
        return Ok(Outcome::NothingToDo {
            prefix: prefix.clone(),
        });
    }

    let plan = transaction.plan(prefix, &ctx.cache, config.flags.dry_run);
    ctx.reporter.plan(&plan);

    if config.flags.dry_run {
        ctx.reporter.info("Dry run, nothing was changed");
        return Ok(Outcome::DryRun(plan));
    }
    if !config.flags.always_yes && !confirm.confirm(&plan)? {
        ctx.reporter.warning("Aborted");
        return Ok(Outcome::Declined(plan));
    }

    let mut target = installed;
    let summary = transaction
        .execute(
            &mut target,
            &ctx.cache,
            ctx.reporter.clone(),
            config.fetch.concurrency,
        )
        .await?;

    let action = match mode {
        Mode::Create => "created environment with",
        Mode::Install => "installed",
    };
    ctx.reporter
        .summary(summary.linked, action, started.elapsed().as_secs_f64());
    Ok(Outcome::Completed { plan, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mamba_core::NullReporter;
    use mamba_core::transaction::AlwaysYes;

    fn context(root: &std::path::Path, prefix: &std::path::Path, channels: &[&str]) -> Context {
        let mut config = mamba_core::Config::new(root, prefix);
        config.channels = channels.iter().map(|c| (*c).to_string()).collect();
        config.channel_alias = "https://example.invalid".to_string();
        config.platform = Platform::Linux64;
        Context::new(config, Arc::new(NullReporter)).unwrap()
    }

    #[test]
    fn test_bad_spec_is_invalid_input() {
        let err = parse_specs(&[">=1.0".to_string()]).unwrap_err();
        assert_eq!(err.kind(), mamba_core::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_subdirs_follow_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &dir.path().join("env"), &["chA", "chB"]);
        let channels = resolve_channels(&ctx).unwrap();
        let names: Vec<String> = subdirs_for(&ctx, &channels)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, ["chA/linux-64", "chA/noarch", "chB/linux-64", "chB/noarch"]);
    }

    #[tokio::test]
    async fn test_create_rejects_existing_prefix_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        PrefixData::create_layout(&env).unwrap();
        let ctx = context(dir.path(), &env, &["chA"]);

        let err = install_specs(&ctx, &["foo".to_string()], Mode::Create, &AlwaysYes)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), mamba_core::ErrorKind::InvalidPrefixState);
        assert!(!dir.path().join("pkgs").exists());
    }

    #[tokio::test]
    async fn test_install_requires_environment() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &dir.path().join("missing"), &["chA"]);

        let err = install_specs(&ctx, &["foo".to_string()], Mode::Install, &AlwaysYes)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_create_without_specs_makes_empty_env() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("env");
        let ctx = context(dir.path(), &env, &[]);

        let outcome = install_specs(&ctx, &[], Mode::Create, &AlwaysYes).await.unwrap();
        assert!(matches!(outcome, Outcome::NothingToDo { .. }));
        assert!(env.join("conda-meta").join("history").exists());
    }
}
