//! Subcommand entry points.
//!
//! Each command resolves its target, builds the [`Config`] and hands off to
//! [`crate::ops`]; output formatting lives in [`crate::ui`].

pub mod create;
pub mod install;
pub mod list;

use crate::ops::install::{Mode, install_specs};
use crate::ops::Context;
use crate::ui::{OutputMode, TerminalPrompt, UiActor, outcome_json};
use mamba_core::Config;
use std::sync::Arc;

/// Run a create/install transaction with the console UI attached.
async fn transact(config: Config, specs: &[String], mode: Mode) -> anyhow::Result<()> {
    let json = config.flags.json;
    let ui = UiActor::spawn(OutputMode::from_flags(&config.flags));
    let reporter = ui.reporter();
    let prompt = TerminalPrompt::new(reporter.clone());

    let outcome = match Context::new(config, Arc::new(reporter)) {
        Ok(ctx) => install_specs(&ctx, specs, mode, &prompt).await,
        Err(e) => Err(e),
    };
    ui.finish();

    let outcome = outcome?;
    if json {
        println!("{:#}", outcome_json(&outcome));
    }
    Ok(())
}
