use crate::ops::install::Mode;
use crate::{GlobalArgs, TargetArgs, active_prefix};

/// Install packages into an existing environment.
///
/// Without `-n`/`-p` the active environment (`$CONDA_PREFIX`) is used.
pub async fn install(
    global: &GlobalArgs,
    target: &TargetArgs,
    specs: &[String],
) -> anyhow::Result<()> {
    let root = global.root_prefix()?;
    let prefix = target.resolve(&root, active_prefix())?;
    super::transact(global.config(root, prefix), specs, Mode::Install).await
}
