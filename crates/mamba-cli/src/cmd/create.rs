use crate::ops::install::Mode;
use crate::{GlobalArgs, TargetArgs};

/// Create a new environment, optionally with packages.
pub async fn create(
    global: &GlobalArgs,
    target: &TargetArgs,
    specs: &[String],
) -> anyhow::Result<()> {
    let root = global.root_prefix()?;
    let prefix = target.resolve(&root, None)?;
    super::transact(global.config(root, prefix), specs, Mode::Create).await
}
