use anyhow::Result;
use mamba_core::prefix::{PrefixData, check_existing};

use crate::ui::list::{list_json, print_list};
use crate::{GlobalArgs, TargetArgs, active_prefix};

/// List installed packages
pub fn list(global: &GlobalArgs, target: &TargetArgs) -> Result<()> {
    let root = global.root_prefix()?;
    let prefix = target.resolve(&root, active_prefix())?;
    check_existing(&prefix).map_err(mamba_core::Error::from)?;
    let data = PrefixData::load(&prefix).map_err(mamba_core::Error::from)?;

    if global.json {
        println!("{:#}", list_json(&data));
    } else {
        print_list(&data);
    }
    Ok(())
}
