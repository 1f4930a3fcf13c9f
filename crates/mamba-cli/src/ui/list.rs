//! `micromamba list` output.

use super::format_size;
use crossterm::style::Stylize;
use mamba_core::prefix::PrefixData;
use serde_json::{Value, json};

const NAME_WIDTH: usize = 28;
const VERSION_WIDTH: usize = 16;
const BUILD_WIDTH: usize = 20;

/// Print one row per installed package.
pub fn print_list(data: &PrefixData) {
    println!();
    println!("  List of packages in environment: {}", data.prefix().display());
    println!();

    if data.is_empty() {
        println!("  No packages installed.");
        return;
    }

    let header = format!(
        "  {:<NAME_WIDTH$} {:<VERSION_WIDTH$} {:<BUILD_WIDTH$} {}",
        "Name", "Version", "Build", "Channel"
    );
    println!("{}", header.dark_grey());

    let mut total_size = 0;
    for installed in data.records() {
        let record = &installed.record;
        total_size += record.size;
        println!(
            "  {:<NAME_WIDTH$} {:<VERSION_WIDTH$} {:<BUILD_WIDTH$} {}",
            record.name,
            record.version.as_str(),
            record.build,
            record.channel.as_str().dark_grey()
        );
    }

    println!();
    println!(
        "  {} packages, {}",
        data.len(),
        format_size(total_size).dark_grey()
    );
}

/// Installed packages in the shape of conda's `list --json`.
pub fn list_json(data: &PrefixData) -> Value {
    data.records()
        .map(|installed| {
            let record = &installed.record;
            json!({
                "name": record.name,
                "version": record.version.as_str(),
                "build_string": record.build,
                "build_number": record.build_number,
                "channel": record.channel,
                "platform": record.subdir,
                "dist_name": record.dist_name(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mamba_schema::{PackageRecord, PrefixRecord};

    #[test]
    fn test_list_json_is_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        PrefixData::create_layout(dir.path()).unwrap();
        let mut data = PrefixData::load(dir.path()).unwrap();
        for name in ["zlib", "python"] {
            let mut record = PackageRecord::new(name, "1.0".parse().unwrap(), "h0_0");
            record.channel = "conda-forge".to_string();
            data.insert(PrefixRecord::from_record(record)).unwrap();
        }

        let listed = list_json(&data);
        let names: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["python", "zlib"]);
        assert_eq!(listed[0]["dist_name"], "python-1.0-h0_0");
        assert_eq!(listed[0]["channel"], "conda-forge");
    }
}
