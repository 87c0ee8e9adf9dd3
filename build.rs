use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let mut instructions = Vec::new();
    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit_to(&mut instructions));

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        instructions.clear();
        Emitter::default()
            .idempotent()
            .fail_on_error()
            .emit_to(&mut instructions)?;
    }

    let instructions = String::from_utf8(instructions)?;
    print!("{instructions}");

    let describe = instructions
        .lines()
        .find_map(|line| line.split_once("rustc-env=VERGEN_GIT_DESCRIBE="))
        .map_or("unknown", |(_, describe)| describe);

    // Add build timestamp
    let now = match env::var("SOURCE_DATE_EPOCH") {
        Ok(val) => chrono::Utc
            .timestamp_opt(val.parse::<i64>()?, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("SOURCE_DATE_EPOCH out of range: {val}"))?,
        Err(_) => chrono::Utc::now(),
    };
    let build_timestamp = now.format("%Y-%m-%d %H:%M:%S UTC");

    println!("cargo:rustc-env=BUILD_TIMESTAMP={build_timestamp}");

    let esparse_version = get_esparse_version_from_metadata().unwrap_or_else(|_| {
        read_esparse_version_fallback().unwrap_or_else(|_| "unknown".to_string())
    });
    println!("cargo:rustc-env=ESPARSE_VERSION={esparse_version}");

    println!(
        "cargo:rustc-env=ESDEMUX_LONG_VERSION={} ({describe}), esparse {esparse_version}, built {build_timestamp}",
        env::var("CARGO_PKG_VERSION")?
    );

    // Tell cargo to rerun this build script if the esparse Cargo.toml changes
    println!("cargo:rerun-if-changed=esparse/Cargo.toml");

    Ok(())
}

/// Get esparse version using cargo metadata (works with published and local dependencies)
fn get_esparse_version_from_metadata() -> Result<String> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version", "1"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    // Workspace members first (local development)
    if let Some(packages) = metadata["packages"].as_array() {
        let version = packages
            .iter()
            .filter(|package| package["name"].as_str() == Some("esparse"))
            .find_map(|package| package["version"].as_str());
        if let Some(version) = version {
            return Ok(version.to_string());
        }
    }

    // Dependency graph ids look like "esparse 0.3.0 (registry+...)"
    if let Some(nodes) = metadata["resolve"]["nodes"].as_array() {
        for node in nodes {
            let Some(id) = node["id"].as_str() else {
                continue;
            };
            if let Some(rest) = id.strip_prefix("esparse ")
                && let Some(version) = rest.split(' ').next()
            {
                return Ok(version.to_string());
            }
        }
    }

    anyhow::bail!("esparse package not found in metadata");
}

/// Fallback: manually parse esparse/Cargo.toml
fn read_esparse_version_fallback() -> Result<String> {
    let toml_content = fs::read_to_string("esparse/Cargo.toml")?;

    for line in toml_content.lines() {
        let line = line.trim();
        if line.starts_with("version")
            && let Some((_, version_part)) = line.split_once('=')
        {
            let version = version_part.trim().trim_matches('"').trim_matches('\'');
            return Ok(version.to_string());
        }
    }

    anyhow::bail!("Could not find version in esparse/Cargo.toml");
}
