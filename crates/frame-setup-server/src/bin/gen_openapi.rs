//! Writes the status API's OpenAPI document to `openapi.json` in the
//! workspace root.
//!
//! Run with: cargo run --bin gen-openapi -p frame-setup-server
//!
//! Add `--features mock-bluetooth` to include the channel injection route.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let json = frame_setup_server::api::get_openapi_json()
        .context("Failed to serialize OpenAPI document")?;

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .context("Could not find workspace root")?;
    let output_path = workspace_root.join("openapi.json");

    fs::write(&output_path, &json)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;
    println!("Written to: {}", output_path.display());

    let spec: serde_json::Value = serde_json::from_str(&json)?;
    if let Some(paths) = spec.get("paths").and_then(|p| p.as_object()) {
        println!("Paths: {}", paths.len());
    }
    if let Some(schemas) = spec
        .pointer("/components/schemas")
        .and_then(|s| s.as_object())
    {
        println!("Schemas: {}", schemas.len());
    }

    Ok(())
}
