// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use crate::config::{default_config_path, Config};
use crate::error::Result;

/// Prints where configuration is read from and the effective values.
pub fn run(config: &Config, path: Option<&Path>) -> Result<()> {
    let source = path
        .map(Path::to_path_buf)
        .or_else(default_config_path);
    match source {
        Some(path) if path.exists() => println!("# {}", path.display()),
        Some(path) => println!("# {} (not found, using defaults)", path.display()),
        None => println!("# no config directory, using defaults"),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
