// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

/// Return the printlink data directory. Not created here; saving the
/// config creates it on demand.
pub fn data_dir() -> PathBuf {
    base_dir().join("printlink")
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    data_dir().join("config.json")
}

fn base_dir() -> PathBuf {
    // Try XDG data dir, then fallback to home
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort
    PathBuf::from("/tmp")
}
