/*
 * This file is part of Itefan.
 *
 * Copyright (C) 2025 Itefan contributors
 *
 * Itefan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Itefan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Itefan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::Path;

use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ITEFAN_LOG";
const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

/// Where log records end up
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Journald,
    Stderr,
}

/// Filter directive: `ITEFAN_LOG` if set, else debug or info
pub fn log_filter(debug: bool) -> String {
    match std::env::var(LOG_ENV) {
        Ok(v) if !v.trim().is_empty() => v,
        _ if debug => "debug".to_string(),
        _ => "info".to_string(),
    }
}

fn stderr_subscriber(filter: &str) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

/// Install the global subscriber. Journald when the journal socket exists,
/// stderr otherwise. Call once.
pub fn init_logging(debug: bool) -> LogTarget {
    let filter = log_filter(debug);

    let target = if Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(journald)
                    .with(EnvFilter::new(&filter))
                    .init();
                LogTarget::Journald
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
                stderr_subscriber(&filter);
                LogTarget::Stderr
            }
        }
    } else {
        stderr_subscriber(&filter);
        LogTarget::Stderr
    };

    info!(
        "STARTUP: Logging to {} (filter '{}')",
        match target {
            LogTarget::Journald => "systemd journal",
            LogTarget::Stderr => "stderr",
        },
        filter
    );
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_defaults() {
        std::env::remove_var(LOG_ENV);
        assert_eq!(log_filter(false), "info");
        assert_eq!(log_filter(true), "debug");
    }

    #[test]
    #[serial]
    fn test_filter_env_override() {
        std::env::set_var(LOG_ENV, "itefan=trace");
        assert_eq!(log_filter(false), "itefan=trace");
        assert_eq!(log_filter(true), "itefan=trace");
        std::env::set_var(LOG_ENV, "  ");
        assert_eq!(log_filter(true), "debug");
        std::env::remove_var(LOG_ENV);
    }
}
