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

//! Unified error handling for Itefan
//!
//! A single error type shared by the hardware, configuration and telemetry
//! layers. `main` wraps it in `anyhow` for context on the way out.

use std::io;
use std::path::PathBuf;

/// Result type alias using ItefanError
pub type Result<T> = std::result::Result<T, ItefanError>;

#[derive(thiserror::Error, Debug)]
pub enum ItefanError {
    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Port I/O at 0x{port:04x} failed: {source}")]
    PortAccess {
        port: u16,
        source: io::Error,
    },

    #[error("Port backend not supported on this platform: {0}")]
    UnsupportedBackend(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Environment controller not found: EC base reads 0x{base:04x}")]
    EcNotFound {
        base: u16,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ============================================================================
    // Telemetry Errors
    // ============================================================================
    #[error("Telemetry endpoint {endpoint} unreachable: {reason}")]
    TelemetryConnect {
        endpoint: String,
        reason: String,
    },
}

impl ItefanError {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn port(port: u16, source: io::Error) -> Self {
        Self::PortAccess { port, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = ItefanError::invalid_config("interval", "must be at least 1 second");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for interval: must be at least 1 second"
        );
    }

    #[test]
    fn test_port_access_display_is_hex() {
        let err = ItefanError::port(0x2e, io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "Port I/O at 0x002e failed: boom");
    }

    #[test]
    fn test_io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: ItefanError = io_err.into();
        assert!(matches!(err, ItefanError::Io(_)));
    }
}
