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

//! Command line, config file and the resolved controller configuration
//!
//! Priority: command line flags, then the JSON file named by `--config`,
//! then built-in defaults. The result is validated once and never changes
//! for the lifetime of the process.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{ItefanError, Result};
use crate::port::BackendKind;
use crate::temperature::MissingReadingPolicy;

pub const DEFAULT_SETPOINT: i32 = 37;
pub const DEFAULT_PWM_INIT: u8 = 128;
pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_OVERHEAT: i32 = 45;
pub const DEFAULT_PWM_MIN: u8 = 80;
pub const PWM_MAX: u8 = 255;
pub const DEFAULT_KP: f64 = 50.0;
pub const DEFAULT_KI: f64 = 0.5;
pub const DEFAULT_KD: f64 = 0.0;
pub const DEFAULT_IMAX: f64 = 255.0;
pub const DEFAULT_CPU_AVG: usize = 10;
pub const DEFAULT_METRIC_PREFIX: &str = "fancontrol";
/// Plausible range for temperature thresholds, in °C
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<i32> = -100..=200;

const MAX_DRIVE_ID_LEN: usize = 64;

#[derive(Parser, Debug, Default)]
#[command(name = "itefan")]
#[command(version)]
#[command(about = "PID fan control for ITE Super I/O chips")]
#[command(long_about = "PID fan control for ITE Super I/O chips

Drives both PWM outputs of an IT8613E/IT8772E environment controller from
the hottest monitored drive and a rolling CPU package average.

EXAMPLES:
    itefan --drive_list=sda,sdb
    itefan --drive_list=sda --setpoint=40 --graphite_server=graphite:2003
    itefan --config=/etc/itefan.json --debug=1

ENVIRONMENT VARIABLES:
    ITEFAN_LOG=debug       Override the log filter

FILES:
    /dev/port              Used with --port_backend=devport")]
pub struct Cli {
    /// Comma separated drive names, e.g. sda,sdb
    #[arg(long = "drive_list", value_delimiter = ',')]
    pub drive_list: Option<Vec<String>>,

    /// 1 enables debug logging
    #[arg(long)]
    pub debug: Option<i32>,

    /// Target temperature in degrees Celsius
    #[arg(long, allow_hyphen_values = true)]
    pub setpoint: Option<i32>,

    /// Bias PWM, also written once at startup
    #[arg(long)]
    pub pwminit: Option<i64>,

    /// Seconds between iterations
    #[arg(long)]
    pub interval: Option<i64>,

    /// Temperature that triggers a warning in the log
    #[arg(long, allow_hyphen_values = true)]
    pub overheat: Option<i32>,

    /// Lowest PWM ever written
    #[arg(long)]
    pub pwmmin: Option<i64>,

    #[arg(long, allow_hyphen_values = true)]
    pub kp: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub ki: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub kd: Option<f64>,

    /// Bound on the accumulated integral
    #[arg(long)]
    pub imax: Option<f64>,

    /// Number of CPU samples in the rolling average
    #[arg(long = "cpu_avg")]
    pub cpu_avg: Option<i64>,

    /// Graphite plaintext endpoint, host:port
    #[arg(long = "graphite_server")]
    pub graphite_server: Option<String>,

    /// Prefix of every metric name
    #[arg(long = "graphite_prefix")]
    pub graphite_prefix: Option<String>,

    #[arg(long = "port_backend", value_enum)]
    pub port_backend: Option<BackendKind>,

    /// What a failed probe contributes to the aggregate
    #[arg(long = "missing_reading", value_enum)]
    pub missing_reading: Option<MissingReadingPolicy>,

    /// smartctl binary
    #[arg(long)]
    pub smartctl: Option<PathBuf>,

    /// lm-sensors binary
    #[arg(long)]
    pub sensors: Option<PathBuf>,

    /// JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// On-disk configuration. Every key is optional and overridden by the
/// matching command line flag.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub drive_list: Option<Vec<String>>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub setpoint: Option<i32>,
    #[serde(default)]
    pub pwminit: Option<i64>,
    #[serde(default)]
    pub interval: Option<i64>,
    #[serde(default)]
    pub overheat: Option<i32>,
    #[serde(default)]
    pub pwmmin: Option<i64>,
    #[serde(default)]
    pub kp: Option<f64>,
    #[serde(default)]
    pub ki: Option<f64>,
    #[serde(default)]
    pub kd: Option<f64>,
    #[serde(default)]
    pub imax: Option<f64>,
    #[serde(default)]
    pub cpu_avg: Option<i64>,
    #[serde(default)]
    pub graphite_server: Option<String>,
    #[serde(default)]
    pub graphite_prefix: Option<String>,
    #[serde(default)]
    pub port_backend: Option<BackendKind>,
    #[serde(default)]
    pub missing_reading: Option<MissingReadingPolicy>,
    #[serde(default)]
    pub smartctl: Option<PathBuf>,
    #[serde(default)]
    pub sensors: Option<PathBuf>,
}

pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let data = fs::read_to_string(path).map_err(|e| ItefanError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_str(&data)?)
}

/// A block device name under /dev, e.g. `sda` or `disk/by-id/ata-X`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DriveId(String);

impl DriveId {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if !is_safe_drive_id(s) {
            return Err(ItefanError::invalid_config(
                "drive_list",
                format!("'{}' is not a valid drive name", s),
            ));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn device_path(&self) -> PathBuf {
        Path::new("/dev").join(&self.0)
    }
}

impl fmt::Display for DriveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_safe_drive_id(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_DRIVE_ID_LEN || s.contains("..") || s.starts_with('/') {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '-'))
}

/// Graphite endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryEndpoint {
    pub host: String,
    pub port: u16,
}

impl TelemetryEndpoint {
    /// Accepts `host:port`, `a.b.c.d:port` and `[v6]:port`
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |reason: &str| ItefanError::invalid_config("graphite_server", reason);
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("host is empty"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for TelemetryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Resolved configuration, immutable once built
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub drives: Vec<DriveId>,
    pub debug: bool,
    pub setpoint: i32,
    pub pwm_init: u8,
    pub interval: Duration,
    pub overheat: i32,
    pub pwm_min: u8,
    pub pwm_max: u8,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub imax: f64,
    pub cpu_avg: usize,
    pub telemetry: Option<TelemetryEndpoint>,
    pub metric_prefix: String,
    pub port_backend: BackendKind,
    pub missing_reading: MissingReadingPolicy,
    pub smartctl: PathBuf,
    pub sensors: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            drives: Vec::new(),
            debug: false,
            setpoint: DEFAULT_SETPOINT,
            pwm_init: DEFAULT_PWM_INIT,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            overheat: DEFAULT_OVERHEAT,
            pwm_min: DEFAULT_PWM_MIN,
            pwm_max: PWM_MAX,
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
            imax: DEFAULT_IMAX,
            cpu_avg: DEFAULT_CPU_AVG,
            telemetry: None,
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            port_backend: BackendKind::default(),
            missing_reading: MissingReadingPolicy::default(),
            smartctl: PathBuf::from("smartctl"),
            sensors: PathBuf::from("sensors"),
        }
    }
}

fn pwm_value(field: &str, v: i64) -> Result<u8> {
    u8::try_from(v)
        .map_err(|_| ItefanError::invalid_config(field, format!("{} is outside 0..=255", v)))
}

fn at_least_one(field: &str, v: i64) -> Result<u64> {
    if v < 1 {
        return Err(ItefanError::invalid_config(field, "must be at least 1"));
    }
    Ok(v as u64)
}

impl ControllerConfig {
    /// Parse the command line, read the optional file and validate
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };
        Self::from_sources(cli, file)
    }

    pub fn from_sources(cli: &Cli, file: FileConfig) -> Result<Self> {
        let d = Self::default();

        let raw_drives = cli
            .drive_list
            .clone()
            .or(file.drive_list)
            .ok_or_else(|| ItefanError::MissingConfig("--drive_list".to_string()))?;
        let drives = raw_drives
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| DriveId::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let debug = match cli.debug {
            Some(v) => v != 0,
            None => file.debug.unwrap_or(d.debug),
        };

        let pwm_init = match cli.pwminit.or(file.pwminit) {
            Some(v) => pwm_value("pwminit", v)?,
            None => d.pwm_init,
        };
        let pwm_min = match cli.pwmmin.or(file.pwmmin) {
            Some(v) => pwm_value("pwmmin", v)?,
            None => d.pwm_min,
        };
        let interval = match cli.interval.or(file.interval) {
            Some(v) => Duration::from_secs(at_least_one("interval", v)?),
            None => d.interval,
        };
        let cpu_avg = match cli.cpu_avg.or(file.cpu_avg) {
            Some(v) => at_least_one("cpu_avg", v)? as usize,
            None => d.cpu_avg,
        };
        let telemetry = match cli.graphite_server.as_deref().or(file.graphite_server.as_deref()) {
            Some(s) if !s.is_empty() => Some(TelemetryEndpoint::parse(s)?),
            _ => None,
        };

        let cfg = Self {
            drives,
            debug,
            setpoint: cli.setpoint.or(file.setpoint).unwrap_or(d.setpoint),
            pwm_init,
            interval,
            overheat: cli.overheat.or(file.overheat).unwrap_or(d.overheat),
            pwm_min,
            pwm_max: PWM_MAX,
            kp: cli.kp.or(file.kp).unwrap_or(d.kp),
            ki: cli.ki.or(file.ki).unwrap_or(d.ki),
            kd: cli.kd.or(file.kd).unwrap_or(d.kd),
            imax: cli.imax.or(file.imax).unwrap_or(d.imax),
            cpu_avg,
            telemetry,
            metric_prefix: cli
                .graphite_prefix
                .clone()
                .or(file.graphite_prefix)
                .unwrap_or(d.metric_prefix),
            port_backend: cli.port_backend.or(file.port_backend).unwrap_or(d.port_backend),
            missing_reading: cli
                .missing_reading
                .or(file.missing_reading)
                .unwrap_or(d.missing_reading),
            smartctl: cli.smartctl.clone().or(file.smartctl).unwrap_or(d.smartctl),
            sensors: cli.sensors.clone().or(file.sensors).unwrap_or(d.sensors),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.drives.is_empty() {
            return Err(ItefanError::invalid_config("drive_list", "at least one drive is required"));
        }
        if self.interval.is_zero() {
            return Err(ItefanError::invalid_config("interval", "must be at least 1"));
        }
        if self.cpu_avg == 0 {
            return Err(ItefanError::invalid_config("cpu_avg", "must be at least 1"));
        }
        for (field, v) in [("setpoint", self.setpoint), ("overheat", self.overheat)] {
            if !TEMPERATURE_RANGE.contains(&v) {
                return Err(ItefanError::invalid_config(field, "must be between -100 and 200 °C"));
            }
        }
        if self.pwm_min > self.pwm_max {
            return Err(ItefanError::invalid_config("pwmmin", "exceeds the maximum PWM"));
        }
        for (field, v) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd), ("imax", self.imax)] {
            if !v.is_finite() {
                return Err(ItefanError::invalid_config(field, "must be a finite number"));
            }
        }
        if self.imax < 0.0 {
            return Err(ItefanError::invalid_config("imax", "must not be negative"));
        }
        if self.metric_prefix.is_empty() || self.metric_prefix.chars().any(char::is_whitespace) {
            return Err(ItefanError::invalid_config(
                "graphite_prefix",
                "must be non-empty and contain no whitespace",
            ));
        }
        Ok(())
    }
}
