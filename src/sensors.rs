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

//! Temperature probes backed by `smartctl` and lm-sensors
//!
//! Both tools are spawned directly with an argument vector; no shell is
//! involved, so drive names never reach a command interpreter.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::{ControllerConfig, DriveId};

/// A probe result
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reading {
    Celsius(i32),
    Unavailable,
}

impl Reading {
    pub fn celsius(&self) -> Option<i32> {
        match self {
            Reading::Celsius(t) => Some(*t),
            Reading::Unavailable => None,
        }
    }
}

impl From<Option<i32>> for Reading {
    fn from(v: Option<i32>) -> Self {
        v.map_or(Reading::Unavailable, Reading::Celsius)
    }
}

/// Source of drive and CPU temperatures. Calls may block.
pub trait TemperatureProbe {
    fn drive_temperature(&mut self, drive: &DriveId) -> Reading;
    fn cpu_temperature(&mut self) -> Reading;
}

impl<T: TemperatureProbe + ?Sized> TemperatureProbe for &mut T {
    fn drive_temperature(&mut self, drive: &DriveId) -> Reading {
        (**self).drive_temperature(drive)
    }

    fn cpu_temperature(&mut self) -> Reading {
        (**self).cpu_temperature()
    }
}

/// Attribute name in `smartctl -A` output
const SMART_TEMPERATURE_ATTR: &str = "Temperature_Celsius";
/// Column holding the raw attribute value
const SMART_RAW_VALUE_FIELD: usize = 9;
const PACKAGE_LABEL: &str = "package id";

/// First `Temperature_Celsius` row, raw value column
pub fn parse_smartctl_temperature(output: &str) -> Option<i32> {
    let line = output.lines().find(|l| l.contains(SMART_TEMPERATURE_ATTR))?;
    line.split_whitespace()
        .nth(SMART_RAW_VALUE_FIELD)?
        .parse()
        .ok()
}

/// Integer part of the first `Package id` line, e.g. `+45.0°C` gives 45
pub fn parse_sensors_package_temperature(output: &str) -> Option<i32> {
    let line = output
        .lines()
        .find(|l| l.to_ascii_lowercase().contains(PACKAGE_LABEL))?;
    line.split(|c| matches!(c, '+' | '.' | '°'))
        .nth(1)?
        .trim()
        .parse()
        .ok()
}

/// Runs the external tools once per request
#[derive(Debug, Clone)]
pub struct CommandProbe {
    smartctl: PathBuf,
    sensors: PathBuf,
}

impl CommandProbe {
    pub fn new(smartctl: impl Into<PathBuf>, sensors: impl Into<PathBuf>) -> Self {
        Self {
            smartctl: smartctl.into(),
            sensors: sensors.into(),
        }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.smartctl.clone(), config.sensors.clone())
    }

    // smartctl encodes warnings in its exit status, so stdout is parsed
    // whatever the status is.
    fn capture(cmd: &mut Command) -> Option<String> {
        match cmd.stdin(Stdio::null()).stderr(Stdio::null()).output() {
            Ok(out) => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Err(e) => {
                debug!("Failed to run {:?}: {}", cmd.get_program(), e);
                None
            }
        }
    }
}

impl TemperatureProbe for CommandProbe {
    fn drive_temperature(&mut self, drive: &DriveId) -> Reading {
        let mut cmd = Command::new(&self.smartctl);
        cmd.args(["-A", "-d", "sat"]).arg(drive.device_path());
        let reading: Reading = Self::capture(&mut cmd)
            .and_then(|out| parse_smartctl_temperature(&out))
            .into();
        if reading == Reading::Unavailable {
            debug!("No temperature for drive {}", drive);
        }
        reading
    }

    fn cpu_temperature(&mut self) -> Reading {
        let reading: Reading = Self::capture(&mut Command::new(&self.sensors))
            .and_then(|out| parse_sensors_package_temperature(&out))
            .into();
        if reading == Reading::Unavailable {
            debug!("No CPU package temperature");
        }
        reading
    }
}
