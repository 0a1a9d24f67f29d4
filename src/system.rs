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

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::{ItefanError, Result};

const DMI_DIR: &str = "/sys/devices/virtual/dmi/id";
const PROC_MODULES: &str = "/proc/modules";

/// Port I/O needs root
pub fn verify_privileges() -> Result<()> {
    // SAFETY: geteuid and getuid only return the process's user IDs.
    let euid = unsafe { libc::geteuid() };
    let uid = unsafe { libc::getuid() };

    if euid != 0 {
        return Err(ItefanError::PermissionDenied(format!(
            "must run as root for port I/O (euid={})",
            euid
        )));
    }
    if uid != 0 {
        warn!("Running as setuid root - this is not recommended");
    }
    info!("STARTUP: Running as root (uid={}, euid={})", uid, euid);
    Ok(())
}

/// "vendor name" of the mainboard from DMI, empty if unknown
pub fn read_board_name() -> String {
    read_board_name_from(Path::new(DMI_DIR))
}

pub fn read_board_name_from(dmi_dir: &Path) -> String {
    let read_trim = |name: &str| -> Option<String> {
        fs::read_to_string(dmi_dir.join(name))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    match (read_trim("board_vendor"), read_trim("board_name")) {
        (Some(v), Some(n)) => format!("{} {}", v, n),
        (Some(v), None) => v,
        (None, Some(n)) => n,
        (None, None) => read_trim("product_name").unwrap_or_default(),
    }
}

/// Whether `module` appears in /proc/modules
pub fn kernel_module_loaded(module: &str) -> bool {
    fs::read_to_string(PROC_MODULES)
        .map(|s| modules_list_contains(&s, module))
        .unwrap_or(false)
}

fn modules_list_contains(list: &str, module: &str) -> bool {
    list.lines()
        .filter_map(|l| l.split_whitespace().next())
        .any(|name| name == module)
}

/// Seconds since the Unix epoch, 0 if the clock is before it
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
