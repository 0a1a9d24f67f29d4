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

//! Itefan - PID fan control for ITE Super I/O environment controllers
//!
//! Reads drive temperatures through smartctl and the CPU package temperature
//! through lm-sensors, runs a PID loop on the hotter of the two, and writes
//! the duty cycle straight into the EC's PWM registers over port I/O.

pub mod config;
pub mod ec;
pub mod error;
pub mod logger;
pub mod pid;
pub mod port;
pub mod sensors;
pub mod service;
pub mod system;
pub mod telemetry;
pub mod temperature;

#[cfg(test)]
pub mod test_utils;
