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

use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};

use itefan::config::{Cli, ControllerConfig};
use itefan::logger;
use itefan::port::PortBackend;
use itefan::sensors::CommandProbe;
use itefan::service::{take_control, ControlLoop};
use itefan::system;
use itefan::telemetry::TelemetrySink;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ControllerConfig::load(&cli).context("Invalid configuration")?;

    logger::init_logging(config.debug);
    info!("STARTUP: itefan {} starting", VERSION);
    let board = system::read_board_name();
    if !board.is_empty() {
        info!("STARTUP: Board: {}", board);
    }
    debug!("Configuration: {:?}", config);

    system::verify_privileges()?;
    if system::kernel_module_loaded("it87") {
        warn!("The it87 driver is loaded and may also write the PWM registers");
    }

    let ports = PortBackend::open(config.port_backend)
        .context("Failed to acquire port I/O access")?;
    info!("STARTUP: Port backend {}", ports.describe());

    let ec = take_control(ports, config.pwm_init)
        .context("Failed to take control of the environment controller")?;

    let telemetry = TelemetrySink::connect(config.telemetry.as_ref(), &config.metric_prefix);
    let probe = CommandProbe::from_config(&config);
    info!(
        "STARTUP: Monitoring {}",
        config
            .drives
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    ControlLoop::new(&config, ec, probe, telemetry, Instant::now()).run()
}
