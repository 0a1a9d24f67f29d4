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

//! Hardware takeover and the fixed-interval control loop
//!
//! Each iteration: probe drives and CPU, aggregate, run the PID on
//! `effective - setpoint`, write the result to both PWM outputs, and stream
//! the intermediate values to telemetry. A zero time delta skips the PID and
//! the hardware write.

use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ControllerConfig, DriveId};
use crate::ec::{EnvironmentController, SuperIo};
use crate::error::Result;
use crate::pid::{Elapsed, PidController, PidOutput};
use crate::port::PortIo;
use crate::sensors::{Reading, TemperatureProbe};
use crate::system::unix_timestamp;
use crate::telemetry::{Sample, TelemetrySink};
use crate::temperature::{AggregateReading, TemperatureAggregator};

/// Error log throttling: first error, then every Nth in a row
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Unlock the Super I/O, bind to its environment controller, write the
/// initial duty and switch both channels to software control.
pub fn take_control<P: PortIo>(io: P, pwm_init: u8) -> Result<EnvironmentController<P>> {
    let mut sio = SuperIo::enter_config_mode(io)?;

    let chip = sio.read_chip_id()?;
    if chip.name().is_some() {
        info!("STARTUP: Super I/O chip {}", chip);
    } else {
        warn!("Super I/O chip {} is not a known ITE part; continuing anyway", chip);
    }

    let mut ec = sio.open_environment_controller()?;
    info!("STARTUP: Environment controller at 0x{:04x}", ec.base());

    match ec.read_channel_state() {
        Ok(channels) => {
            for (i, (mode, pwm)) in channels.iter().enumerate() {
                debug!("Channel {} before takeover: mode=0x{:02x} pwm={}", i, mode, pwm);
            }
        }
        Err(e) => debug!("Could not read channel state: {}", e),
    }

    ec.write_pwm(pwm_init)?;
    ec.set_software_mode()?;
    info!("STARTUP: Fans under software control, initial PWM {}", pwm_init);
    Ok(ec)
}

/// Everything one applied iteration produced
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub readings: Vec<(DriveId, Reading)>,
    pub cpu: Reading,
    pub aggregate: AggregateReading,
    pub dt: Duration,
    pub error: f64,
    pub output: PidOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// No time passed since the previous sample; nothing was changed
    Skipped,
    Applied(IterationReport),
}

pub struct ControlLoop<'a, P: PortIo, T: TemperatureProbe, W: Write = TcpStream> {
    config: &'a ControllerConfig,
    aggregator: TemperatureAggregator,
    pid: PidController,
    ec: EnvironmentController<P>,
    probe: T,
    telemetry: TelemetrySink<W>,
    last_time: Instant,
    previous_pwm: u8,
    overheated: bool,
    consecutive_errors: u32,
}

impl<'a, P: PortIo, T: TemperatureProbe, W: Write> ControlLoop<'a, P, T, W> {
    /// `started` is the reference point for the first time delta
    pub fn new(
        config: &'a ControllerConfig,
        ec: EnvironmentController<P>,
        probe: T,
        telemetry: TelemetrySink<W>,
        started: Instant,
    ) -> Self {
        Self {
            config,
            aggregator: TemperatureAggregator::new(config),
            pid: PidController::new(config),
            ec,
            probe,
            telemetry,
            last_time: started,
            previous_pwm: config.pwm_init,
            overheated: false,
            consecutive_errors: 0,
        }
    }

    fn emit(&mut self, metric: &str, value: impl Into<Sample>) {
        self.telemetry.emit(metric, value, unix_timestamp());
    }

    /// Run one iteration at time `now`
    pub fn step(&mut self, now: Instant) -> Result<StepOutcome> {
        let config = self.config;

        let readings: Vec<(DriveId, Reading)> = config
            .drives
            .iter()
            .map(|d| (d.clone(), self.probe.drive_temperature(d)))
            .collect();
        let cpu = self.probe.cpu_temperature();
        let aggregate = self.aggregator.aggregate(&readings, cpu);

        for (drive, reading) in &readings {
            debug!("Drive {}: {:?}", drive, reading);
            if let Some(t) = self.aggregator.resolve(*reading) {
                self.emit(drive.as_str(), t);
            }
        }
        debug!(
            "CPU {:?}, average {:?}, effective {}",
            cpu, aggregate.cpu_average, aggregate.effective
        );
        self.emit("maxtemp", aggregate.effective);

        let dt = now.saturating_duration_since(self.last_time);
        let Some(elapsed) = Elapsed::new(dt) else {
            debug!("No time elapsed since last sample, skipping PID update");
            return Ok(StepOutcome::Skipped);
        };
        self.last_time = now;

        let error = f64::from(aggregate.effective) - f64::from(config.setpoint);
        let output = self.pid.update(error, elapsed);
        self.emit("p", output.p);
        self.emit("i", output.i);
        self.emit("d", output.d);

        self.check_overheat(aggregate.effective);

        self.ec.write_pwm(output.pwm)?;
        if output.pwm != self.previous_pwm {
            debug!("PWM {} -> {}", self.previous_pwm, output.pwm);
        }
        self.previous_pwm = output.pwm;

        self.emit("pwm", output.pwm);
        if let Some(avg) = aggregate.cpu_average {
            self.emit("cpu_avg_temp", avg);
        }

        debug!(
            "error={:.1} dt={:.1}s p={:.2} i={:.2} d={:.2} integral={:.2} pwm={}",
            error,
            elapsed.as_secs(),
            output.p,
            output.i,
            output.d,
            self.pid.integral(),
            output.pwm
        );

        Ok(StepOutcome::Applied(IterationReport {
            readings,
            cpu,
            aggregate,
            dt,
            error,
            output,
        }))
    }

    fn check_overheat(&mut self, effective: i32) {
        let hot = effective >= self.config.overheat;
        if hot && !self.overheated {
            warn!(
                "Temperature {}°C reached overheat threshold {}°C",
                effective, self.config.overheat
            );
        } else if !hot && self.overheated {
            info!("Temperature back below overheat threshold ({}°C)", effective);
        }
        self.overheated = hot;
    }

    /// Record the result of one iteration; returns whether it was logged
    fn record(&mut self, result: &Result<StepOutcome>) -> bool {
        match result {
            Ok(_) => {
                if self.consecutive_errors > 0 {
                    info!("Control loop recovered after {} errors", self.consecutive_errors);
                    self.consecutive_errors = 0;
                }
                false
            }
            Err(e) => {
                self.consecutive_errors += 1;
                let n = self.consecutive_errors;
                if n == 1 || n % MAX_CONSECUTIVE_ERRORS == 0 {
                    error!("Control loop error (count: {}): {}", n, e);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn telemetry(&self) -> &TelemetrySink<W> {
        &self.telemetry
    }

    pub fn into_telemetry(self) -> TelemetrySink<W> {
        self.telemetry
    }

    /// Loop forever, sleeping `interval` between iterations
    pub fn run(mut self) -> ! {
        info!(
            "STARTUP: Control loop running (setpoint {}°C, interval {}s, {} drive(s))",
            self.config.setpoint,
            self.config.interval.as_secs(),
            self.config.drives.len()
        );
        loop {
            let result = self.step(Instant::now());
            self.record(&result);
            thread::sleep(self.config.interval);
        }
    }
}
