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

//! PID control of the fan duty cycle
//!
//! `output = pwm_init + kp*e + ki*∫e + kd*de/dt`, with the integral clamped to
//! `±imax` and the output clamped to `[pwm_min, pwm_max]`.

use std::time::Duration;

use crate::config::ControllerConfig;

/// Time since the previous sample, guaranteed non-zero
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Elapsed(f64);

impl Elapsed {
    pub fn new(dt: Duration) -> Option<Self> {
        if dt.is_zero() {
            None
        } else {
            Some(Self(dt.as_secs_f64()))
        }
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// One step's output plus its weighted terms for telemetry
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PidOutput {
    pub pwm: u8,
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    imax: f64,
    bias: f64,
    pwm_min: u8,
    pwm_max: u8,
    integral: f64,
    previous_error: f64,
}

impl PidController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            gains: PidGains {
                kp: config.kp,
                ki: config.ki,
                kd: config.kd,
            },
            imax: config.imax.abs(),
            bias: f64::from(config.pwm_init),
            pwm_min: config.pwm_min,
            pwm_max: config.pwm_max,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    pub fn update(&mut self, error: f64, dt: Elapsed) -> PidOutput {
        let dt = dt.as_secs();

        self.integral = (self.integral + error * dt).clamp(-self.imax, self.imax);

        let derivative = (error - self.previous_error) / dt;
        self.previous_error = error;

        let p = self.gains.kp * error;
        let i = self.gains.ki * self.integral;
        let d = self.gains.kd * derivative;

        // max/min rather than clamp so a NaN lands on the floor
        let raw = (self.bias + p + i + d)
            .max(f64::from(self.pwm_min))
            .min(f64::from(self.pwm_max));

        PidOutput {
            pwm: raw.trunc() as u8,
            p,
            i,
            d,
        }
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }
}
