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

//! ITE Super I/O configuration and environment controller (EC) registers
//!
//! Bring-up order:
//! 1. [`SuperIo::enter_config_mode`] writes the unlock sequence to the index port
//! 2. [`SuperIo::open_environment_controller`] selects LDN 4, activates it and
//!    reads the EC base address
//! 3. [`EnvironmentController`] then talks to EC registers through
//!    `base + 5` (index) and `base + 6` (data)
//!
//! An `EnvironmentController` can only come out of an unlocked `SuperIo`, so
//! EC access before the unlock cannot be expressed.

use std::fmt;

use tracing::debug;

use crate::error::{ItefanError, Result};
use crate::port::PortIo;

/// Super I/O index port; the data port follows it
pub const SUPERIO_INDEX_PORT: u16 = 0x2e;
pub const SUPERIO_DATA_PORT: u16 = SUPERIO_INDEX_PORT + 1;

/// Magic bytes that switch ITE chips into configuration mode
pub const UNLOCK_SEQUENCE: [u8; 4] = [0x87, 0x01, 0x55, 0x55];

/// Global and per-LDN configuration registers
pub mod config_reg {
    pub const LOGICAL_DEVICE: u8 = 0x07;
    pub const CHIP_ID_HIGH: u8 = 0x20;
    pub const CHIP_ID_LOW: u8 = 0x21;
    pub const ACTIVATE: u8 = 0x30;
    pub const BASE_HIGH: u8 = 0x60;
    pub const BASE_LOW: u8 = 0x61;
}

/// Logical device number of the environment controller
pub const ENVIRONMENT_CONTROLLER_LDN: u8 = 0x04;

const EC_INDEX_OFFSET: u16 = 5;
const EC_DATA_OFFSET: u16 = 6;

/// EC registers for the two fan channels driven by this controller
pub mod ec_reg {
    /// Fan control mode; 0x00 selects software (manual) operation
    pub const FAN_CONTROL: [u8; 2] = [0x16, 0x17];
    /// PWM duty output
    pub const PWM_OUTPUT: [u8; 2] = [0x6b, 0x73];
}

const SOFTWARE_MODE: u8 = 0x00;

/// Chip identifier from registers 0x20/0x21
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChipId(pub u16);

impl ChipId {
    pub fn name(&self) -> Option<&'static str> {
        match self.0 {
            0x8613 => Some("IT8613E"),
            0x8772 => Some("IT8772E"),
            _ => None,
        }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:04x})", name, self.0),
            None => write!(f, "unknown (0x{:04x})", self.0),
        }
    }
}

/// A Super I/O chip that has been put into configuration mode
pub struct SuperIo<P: PortIo> {
    io: P,
}

impl<P: PortIo> SuperIo<P> {
    /// Write the unlock sequence. Takes ownership of the port handle, so this
    /// runs exactly once per handle.
    pub fn enter_config_mode(mut io: P) -> Result<Self> {
        for byte in UNLOCK_SEQUENCE {
            io.outb(SUPERIO_INDEX_PORT, byte)?;
        }
        Ok(Self { io })
    }

    fn write_register(&mut self, index: u8, value: u8) -> Result<()> {
        self.io.outb(SUPERIO_INDEX_PORT, index)?;
        self.io.outb(SUPERIO_DATA_PORT, value)
    }

    fn read_register(&mut self, index: u8) -> Result<u8> {
        self.io.outb(SUPERIO_INDEX_PORT, index)?;
        self.io.inb(SUPERIO_DATA_PORT)
    }

    pub fn read_chip_id(&mut self) -> Result<ChipId> {
        let high = self.read_register(config_reg::CHIP_ID_HIGH)?;
        let low = self.read_register(config_reg::CHIP_ID_LOW)?;
        Ok(ChipId(u16::from_be_bytes([high, low])))
    }

    pub fn select_logical_device(&mut self, ldn: u8) -> Result<()> {
        self.write_register(config_reg::LOGICAL_DEVICE, ldn)
    }

    /// Activate the currently selected logical device
    pub fn activate_logical_device(&mut self) -> Result<()> {
        self.write_register(config_reg::ACTIVATE, 0x01)
    }

    /// Read the base I/O address of the selected logical device
    pub fn discover_ec_base(&mut self) -> Result<u16> {
        let high = self.read_register(config_reg::BASE_HIGH)?;
        let low = self.read_register(config_reg::BASE_LOW)?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Select and activate the environment controller and bind to its base
    /// address for the rest of the process lifetime.
    pub fn open_environment_controller(mut self) -> Result<EnvironmentController<P>> {
        self.select_logical_device(ENVIRONMENT_CONTROLLER_LDN)?;
        self.activate_logical_device()?;
        let base = self.discover_ec_base()?;
        // An unprogrammed base would aim EC writes at legacy DMA ports.
        if base == 0x0000 || base == 0xffff {
            return Err(ItefanError::EcNotFound { base });
        }
        debug!("EC base address 0x{:04x}", base);
        Ok(EnvironmentController { io: self.io, base })
    }
}

/// Indexed access to EC registers relative to the discovered base
pub struct EnvironmentController<P: PortIo> {
    io: P,
    base: u16,
}

impl<P: PortIo> EnvironmentController<P> {
    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn read_ec(&mut self, reg: u8) -> Result<u8> {
        self.io.outb(self.base.wrapping_add(EC_INDEX_OFFSET), reg)?;
        self.io.inb(self.base.wrapping_add(EC_DATA_OFFSET))
    }

    pub fn write_ec(&mut self, reg: u8, value: u8) -> Result<()> {
        self.io.outb(self.base.wrapping_add(EC_INDEX_OFFSET), reg)?;
        self.io.outb(self.base.wrapping_add(EC_DATA_OFFSET), value)
    }

    /// Put both fan channels under software control
    pub fn set_software_mode(&mut self) -> Result<()> {
        for reg in ec_reg::FAN_CONTROL {
            self.write_ec(reg, SOFTWARE_MODE)?;
        }
        Ok(())
    }

    /// Write the same duty value to both PWM outputs
    pub fn write_pwm(&mut self, value: u8) -> Result<()> {
        for reg in ec_reg::PWM_OUTPUT {
            self.write_ec(reg, value)?;
        }
        Ok(())
    }

    /// Current (mode, pwm) pair of each channel, as left by firmware
    pub fn read_channel_state(&mut self) -> Result<[(u8, u8); 2]> {
        let mut out = [(0u8, 0u8); 2];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (
                self.read_ec(ec_reg::FAN_CONTROL[i])?,
                self.read_ec(ec_reg::PWM_OUTPUT[i])?,
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockPortIo;
    use crate::test_utils::test_utils::{FakeChip, PortOp};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn expect_out(mock: &mut MockPortIo, seq: &mut Sequence, port: u16, value: u8) {
        mock.expect_outb()
            .with(eq(port), eq(value))
            .times(1)
            .in_sequence(seq)
            .returning(|_, _| Ok(()));
    }

    fn expect_in(mock: &mut MockPortIo, seq: &mut Sequence, port: u16, value: u8) {
        mock.expect_inb()
            .with(eq(port))
            .times(1)
            .in_sequence(seq)
            .returning(move |_| Ok(value));
    }

    #[test]
    fn test_unlock_and_ec_discovery_sequence() {
        let mut mock = MockPortIo::new();
        let mut seq = Sequence::new();

        for byte in [0x87, 0x01, 0x55, 0x55] {
            expect_out(&mut mock, &mut seq, 0x2e, byte);
        }
        // LDN = 4
        expect_out(&mut mock, &mut seq, 0x2e, 0x07);
        expect_out(&mut mock, &mut seq, 0x2f, 0x04);
        // activate
        expect_out(&mut mock, &mut seq, 0x2e, 0x30);
        expect_out(&mut mock, &mut seq, 0x2f, 0x01);
        // ecbar
        expect_out(&mut mock, &mut seq, 0x2e, 0x60);
        expect_in(&mut mock, &mut seq, 0x2f, 0x0a);
        expect_out(&mut mock, &mut seq, 0x2e, 0x61);
        expect_in(&mut mock, &mut seq, 0x2f, 0x30);

        let sio = SuperIo::enter_config_mode(&mut mock).unwrap();
        let ec = sio.open_environment_controller().unwrap();
        assert_eq!(ec.base(), 0x0a30);
    }

    #[test]
    fn test_pwm_write_hits_both_outputs() {
        let mut mock = MockPortIo::new();
        let mut seq = Sequence::new();
        for byte in UNLOCK_SEQUENCE {
            expect_out(&mut mock, &mut seq, 0x2e, byte);
        }
        expect_out(&mut mock, &mut seq, 0x2e, 0x07);
        expect_out(&mut mock, &mut seq, 0x2f, 0x04);
        expect_out(&mut mock, &mut seq, 0x2e, 0x30);
        expect_out(&mut mock, &mut seq, 0x2f, 0x01);
        expect_out(&mut mock, &mut seq, 0x2e, 0x60);
        expect_in(&mut mock, &mut seq, 0x2f, 0x02);
        expect_out(&mut mock, &mut seq, 0x2e, 0x61);
        expect_in(&mut mock, &mut seq, 0x2f, 0x90);

        expect_out(&mut mock, &mut seq, 0x295, 0x6b);
        expect_out(&mut mock, &mut seq, 0x296, 200);
        expect_out(&mut mock, &mut seq, 0x295, 0x73);
        expect_out(&mut mock, &mut seq, 0x296, 200);

        let mut ec = SuperIo::enter_config_mode(&mut mock)
            .unwrap()
            .open_environment_controller()
            .unwrap();
        ec.write_pwm(200).unwrap();
    }

    #[test]
    fn test_software_mode_registers() {
        let mut chip = FakeChip::new(0x0290);
        let mut ec = SuperIo::enter_config_mode(&mut chip)
            .unwrap()
            .open_environment_controller()
            .unwrap();
        ec.set_software_mode().unwrap();
        drop(ec);

        assert_eq!(chip.ec_regs[0x16], 0x00);
        assert_eq!(chip.ec_regs[0x17], 0x00);
        let tail: Vec<PortOp> = chip.log.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(
            tail,
            vec![
                PortOp::Out(0x295, 0x16),
                PortOp::Out(0x296, 0x00),
                PortOp::Out(0x295, 0x17),
                PortOp::Out(0x296, 0x00),
            ]
        );
    }

    #[test]
    fn test_read_ec_goes_through_index_port() {
        let mut chip = FakeChip::new(0x0a30);
        chip.ec_regs[0x6b] = 0x42;
        let mut ec = SuperIo::enter_config_mode(&mut chip)
            .unwrap()
            .open_environment_controller()
            .unwrap();
        assert_eq!(ec.read_ec(0x6b).unwrap(), 0x42);
    }

    #[test]
    fn test_read_channel_state() {
        let mut chip = FakeChip::new(0x0a30);
        chip.ec_regs[0x16] = 0x80;
        chip.ec_regs[0x17] = 0x81;
        chip.ec_regs[0x6b] = 10;
        chip.ec_regs[0x73] = 20;
        let mut ec = SuperIo::enter_config_mode(&mut chip)
            .unwrap()
            .open_environment_controller()
            .unwrap();
        assert_eq!(ec.read_channel_state().unwrap(), [(0x80, 10), (0x81, 20)]);
    }

    #[test]
    fn test_chip_id() {
        let mut chip = FakeChip::new(0x0a30);
        chip.config_regs[0x20] = 0x86;
        chip.config_regs[0x21] = 0x13;
        let mut sio = SuperIo::enter_config_mode(&mut chip).unwrap();
        let id = sio.read_chip_id().unwrap();
        assert_eq!(id, ChipId(0x8613));
        assert_eq!(id.name(), Some("IT8613E"));
        assert_eq!(id.to_string(), "IT8613E (0x8613)");
    }

    #[test]
    fn test_unknown_chip_id_display() {
        assert_eq!(ChipId(0x8728).name(), None);
        assert_eq!(ChipId(0x8728).to_string(), "unknown (0x8728)");
        assert_eq!(ChipId(0x8772).name(), Some("IT8772E"));
    }

    #[test]
    fn test_unprogrammed_base_is_rejected() {
        for base in [0x0000u16, 0xffff] {
            let mut chip = FakeChip::new(base);
            let result = SuperIo::enter_config_mode(&mut chip)
                .unwrap()
                .open_environment_controller();
            match result {
                Err(ItefanError::EcNotFound { base: b }) => assert_eq!(b, base),
                Err(e) => panic!("unexpected error {e}"),
                Ok(_) => panic!("base 0x{base:04x} should be rejected"),
            }
        }
    }

    #[test]
    fn test_port_error_propagates() {
        let mut mock = MockPortIo::new();
        mock.expect_outb().returning(|port, _| {
            Err(ItefanError::port(port, std::io::Error::new(std::io::ErrorKind::Other, "denied")))
        });
        assert!(SuperIo::enter_config_mode(&mut mock).is_err());
    }
}
