/*
 * Test utilities and fakes for Itefan
 *
 * A simulated ITE Super I/O on the port bus and a scripted temperature
 * probe, shared by the unit tests of the hardware and control modules.
 */

#[cfg(test)]
pub mod test_utils {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;

    use crate::config::DriveId;
    use crate::ec::{SUPERIO_DATA_PORT, SUPERIO_INDEX_PORT};
    use crate::error::{ItefanError, Result};
    use crate::port::PortIo;
    use crate::sensors::{Reading, TemperatureProbe};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PortOp {
        Out(u16, u8),
        In(u16),
    }

    /// Register-level model of an ITE chip. Writes to the index ports select
    /// a register, the data ports read or write it. Every access is logged.
    pub struct FakeChip {
        pub log: Vec<PortOp>,
        pub config_regs: [u8; 256],
        pub ec_regs: [u8; 256],
        ec_base: u16,
        config_index: u8,
        ec_index: u8,
        fail: Rc<Cell<bool>>,
    }

    impl FakeChip {
        /// A chip whose ecbar registers hold `ec_base`
        pub fn new(ec_base: u16) -> Self {
            let mut config_regs = [0u8; 256];
            let [high, low] = ec_base.to_be_bytes();
            config_regs[0x60] = high;
            config_regs[0x61] = low;
            Self {
                log: Vec::new(),
                config_regs,
                ec_regs: [0u8; 256],
                ec_base,
                config_index: 0,
                ec_index: 0,
                fail: Rc::new(Cell::new(false)),
            }
        }

        /// Setting the returned flag makes every later access fail
        pub fn failure_switch(&self) -> Rc<Cell<bool>> {
            Rc::clone(&self.fail)
        }

        fn check(&self, port: u16) -> Result<()> {
            if self.fail.get() {
                return Err(ItefanError::port(
                    port,
                    io::Error::new(io::ErrorKind::Other, "injected failure"),
                ));
            }
            Ok(())
        }
    }

    impl PortIo for FakeChip {
        fn outb(&mut self, port: u16, value: u8) -> Result<()> {
            self.check(port)?;
            self.log.push(PortOp::Out(port, value));
            match port {
                SUPERIO_INDEX_PORT => self.config_index = value,
                SUPERIO_DATA_PORT => self.config_regs[self.config_index as usize] = value,
                p if p == self.ec_base.wrapping_add(5) => self.ec_index = value,
                p if p == self.ec_base.wrapping_add(6) => self.ec_regs[self.ec_index as usize] = value,
                _ => {}
            }
            Ok(())
        }

        fn inb(&mut self, port: u16) -> Result<u8> {
            self.check(port)?;
            self.log.push(PortOp::In(port));
            Ok(match port {
                SUPERIO_DATA_PORT => self.config_regs[self.config_index as usize],
                p if p == self.ec_base.wrapping_add(6) => self.ec_regs[self.ec_index as usize],
                _ => 0xff,
            })
        }
    }

    /// Fixed readings per drive; unknown drives are unavailable
    #[derive(Default)]
    pub struct ScriptedProbe {
        drives: HashMap<String, Reading>,
        cpu: Option<Reading>,
        pub drive_calls: Vec<String>,
        pub cpu_calls: usize,
    }

    impl ScriptedProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn drive(mut self, name: &str, reading: Reading) -> Self {
            self.drives.insert(name.to_string(), reading);
            self
        }

        pub fn cpu(mut self, reading: Reading) -> Self {
            self.cpu = Some(reading);
            self
        }
    }

    impl TemperatureProbe for ScriptedProbe {
        fn drive_temperature(&mut self, drive: &DriveId) -> Reading {
            self.drive_calls.push(drive.to_string());
            self.drives
                .get(drive.as_str())
                .copied()
                .unwrap_or(Reading::Unavailable)
        }

        fn cpu_temperature(&mut self) -> Reading {
            self.cpu_calls += 1;
            self.cpu.unwrap_or(Reading::Unavailable)
        }
    }

    #[test]
    fn test_fake_chip_models_index_data_pairs() {
        let mut chip = FakeChip::new(0x0a30);
        chip.outb(0x2e, 0x61).unwrap();
        assert_eq!(chip.inb(0x2f).unwrap(), 0x30);
        chip.outb(0x0a35, 0x6b).unwrap();
        chip.outb(0x0a36, 99).unwrap();
        assert_eq!(chip.ec_regs[0x6b], 99);
    }

    #[test]
    fn test_scripted_probe_records_calls() {
        let mut probe = ScriptedProbe::new().drive("sda", Reading::Celsius(30));
        let sda = DriveId::parse("sda").unwrap();
        let sdb = DriveId::parse("sdb").unwrap();
        assert_eq!(probe.drive_temperature(&sda), Reading::Celsius(30));
        assert_eq!(probe.drive_temperature(&sdb), Reading::Unavailable);
        assert_eq!(probe.cpu_temperature(), Reading::Unavailable);
        assert_eq!(probe.drive_calls, vec!["sda", "sdb"]);
        assert_eq!(probe.cpu_calls, 1);
    }
}
