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

//! Byte-wide x86 I/O port access
//!
//! Two backends are available:
//! - **raw**: `iopl(3)` followed by `in`/`out` instructions (x86_64 Linux only)
//! - **devport**: seek/read/write on the `/dev/port` character device
//!
//! Both need root. The [`PortIo`] trait is the seam the register bridge is
//! written against, which also lets tests substitute a fake bus.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ItefanError, Result};

/// Byte-wide port input/output
#[cfg_attr(test, mockall::automock)]
pub trait PortIo {
    fn outb(&mut self, port: u16, value: u8) -> Result<()>;
    fn inb(&mut self, port: u16) -> Result<u8>;
}

impl<P: PortIo + ?Sized> PortIo for &mut P {
    fn outb(&mut self, port: u16, value: u8) -> Result<()> {
        (**self).outb(port, value)
    }

    fn inb(&mut self, port: u16) -> Result<u8> {
        (**self).inb(port)
    }
}

/// Which port access mechanism to use
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Raw,
    Devport,
}

impl Default for BackendKind {
    fn default() -> Self {
        if RAW_SUPPORTED {
            BackendKind::Raw
        } else {
            BackendKind::Devport
        }
    }
}

const RAW_SUPPORTED: bool = cfg!(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"));

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
mod raw {
    use std::arch::asm;
    use std::io;

    use super::PortIo;
    use crate::error::{ItefanError, Result};

    /// Direct port access through the `in`/`out` instructions.
    ///
    /// Only constructible through [`RawPorts::acquire`], so holding one means
    /// the process already runs at I/O privilege level 3.
    #[derive(Debug)]
    pub struct RawPorts {
        _privileged: (),
    }

    impl RawPorts {
        pub fn acquire() -> Result<Self> {
            // SAFETY: iopl only raises the I/O privilege level of the calling process.
            let rc = unsafe { libc::iopl(3) };
            if rc != 0 {
                return Err(ItefanError::PermissionDenied(format!(
                    "iopl(3) failed: {}",
                    io::Error::last_os_error()
                )));
            }
            Ok(Self { _privileged: () })
        }
    }

    impl PortIo for RawPorts {
        fn outb(&mut self, port: u16, value: u8) -> Result<()> {
            // SAFETY: iopl(3) succeeded in acquire(), so port instructions are permitted.
            unsafe {
                asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
            }
            Ok(())
        }

        fn inb(&mut self, port: u16) -> Result<u8> {
            let value: u8;
            // SAFETY: see outb.
            unsafe {
                asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
            Ok(value)
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
pub use raw::RawPorts;

/// Port access through a seekable device file, normally `/dev/port`.
///
/// The file offset is the port number.
#[derive(Debug)]
pub struct DevPort {
    path: PathBuf,
    file: File,
}

impl DevPort {
    pub const PATH: &'static str = "/dev/port";

    pub fn open() -> Result<Self> {
        Self::open_path(Path::new(Self::PATH))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => ItefanError::PermissionDenied(format!(
                    "cannot open {} for read/write",
                    path.display()
                )),
                _ => ItefanError::FileRead {
                    path: path.to_path_buf(),
                    source: e,
                },
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PortIo for DevPort {
    fn outb(&mut self, port: u16, value: u8) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(port as u64))
            .and_then(|_| self.file.write_all(&[value]))
            .map_err(|e| ItefanError::port(port, e))
    }

    fn inb(&mut self, port: u16) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.file
            .seek(SeekFrom::Start(port as u64))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| ItefanError::port(port, e))?;
        Ok(buf[0])
    }
}

/// The backend selected at startup
#[derive(Debug)]
pub enum PortBackend {
    #[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
    Raw(RawPorts),
    DevPort(DevPort),
}

impl PortBackend {
    /// Acquire port access. Fails if the process lacks the privilege.
    pub fn open(kind: BackendKind) -> Result<Self> {
        match kind {
            #[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
            BackendKind::Raw => Ok(PortBackend::Raw(RawPorts::acquire()?)),
            #[cfg(not(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu")))]
            BackendKind::Raw => Err(ItefanError::UnsupportedBackend(
                "raw port instructions need x86_64 Linux; use --port_backend=devport".to_string(),
            )),
            BackendKind::Devport => Ok(PortBackend::DevPort(DevPort::open()?)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            #[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
            PortBackend::Raw(_) => "raw (iopl)".to_string(),
            PortBackend::DevPort(d) => format!("devport ({})", d.path().display()),
        }
    }
}

impl PortIo for PortBackend {
    fn outb(&mut self, port: u16, value: u8) -> Result<()> {
        match self {
            #[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
            PortBackend::Raw(p) => p.outb(port, value),
            PortBackend::DevPort(p) => p.outb(port, value),
        }
    }

    fn inb(&mut self, port: u16) -> Result<u8> {
        match self {
            #[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
            PortBackend::Raw(p) => p.inb(port),
            PortBackend::DevPort(p) => p.inb(port),
        }
    }
}
