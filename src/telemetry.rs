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

//! Graphite plaintext metrics
//!
//! One line per sample, `<prefix>.<metric> <value> <unix-seconds>\n`, over a
//! TCP connection opened once at startup. Sending is best effort: a write
//! that fails or times out closes the connection for the rest of the run.

use std::fmt;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::TelemetryEndpoint;
use crate::error::{ItefanError, Result};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on one blocked write, kept below the shortest loop interval
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// A metric value. Floats render like C's `%f`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Sample {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sample::Int(v) => write!(f, "{}", v),
            Sample::Float(v) => write!(f, "{:.6}", v),
        }
    }
}

impl From<i32> for Sample {
    fn from(v: i32) -> Self {
        Sample::Int(i64::from(v))
    }
}

impl From<u8> for Sample {
    fn from(v: u8) -> Self {
        Sample::Int(i64::from(v))
    }
}

impl From<f64> for Sample {
    fn from(v: f64) -> Self {
        Sample::Float(v)
    }
}

pub fn format_line(prefix: &str, metric: &str, value: Sample, timestamp: u64) -> String {
    format!("{}.{} {} {}\n", prefix, metric, value, timestamp)
}

/// Open a TCP connection to the first address of `endpoint` that accepts
pub fn connect(endpoint: &TelemetryEndpoint) -> Result<TcpStream> {
    let fail = |reason: String| ItefanError::TelemetryConnect {
        endpoint: endpoint.to_string(),
        reason,
    };
    let addrs = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| fail(format!("resolve failed: {}", e)))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream
                    .set_write_timeout(Some(WRITE_TIMEOUT))
                    .map_err(|e| fail(format!("cannot set write timeout: {}", e)))?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Telemetry TCP_NODELAY not set: {}", e);
                }
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(fail(match last_err {
        Some(e) => e.to_string(),
        None => "no addresses".to_string(),
    }))
}

/// Fire-and-forget metric writer. A sink without a connection drops
/// everything silently. The first failed write disables the sink, since a
/// partial line has already broken the stream framing.
pub struct TelemetrySink<W: Write = TcpStream> {
    conn: Option<W>,
    prefix: String,
    dropped: u64,
}

impl TelemetrySink<TcpStream> {
    /// Connect to `endpoint`, or return a disabled sink if there is none or
    /// it cannot be reached.
    pub fn connect(endpoint: Option<&TelemetryEndpoint>, prefix: &str) -> Self {
        let Some(endpoint) = endpoint else {
            info!("STARTUP: Telemetry disabled (no --graphite_server)");
            return Self::disabled(prefix);
        };
        match connect(endpoint) {
            Ok(stream) => {
                info!("STARTUP: Telemetry connected to {}", endpoint);
                Self::with_writer(stream, prefix)
            }
            Err(e) => {
                warn!("{}; continuing without telemetry", e);
                Self::disabled(prefix)
            }
        }
    }
}

impl<W: Write> TelemetrySink<W> {
    pub fn disabled(prefix: &str) -> Self {
        Self {
            conn: None,
            prefix: prefix.to_string(),
            dropped: 0,
        }
    }

    pub fn with_writer(writer: W, prefix: &str) -> Self {
        Self {
            conn: Some(writer),
            prefix: prefix.to_string(),
            dropped: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Writes that failed before the sink shut itself off
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn emit(&mut self, metric: &str, value: impl Into<Sample>, timestamp: u64) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let line = format_line(&self.prefix, metric, value.into(), timestamp);
        if let Err(e) = conn.write_all(line.as_bytes()) {
            self.dropped += 1;
            self.conn = None;
            warn!("Telemetry write failed, disabling telemetry: {}", e);
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, BufRead, BufReader};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sample_formatting() {
        assert_eq!(Sample::Int(42).to_string(), "42");
        assert_eq!(Sample::Int(-3).to_string(), "-3");
        assert_eq!(Sample::Float(150.0).to_string(), "150.000000");
        assert_eq!(Sample::Float(-0.5).to_string(), "-0.500000");
    }

    #[test]
    fn test_line_format() {
        assert_eq!(
            format_line("fancontrol", "sda", Sample::Int(38), 1700000000),
            "fancontrol.sda 38 1700000000\n"
        );
        assert_eq!(
            format_line("fancontrol", "p", Sample::Float(150.0), 1700000000),
            "fancontrol.p 150.000000 1700000000\n"
        );
    }

    #[test]
    fn test_emit_writes_lines() {
        let mut sink = TelemetrySink::with_writer(Vec::new(), "nas");
        sink.emit("maxtemp", 40, 10);
        sink.emit("i", 15.0, 10);
        sink.emit("pwm", 255u8, 11);
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out, "nas.maxtemp 40 10\nnas.i 15.000000 10\nnas.pwm 255 11\n");
    }

    #[test]
    fn test_disabled_sink_is_noop() {
        let mut sink: TelemetrySink<Vec<u8>> = TelemetrySink::disabled("fancontrol");
        assert!(!sink.is_enabled());
        sink.emit("pwm", 100u8, 1);
        assert_eq!(sink.dropped(), 0);
        assert!(sink.into_inner().is_none());
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let mut sink = TelemetrySink::with_writer(BrokenPipe, "fancontrol");
        sink.emit("pwm", 100u8, 1);
        assert_eq!(sink.dropped(), 1);
        assert!(!sink.is_enabled());
        sink.emit("pwm", 101u8, 2);
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_stalled_collector_does_not_block_emit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = TelemetryEndpoint {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
        };
        let mut sink = TelemetrySink::connect(Some(&endpoint), &"x".repeat(180));
        assert!(sink.is_enabled());
        // Accepted but never read, so the socket buffers fill up
        let (_held, _) = listener.accept().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            for k in 0..200_000u64 {
                sink.emit("pwm", 255u8, k);
            }
            done_tx.send(sink).unwrap();
        });

        let sink = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(!sink.is_enabled());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_connect_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = TelemetryEndpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut sink = TelemetrySink::connect(Some(&endpoint), "fancontrol");
        assert!(sink.is_enabled());
        sink.emit("cpu_avg_temp", 45, 99);
        drop(sink);

        let (stream, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        assert_eq!(line, "fancontrol.cpu_avg_temp 45 99\n");
    }

    #[test]
    fn test_connect_refused_disables() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let endpoint = TelemetryEndpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        assert!(matches!(
            connect(&endpoint),
            Err(ItefanError::TelemetryConnect { .. })
        ));
        let sink = TelemetrySink::connect(Some(&endpoint), "fancontrol");
        assert!(!sink.is_enabled());
    }

    #[test]
    fn test_no_endpoint_disables() {
        let sink = TelemetrySink::connect(None, "fancontrol");
        assert!(!sink.is_enabled());
    }
}
