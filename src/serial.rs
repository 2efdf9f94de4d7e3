//! Native serial port support for [`Driver`](crate::Driver).
//!
//! Uses the [`serial2`](https://crates.io/crates/serial2) crate, plus
//! [`Clock`] and [`Delay`] implementations of the driver's time contracts
//! backed by `std`.
//!
//! ```no_run
//! use daikin_s21::{Driver, serial};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let port = serial::open("/dev/ttyUSB0")?;
//! let mut driver = Driver::new(port, serial::Clock, serial::Delay);
//!
//! while !driver.is_idle() {
//!     driver.poll()?;
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! # Ok(())
//! # }
//! ```

extern crate std;

use crate::{Error, TimeSource};
use embedded_io::{ErrorType, Read, ReadReady, Write};
use serial2::{CharSize, Parity, SerialPort, Settings, StopBits};
use std::{
    io,
    thread,
    time::{Duration, Instant},
};

/// Serial port wrapper implementing [`Read`], [`ReadReady`] and [`Write`].
///
/// Readiness is detected by attempting a short-timeout read and holding the
/// result back for the next [`Read::read`] call.
#[derive(Debug)]
pub struct Port {
    inner: SerialPort,
    peek: Option<u8>,
}

/// Port-specific error type to be used as `E` for the generic [`Error<E>`] type.
pub type PortError = io::Error;

/// Opens a native serial port at the given path.
///
/// The port is configured for the S21 line discipline: 2400 baud, 8 data
/// bits, even parity, two stop bits. Returns a [`Port`] that can be passed
/// to [`Driver::new`](crate::Driver::new).
pub fn open(path: &str) -> Result<Port, Error<io::Error>> {
    let mut port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(2400)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_parity(Parity::Even);
        settings.set_stop_bits(StopBits::Two);

        Ok(settings)
    })?;

    port.set_read_timeout(Duration::from_millis(1))?;
    port.discard_buffers()?;

    Ok(Port {
        inner: port,
        peek: None,
    })
}

fn is_empty_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl ErrorType for Port {
    type Error = io::Error;
}

impl Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let Some(byte) = self.peek.take() {
            buf[0] = byte;

            return Ok(1);
        }

        match self.inner.read(buf) {
            Ok(len) => Ok(len),
            Err(err) if is_empty_read(&err) => Ok(0),
            Err(err) => Err(err),
        }
    }
}

impl ReadReady for Port {
    fn read_ready(&mut self) -> io::Result<bool> {
        if self.peek.is_some() {
            return Ok(true);
        }

        let mut byte = [0x00];

        match self.inner.read(&mut byte) {
            Ok(0) => Ok(false),
            Ok(_) => {
                self.peek = Some(byte[0]);

                Ok(true)
            }
            Err(err) if is_empty_read(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Write for Port {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Monotonic [`TimeSource`] backed by [`std::time::Instant`].
#[derive(Default, Copy, Clone, Debug)]
pub struct Clock;

impl TimeSource for Clock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn is_elapsed(&self, since: Instant, timeout_ms: u64) -> bool {
        since.elapsed() >= Duration::from_millis(timeout_ms)
    }
}

/// Blocking delay provider backed by [`std::thread::sleep`].
#[derive(Default, Copy, Clone, Debug)]
pub struct Delay;

impl embedded_hal::delay::DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns.into()));
    }
}
