//! Communicate with Daikin air conditioners via their proprietary S21 serial protocol.
//!
//! # Overview
//!
//! The `daikin-s21` crate implements the half-duplex S21 protocol spoken on the
//! service connector of many Daikin indoor units. It offers a platform-agnostic,
//! non-blocking [`Driver`] that negotiates the link, keeps a [`DeviceState`]
//! (temperatures, power, mode, fan speed) up to date from response frames, and
//! encodes state-change commands.
//!
//! Depending on your needs, you can:
//!
//! - Use the high-level [`Driver`] to initialize the link, refresh readings and
//!   send commands.
//! - Work directly with the wire layer: [`encode_frame`], [`Frame::parse`] and
//!   the [`RxBuffer`] byte-stream demultiplexer.
//!
//! # Getting started
//!
//! The S21 connector exposes a 5 V UART. To communicate with it, you need a
//! UART interface configured as follows:
//!
//! - **Baud rate:** 2400
//! - **Parity:** Even
//! - **Data bits:** 8
//! - **Stop bits:** 2
//!
//! If you enable the `native-serial` feature, you can obtain a compatible
//! serial port instance using [`serial::open`]:
//!
//! ```no_run
//! # #[cfg(feature = "native-serial")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let port = daikin_s21::serial::open("/dev/ttyUSB0")?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native-serial"))]
//! # fn main() {}
//! ```
//!
//! <div class="warning">
//! The S21 connector also carries the unit's unregulated supply rail.
//! Miswiring it can destroy your adapter or the indoor unit's control board.
//! Always take appropriate precautions!
//! </div>
//!
//! # Examples
//!
//! The driver is cooperative: call [`Driver::poll`] frequently. Each call
//! drains the bytes currently available on the port and performs a single
//! step-check of the link initialization sequence. Once [`Driver::is_idle`]
//! reports that the link is up, readings can be refreshed on demand and
//! commands sent:
//!
//! ```no_run
//! use daikin_s21::{Driver, state::{Command, FanSpeed, Mode}};
//! # use core::convert::Infallible;
//! # struct Port;
//! # impl daikin_s21::embedded_io::ErrorType for Port { type Error = Infallible; }
//! # impl daikin_s21::embedded_io::Read for Port {
//! #     fn read(&mut self, _: &mut [u8]) -> Result<usize, Infallible> { Ok(0) }
//! # }
//! # impl daikin_s21::embedded_io::ReadReady for Port {
//! #     fn read_ready(&mut self) -> Result<bool, Infallible> { Ok(false) }
//! # }
//! # impl daikin_s21::embedded_io::Write for Port {
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Infallible> { Ok(()) }
//! # }
//! # struct Clock;
//! # impl daikin_s21::TimeSource for Clock {
//! #     type Instant = u64;
//! #     fn now(&self) -> u64 { 0 }
//! #     fn is_elapsed(&self, _: u64, _: u64) -> bool { true }
//! # }
//! # struct Delay;
//! # impl daikin_s21::embedded_hal::delay::DelayNs for Delay {
//! #     fn delay_ns(&mut self, _: u32) {}
//! # }
//! # fn example(port: Port, clock: Clock, delay: Delay) -> Result<(), daikin_s21::Error<Infallible>> {
//! let mut driver = Driver::new(port, clock, delay);
//!
//! while !driver.is_idle() {
//!     driver.poll()?;
//! }
//!
//! driver.poll_now()?;
//!
//! let state = driver.state();
//! // state.room_temp, state.power, ...
//!
//! driver.send_command(&Command {
//!     power: true,
//!     mode: Mode::Heat,
//!     target_c: 21.5,
//!     fan: FanSpeed::Auto,
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol details
//!
//! Every S21 message is a frame bounded by a start marker ([`STX`]) and an end
//! marker ([`ETX`]), with a trailing checksum byte before the end marker:
//!
//! | Offset | Field | Value |
//! |---|---|---|
//! | 0 | start marker | `0x02` |
//! | 1.. | payload | command/response bytes |
//! | len − 2 | checksum | 8-bit sum of the payload |
//! | len − 1 | end marker | `0x03` |
//!
//! A checksum summing to `0x03` would be indistinguishable from the end
//! marker, so the unit substitutes [`CHECKSUM_ESCAPE`] (`0x05`) on the wire.
//!
//! Outside of frames, the unit confirms commands with a single [`ACK`]
//! (`0x06`) byte and rejects them with a single [`NAK`] (`0x15`) byte. An
//! acknowledgement may also be glued to the front of a response frame.
//!
//! Units observed in the field never reject a frame over a bad checksum, and
//! the driver mirrors that leniency: received checksums are not verified
//! unless [`Driver::set_strict_checksums`] enables verification.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(test)]
extern crate std;

pub mod driver;
pub mod state;

#[cfg(feature = "native-serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-serial")))]
pub mod serial;

pub use driver::Driver;
pub use embedded_hal;
pub use embedded_io;
pub use state::DeviceState;

use core::{
    fmt::{Display, Formatter},
    num::Wrapping,
};
use heapless::Vec;
use log::trace;

/// Start-of-frame marker.
pub const STX: u8 = 0x02;

/// End-of-frame marker.
pub const ETX: u8 = 0x03;

/// Standalone acknowledgement byte, sent when the unit accepts a command.
pub const ACK: u8 = 0x06;

/// Standalone negative-acknowledgement byte, sent when the unit rejects a
/// command.
pub const NAK: u8 = 0x15;

/// Substitute transmitted in place of a checksum that would equal [`ETX`].
pub const CHECKSUM_ESCAPE: u8 = 0x05;

/// Capacity of the receive accumulator and of encoded frames.
pub const FRAME_CAPACITY: usize = 64;

/// A specialized [`Result`] type for [`Driver`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Driver`] operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The link was in an invalid state for the requested operation.
    InvalidState,
    /// A port-specific input/output error.
    Io(E),
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::InvalidState => write!(f, "invalid link state"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

/// Monotonic time provider consumed by the [`Driver`] for timeout tracking.
///
/// The driver never reads a wall clock itself; implement this trait for your
/// platform's monotonic timer. With the `native-serial` feature enabled,
/// [`serial::Clock`] provides an implementation over [`std::time::Instant`].
pub trait TimeSource {
    /// Monotonic point in time produced by this source.
    type Instant: Copy;

    /// Returns the current time.
    fn now(&self) -> Self::Instant;

    /// Returns whether at least `timeout_ms` milliseconds have passed since
    /// `since`, which must be a value previously returned by
    /// [`TimeSource::now`].
    fn is_elapsed(&self, since: Self::Instant, timeout_ms: u64) -> bool;
}

impl<T: TimeSource> TimeSource for &T {
    type Instant = T::Instant;

    fn now(&self) -> Self::Instant {
        T::now(self)
    }

    fn is_elapsed(&self, since: Self::Instant, timeout_ms: u64) -> bool {
        T::is_elapsed(self, since, timeout_ms)
    }
}

/// Computes the checksum byte for a frame payload.
///
/// The checksum is the 8-bit wrapping sum of the payload bytes; a sum equal
/// to [`ETX`] is substituted with [`CHECKSUM_ESCAPE`] so the end marker stays
/// unambiguous.
#[must_use]
pub fn frame_checksum(payload: &[u8]) -> u8 {
    let sum = payload.iter().map(|&x| Wrapping(x)).sum::<Wrapping<u8>>().0;

    if sum == ETX { CHECKSUM_ESCAPE } else { sum }
}

/// Encodes a payload into a complete wire frame.
///
/// Prepends the start marker and appends the checksum and the end marker.
/// Any payload that fits the frame capacity is valid.
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Vec<u8, FRAME_CAPACITY> {
    debug_assert!(payload.len() <= FRAME_CAPACITY - 3);

    let mut frame = Vec::new();
    let _ = frame.push(STX);
    let _ = frame.extend_from_slice(payload);
    let _ = frame.push(frame_checksum(payload));
    let _ = frame.push(ETX);

    frame
}

/// Reason a byte sequence was rejected as a frame.
///
/// Rejected frames are discarded by the driver with a log record; they never
/// abort communication.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum FrameError {
    /// Shorter than the minimal marker/type/checksum sequence.
    TooShort,
    /// Does not begin with the start marker.
    MissingStart,
    /// The received checksum byte does not match the computed one.
    ///
    /// Only produced when checksum verification is enabled.
    ChecksumMismatch,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::MissingStart => write!(f, "missing start marker"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
        }
    }
}

impl core::error::Error for FrameError {}

/// A decoded view into a raw response frame.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Frame<'a> {
    /// Two-byte response type, e.g. `G1` or `SH`.
    pub kind: [u8; 2],
    /// Payload bytes between the response type and the checksum.
    pub body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parses a raw frame, bounded by start and end markers.
    ///
    /// The received checksum byte is only cross-checked against the payload
    /// when `verify_checksum` is set; the units themselves never enforce it.
    pub fn parse(raw: &'a [u8], verify_checksum: bool) -> core::result::Result<Self, FrameError> {
        if raw.len() < 5 {
            return Err(FrameError::TooShort);
        }

        if raw[0] != STX {
            return Err(FrameError::MissingStart);
        }

        let payload = &raw[1..raw.len() - 2];

        if verify_checksum && frame_checksum(payload) != raw[raw.len() - 2] {
            return Err(FrameError::ChecksumMismatch);
        }

        Ok(Self {
            kind: [raw[1], raw[2]],
            body: &raw[3..raw.len() - 2],
        })
    }
}

/// Event produced by the [`RxBuffer`] demultiplexer.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum RxEvent {
    /// A standalone acknowledgement byte.
    ///
    /// Also raised for an acknowledgement glued to the front of a response
    /// frame, in which case the frame follows as its own event.
    Ack,
    /// A standalone negative-acknowledgement byte.
    Nak,
    /// A candidate frame, terminated by the end marker.
    ///
    /// Candidates are raw and may still be rejected by [`Frame::parse`].
    Frame(Vec<u8, FRAME_CAPACITY>),
}

/// Byte-at-a-time receive demultiplexer.
///
/// Accumulates raw bytes into a bounded buffer and splits the stream into
/// [`RxEvent`]s: complete candidate frames and out-of-frame acknowledgement
/// bytes. On overflow the accumulated bytes are discarded; the stream
/// resynchronizes at the next frame boundary.
#[derive(Default, Debug)]
pub struct RxBuffer {
    buf: Vec<u8, FRAME_CAPACITY>,
}

impl RxBuffer {
    /// Constructs an empty demultiplexer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Consumes one received byte, possibly completing an event.
    pub fn push(&mut self, byte: u8) -> Option<RxEvent> {
        if self.buf.push(byte).is_err() {
            trace!("receive overflow, discarding {} bytes", self.buf.len());

            self.buf.clear();
            let _ = self.buf.push(byte);
        }

        if byte == ETX {
            return Some(RxEvent::Frame(core::mem::take(&mut self.buf)));
        }

        if self.buf.len() == 1 {
            match byte {
                ACK => {
                    self.buf.clear();

                    return Some(RxEvent::Ack);
                }
                NAK => {
                    self.buf.clear();

                    return Some(RxEvent::Nak);
                }
                _ => {}
            }
        }

        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_io::{ErrorType, Read, ReadReady, Write};
    use log::LevelFilter;
    use std::{cell::Cell, collections::VecDeque, vec::Vec as HostVec};

    pub fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    /// Scripted port: reads pop from `rx`, writes append to `tx`.
    #[derive(Default)]
    pub struct TestPort {
        pub rx: VecDeque<u8>,
        pub tx: HostVec<u8>,
    }

    impl TestPort {
        pub fn receive(&mut self, bytes: &[u8]) {
            self.rx.extend(bytes);
        }
    }

    impl ErrorType for TestPort {
        type Error = Infallible;
    }

    impl Read for TestPort {
        fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Infallible> {
            match self.rx.pop_front() {
                Some(byte) if !buf.is_empty() => {
                    buf[0] = byte;

                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    impl ReadReady for TestPort {
        fn read_ready(&mut self) -> core::result::Result<bool, Infallible> {
            Ok(!self.rx.is_empty())
        }
    }

    impl Write for TestPort {
        fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Infallible> {
            self.tx.extend_from_slice(buf);

            Ok(buf.len())
        }

        fn flush(&mut self) -> core::result::Result<(), Infallible> {
            Ok(())
        }
    }

    /// Hand-advanced clock with millisecond instants.
    #[derive(Default)]
    pub struct TestClock {
        now: Cell<u64>,
    }

    impl TestClock {
        pub fn advance(&self, ms: u64) {
            self.now.set(self.now.get() + ms);
        }
    }

    impl TimeSource for TestClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            self.now.get()
        }

        fn is_elapsed(&self, since: u64, timeout_ms: u64) -> bool {
            self.now.get() - since >= timeout_ms
        }
    }

    /// Delay provider that advances the shared [`TestClock`] instead of
    /// sleeping.
    pub struct TestDelay<'a>(pub &'a TestClock);

    impl embedded_hal::delay::DelayNs for TestDelay<'_> {
        fn delay_ns(&mut self, ns: u32) {
            self.0.advance(u64::from(ns) / 1_000_000);
        }
    }

    #[test]
    fn encode_produces_marked_frame() {
        init_logger();

        let frame = encode_frame(b"F8");

        assert_eq!(frame.as_slice(), [STX, b'F', b'8', 0x7e, ETX]);
    }

    #[test]
    fn decode_recovers_encoded_payload() {
        init_logger();

        let frame = encode_frame(b"G1abc");
        let parsed = Frame::parse(&frame, true).unwrap();

        assert_eq!(parsed.kind, *b"G1");
        assert_eq!(parsed.body, b"abc");
    }

    #[test]
    fn checksum_escape_avoids_end_marker() {
        init_logger();

        let frame = encode_frame(&[0x01, 0x02]);

        assert_eq!(frame.as_slice(), [STX, 0x01, 0x02, CHECKSUM_ESCAPE, ETX]);
        assert!(Frame::parse(&frame, true).is_ok());
    }

    #[test]
    fn parse_rejects_malformed_frames() {
        init_logger();

        assert_eq!(
            Frame::parse(&[STX, b'G', ETX], false),
            Err(FrameError::TooShort)
        );
        assert_eq!(
            Frame::parse(&[0x00, b'G', b'1', 0x00, ETX], false),
            Err(FrameError::MissingStart)
        );
    }

    #[test]
    fn checksum_is_ignored_unless_verification_requested() {
        init_logger();

        let mut frame = encode_frame(b"SH570+");
        let len = frame.len();

        frame[len - 2] ^= 0xff;

        assert!(Frame::parse(&frame, false).is_ok());
        assert_eq!(
            Frame::parse(&frame, true),
            Err(FrameError::ChecksumMismatch)
        );
    }

    #[test]
    fn standalone_ack_and_nak_bytes() {
        init_logger();

        let mut rx = RxBuffer::new();

        assert_eq!(rx.push(ACK), Some(RxEvent::Ack));
        assert_eq!(rx.push(NAK), Some(RxEvent::Nak));
    }

    #[test]
    fn ack_prefixed_frame_raises_both_events() {
        init_logger();

        let mut rx = RxBuffer::new();
        let mut wire = HostVec::from([ACK]);

        wire.extend_from_slice(&encode_frame(b"F8"));

        let mut events = HostVec::new();

        for byte in wire {
            if let Some(event) = rx.push(byte) {
                events.push(event);
            }
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RxEvent::Ack);

        let RxEvent::Frame(raw) = &events[1] else {
            panic!("expected a frame event");
        };
        let frame = Frame::parse(raw, true).unwrap();

        assert_eq!(frame.kind, *b"F8");
    }

    #[test]
    fn ack_inside_frame_is_payload() {
        init_logger();

        let mut rx = RxBuffer::new();
        let mut events = HostVec::new();

        for &byte in &[STX, b'G', b'1', ACK, 0x00, ETX] {
            if let Some(event) = rx.push(byte) {
                events.push(event);
            }
        }

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RxEvent::Frame(_)));
    }

    #[test]
    fn overflow_discards_partial_data() {
        init_logger();

        let mut rx = RxBuffer::new();

        for _ in 0..FRAME_CAPACITY + 8 {
            assert_eq!(rx.push(b'x'), None);
        }

        // The junk left over from the overflow poisons the next candidate,
        // which the end marker then flushes out.
        let mut events = HostVec::new();

        for &byte in encode_frame(b"F8").iter() {
            if let Some(event) = rx.push(byte) {
                events.push(event);
            }
        }

        let [RxEvent::Frame(poisoned)] = events.as_slice() else {
            panic!("expected a single frame event");
        };

        assert_eq!(
            Frame::parse(poisoned, false),
            Err(FrameError::MissingStart)
        );

        // The stream is resynchronized from here on.
        for &byte in encode_frame(b"F8").iter() {
            if let Some(RxEvent::Frame(raw)) = rx.push(byte) {
                assert_eq!(Frame::parse(&raw, true).map(|f| f.kind), Ok(*b"F8"));

                return;
            }
        }

        panic!("expected a frame after resynchronization");
    }
}
