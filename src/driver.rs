//! Cooperative S21 link driver.
//!
//! A [`Driver`] owns the serial port, a receive demultiplexer and the
//! [`DeviceState`]. After construction it walks a fixed sequence of
//! initialization queries, gating each step on an acknowledgement from the
//! unit, and then settles into an idle link over which readings are refreshed
//! and commands sent on demand.
//!
//! The driver is single-threaded and non-blocking: [`Driver::poll`] drains
//! whatever bytes are available and performs one step-check, and must be
//! called frequently. Only [`Driver::poll_now`] blocks, bounded by its
//! per-query timeout, and only while the link is idle.

use crate::state::{Command, DeviceState};
use crate::{Error, Frame, Result, RxBuffer, RxEvent, TimeSource, encode_frame};
use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use log::{debug, info, trace};

/// How long to wait for an acknowledgement before retransmitting an
/// initialization query.
const ACK_TIMEOUT_MS: u64 = 1000;

/// Per-query timeout of [`Driver::poll_now`].
const POLL_TIMEOUT_MS: u64 = 500;

/// Sleep between drain attempts while waiting for a poll response.
const POLL_RETRY_DELAY_MS: u32 = 10;

/// Pause between consecutive transmissions.
const STEP_PAUSE_MS: u32 = 50;

/// Without any accepted frame or acknowledgement for this long, the unit is
/// considered disconnected.
const CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Initialization queries, issued in this exact order.
///
/// The sequence mirrors the handshake performed by the vendor's own wall
/// controllers; some units only answer the later queries once the earlier
/// ones have been acknowledged, so the order must be preserved.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum InitStep {
    D20,
    F8,
    F2,
    F4,
    F3,
    F1,
    F5,
    D8,
    Rh,
    Ra,
}

impl InitStep {
    const FIRST: Self = Self::D20;

    const fn payload(self) -> &'static [u8] {
        match self {
            Self::D20 => b"D20",
            Self::F8 => b"F8",
            Self::F2 => b"F2",
            Self::F4 => b"F4",
            Self::F3 => b"F3",
            Self::F1 => b"F1",
            Self::F5 => b"F5",
            Self::D8 => b"D80000",
            Self::Rh => b"RH",
            Self::Ra => b"Ra",
        }
    }

    const fn next(self) -> Option<Self> {
        match self {
            Self::D20 => Some(Self::F8),
            Self::F8 => Some(Self::F2),
            Self::F2 => Some(Self::F4),
            Self::F4 => Some(Self::F3),
            Self::F3 => Some(Self::F1),
            Self::F1 => Some(Self::F5),
            Self::F5 => Some(Self::D8),
            Self::D8 => Some(Self::Rh),
            Self::Rh => Some(Self::Ra),
            Self::Ra => None,
        }
    }

    /// Some units answer `D80000` with a negative acknowledgement; the
    /// sequence proceeds regardless.
    const fn accepts_nak(self) -> bool {
        matches!(self, Self::D8)
    }
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
enum LinkState {
    Send(InitStep),
    Wait(InitStep),
    Idle,
}

/// Cooperative driver for a single S21 link.
///
/// Generic over the serial port `P`, a monotonic [`TimeSource`] `T` and a
/// [`DelayNs`] provider `D`.
pub struct Driver<P, T: TimeSource, D> {
    port: P,
    time: T,
    delay: D,
    rx: RxBuffer,
    link: LinkState,
    ack: bool,
    nak: bool,
    strict_checksums: bool,
    last_action: T::Instant,
    last_contact: T::Instant,
    state: DeviceState,
}

impl<P: Read + ReadReady + Write, T: TimeSource, D: DelayNs> Driver<P, T, D> {
    /// Constructs a new driver; the link starts initializing on the first
    /// [`Driver::poll`] call.
    pub fn new(port: P, time: T, delay: D) -> Self {
        let now = time.now();

        Self {
            port,
            time,
            delay,
            rx: RxBuffer::new(),
            link: LinkState::Send(InitStep::FIRST),
            ack: false,
            nak: false,
            strict_checksums: false,
            // Assume recent contact at start so the unit is not reported
            // disconnected before it had a chance to answer.
            last_action: now,
            last_contact: now,
            state: DeviceState::default(),
        }
    }

    /// Enables or disables verification of received frame checksums.
    ///
    /// Disabled by default: the units accept frames without checking the
    /// checksum themselves, and rejecting on mismatch could drop frames a
    /// real unit would act on. Enable for robustness testing.
    pub fn set_strict_checksums(&mut self, enabled: bool) {
        self.strict_checksums = enabled;
    }

    /// Returns the latest known device state.
    #[must_use]
    pub const fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Returns whether the link initialization sequence has completed.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.link, LinkState::Idle)
    }

    /// Returns whether a frame or acknowledgement was received recently.
    ///
    /// Turns false after 10 seconds without contact and recovers implicitly
    /// once traffic resumes.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.time.is_elapsed(self.last_contact, CONNECTION_TIMEOUT_MS)
    }

    /// Drains all currently available bytes, then performs one step-check of
    /// the initialization sequence.
    ///
    /// Call frequently. Never waits for the unit; the only pauses are the
    /// short fixed gaps between consecutive initialization commands.
    pub fn poll(&mut self) -> Result<(), P::Error> {
        self.drain()?;
        self.step()
    }

    /// Synchronously refreshes the device state over an idle link.
    ///
    /// Sends the `Ra`, `RH` and `F1` queries in turn, draining responses
    /// until each is acknowledged or its 500 ms timeout elapses. Timeouts
    /// are tolerated; whatever responses did arrive have been applied to the
    /// state when this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the link is still initializing. The poll
    ///   shares the acknowledgement tracking with the initialization
    ///   sequence and must not run concurrently with it.
    pub fn poll_now(&mut self) -> Result<(), P::Error> {
        const QUERIES: [&[u8]; 3] = [b"Ra", b"RH", b"F1"];

        if self.link != LinkState::Idle {
            return Err(Error::InvalidState);
        }

        for query in QUERIES {
            self.ack = false;
            self.send_frame(query)?;

            let start = self.time.now();

            while !self.ack && !self.time.is_elapsed(start, POLL_TIMEOUT_MS) {
                self.drain()?;
                self.delay.delay_ms(POLL_RETRY_DELAY_MS);
            }

            if !self.ack {
                debug!("no response to {query:02x?}");
            }

            self.delay.delay_ms(STEP_PAUSE_MS);
        }

        Ok(())
    }

    /// Encodes and transmits a state-change command.
    pub fn send_command(&mut self, command: &Command) -> Result<(), P::Error> {
        debug!("sending command: {command:?}");

        self.send_frame(&command.encode_payload())
    }

    /// Encodes `payload` into a frame and writes it to the port.
    pub fn send_frame(&mut self, payload: &[u8]) -> Result<(), P::Error> {
        let frame = encode_frame(payload);

        trace!("write frame: {:02x?}", frame.as_slice());

        self.port.write_all(&frame)?;
        self.port.flush()?;

        Ok(())
    }

    /// Feeds all currently available bytes through the demultiplexer.
    fn drain(&mut self) -> Result<(), P::Error> {
        while self.port.read_ready()? {
            let mut byte = [0x00];

            if self.port.read(&mut byte)? == 0 {
                break;
            }

            if let Some(event) = self.rx.push(byte[0]) {
                self.handle_event(event);
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: RxEvent) {
        match event {
            RxEvent::Ack => {
                trace!("acknowledgement");

                self.ack = true;
                self.last_contact = self.time.now();
            }
            RxEvent::Nak => {
                debug!("negative acknowledgement");

                self.nak = true;
            }
            RxEvent::Frame(raw) => match Frame::parse(&raw, self.strict_checksums) {
                Ok(frame) => {
                    trace!("read frame: {:02x?}", raw.as_slice());

                    self.state.apply(&frame);
                    self.last_contact = self.time.now();
                }
                Err(err) => trace!("discarding {:02x?}: {err}", raw.as_slice()),
            },
        }
    }

    /// Performs one transition-check of the initialization sequence.
    fn step(&mut self) -> Result<(), P::Error> {
        match self.link {
            LinkState::Idle => {}
            LinkState::Send(step) => {
                self.send_frame(step.payload())?;

                self.last_action = self.time.now();
                self.ack = false;
                self.nak = false;
                self.link = LinkState::Wait(step);
            }
            LinkState::Wait(step) => {
                if self.ack || (step.accepts_nak() && self.nak) {
                    self.delay.delay_ms(STEP_PAUSE_MS);

                    self.link = match step.next() {
                        Some(next) => LinkState::Send(next),
                        None => {
                            info!("link initialization complete");

                            LinkState::Idle
                        }
                    };
                } else if self.time.is_elapsed(self.last_action, ACK_TIMEOUT_MS) {
                    debug!("no acknowledgement for {:02x?}, repeating", step.payload());

                    self.link = LinkState::Send(step);
                }
            }
        }

        Ok(())
    }
}
