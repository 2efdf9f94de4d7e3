//! Structured representation of the unit's sensed and commanded values.
//!
//! A [`DeviceState`] starts out zeroed and is updated exclusively by decoded
//! response frames. Unrecognized response types and field values never clear
//! a reading; the previous value stays in place so consumers always see the
//! last known good state.

use crate::Frame;
use log::{debug, trace};
use strum::{Display, EnumString};

/// Calibration offset in °C applied to reported outside temperatures.
pub const OUTSIDE_TEMP_OFFSET: f32 = -2.0;

/// Operating mode of the unit.
#[derive(Display, EnumString, Default, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mode {
    /// Not yet reported by the unit.
    #[default]
    Unknown,
    /// Automatic heating/cooling.
    Auto,
    /// Dehumidification.
    Dry,
    /// Cooling.
    Cool,
    /// Heating.
    Heat,
    /// Fan only, no heating or cooling.
    #[strum(serialize = "fan")]
    FanOnly,
}

impl Mode {
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            b'0' | b'1' => Some(Self::Auto),
            b'2' => Some(Self::Dry),
            b'3' => Some(Self::Cool),
            b'4' => Some(Self::Heat),
            b'6' => Some(Self::FanOnly),
            _ => None,
        }
    }

    pub(crate) const fn to_wire(self) -> u8 {
        match self {
            Self::Auto => b'1',
            Self::Dry => b'2',
            Self::Cool | Self::Unknown => b'3',
            Self::Heat => b'4',
            Self::FanOnly => b'6',
        }
    }
}

/// Fan speed of the unit.
#[derive(Display, EnumString, Default, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FanSpeed {
    /// Not yet reported by the unit.
    #[default]
    Unknown,
    /// Automatic fan speed.
    Auto,
    /// Quiet operation.
    Silent,
    /// Lowest fixed speed.
    Level1,
    /// Fixed speed 2.
    Level2,
    /// Fixed speed 3.
    Level3,
    /// Fixed speed 4.
    Level4,
    /// Highest fixed speed.
    Level5,
}

impl FanSpeed {
    pub(crate) fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            b'3' => Some(Self::Level1),
            b'4' => Some(Self::Level2),
            b'5' => Some(Self::Level3),
            b'6' => Some(Self::Level4),
            b'7' => Some(Self::Level5),
            b'A' => Some(Self::Auto),
            b'B' => Some(Self::Silent),
            _ => None,
        }
    }

    pub(crate) const fn to_wire(self) -> u8 {
        match self {
            Self::Level1 => b'3',
            Self::Level2 => b'4',
            Self::Level3 => b'5',
            Self::Level4 => b'6',
            Self::Level5 => b'7',
            Self::Silent => b'B',
            Self::Auto | Self::Unknown => b'A',
        }
    }
}

/// Latest known values reported by the unit.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct DeviceState {
    /// Room temperature in °C.
    pub room_temp: f32,
    /// Outside temperature in °C, including [`OUTSIDE_TEMP_OFFSET`].
    pub outside_temp: f32,
    /// Target temperature in °C.
    pub target_temp: f32,
    /// Whether the unit is powered on.
    pub power: bool,
    /// Operating mode.
    pub mode: Mode,
    /// Fan speed.
    pub fan: FanSpeed,
}

impl DeviceState {
    /// Updates the state from a decoded response frame.
    ///
    /// `SH` carries the room temperature, `Sa` the outside temperature and
    /// `G1` the combined power/mode/target/fan status. All other response
    /// types are ignored.
    pub fn apply(&mut self, frame: &Frame<'_>) {
        match frame.kind {
            [b'S', b'H'] => {
                if let Some(value) = parse_decimal(frame.body) {
                    self.room_temp = value;

                    debug!("room temperature: {value:.1} C");
                }
            }
            [b'S', b'a'] => {
                if let Some(value) = parse_decimal(frame.body) {
                    self.outside_temp = value + OUTSIDE_TEMP_OFFSET;

                    debug!(
                        "outside temperature: {:.1} C (raw {value:.1})",
                        self.outside_temp
                    );
                }
            }
            [b'G', b'1'] => self.apply_status(frame.body),
            kind => trace!("ignoring response type {kind:02x?}"),
        }
    }

    /// Decodes the fixed-layout `G1` status body.
    fn apply_status(&mut self, body: &[u8]) {
        let &[power, mode, target, fan, ..] = body else {
            trace!("status body too short: {body:02x?}");

            return;
        };

        self.power = power == b'1';

        debug!("power: {}", if self.power { "on" } else { "off" });

        match Mode::from_wire(mode) {
            Some(value) => {
                self.mode = value;

                debug!("mode: {value}");
            }
            None => debug!("unrecognized mode byte {mode:#04x}, keeping {}", self.mode),
        }

        self.target_temp = fahrenheit_to_celsius(target);

        debug!("target temperature: {:.1} C ({target} F)", self.target_temp);

        match FanSpeed::from_wire(fan) {
            Some(value) => {
                self.fan = value;

                debug!("fan speed: {value}");
            }
            None => debug!("unrecognized fan byte {fan:#04x}, keeping {}", self.fan),
        }
    }
}

/// A desired state change, consumed to build a single command frame.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct Command {
    /// Whether the unit should be powered on.
    pub power: bool,
    /// Requested operating mode; [`Mode::Unknown`] selects cooling.
    pub mode: Mode,
    /// Requested target temperature in °C.
    pub target_c: f32,
    /// Requested fan speed; [`FanSpeed::Unknown`] selects automatic.
    pub fan: FanSpeed,
}

impl Command {
    /// Builds the fixed-layout `D1` command payload.
    ///
    /// The target temperature is transmitted as a raw rounded Fahrenheit
    /// byte, mirroring what the unit reports in `G1` responses.
    #[must_use]
    pub fn encode_payload(&self) -> [u8; 6] {
        [
            b'D',
            b'1',
            if self.power { b'1' } else { b'0' },
            self.mode.to_wire(),
            celsius_to_fahrenheit(self.target_c),
            self.fan.to_wire(),
        ]
    }
}

/// Parses a 4-byte temperature field: three ASCII digits followed by a sign
/// byte, in tenths of a degree.
fn parse_decimal(body: &[u8]) -> Option<f32> {
    let &[d0, d1, d2, sign, ..] = body else {
        return None;
    };
    let text = [sign, d0, d1, d2];
    let value: i32 = core::str::from_utf8(&text).ok()?.parse().ok()?;

    Some(value as f32 / 10.0)
}

fn fahrenheit_to_celsius(raw: u8) -> f32 {
    (f32::from(raw) - 32.0) / 1.8
}

fn celsius_to_fahrenheit(celsius: f32) -> u8 {
    (celsius * 1.8 + 32.0 + 0.5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init_logger;

    #[test]
    fn parses_trailing_sign_decimals() {
        init_logger();

        assert_eq!(parse_decimal(b"570+"), Some(57.0));
        assert_eq!(parse_decimal(b"091+"), Some(9.1));
        assert_eq!(parse_decimal(b"240-"), Some(-24.0));
        assert_eq!(parse_decimal(b"57+"), None);
        assert_eq!(parse_decimal(b"57x+"), None);
    }

    #[test]
    fn room_and_outside_temperatures() {
        init_logger();

        let mut state = DeviceState::default();

        state.apply(&Frame {
            kind: *b"SH",
            body: b"570+",
        });

        assert_eq!(state.room_temp, 57.0);

        state.apply(&Frame {
            kind: *b"Sa",
            body: b"091+",
        });

        assert_eq!(state.outside_temp, 9.1 + OUTSIDE_TEMP_OFFSET);
    }

    #[test]
    fn status_response_updates_all_fields() {
        init_logger();

        let mut state = DeviceState::default();

        state.apply(&Frame {
            kind: *b"G1",
            body: &[b'1', b'4', 72, b'B'],
        });

        assert!(state.power);
        assert_eq!(state.mode, Mode::Heat);
        assert!((state.target_temp - 22.2).abs() < 0.1);
        assert_eq!(state.fan, FanSpeed::Silent);
    }

    #[test]
    fn unrecognized_bytes_keep_last_known_values() {
        init_logger();

        let mut state = DeviceState {
            mode: Mode::Cool,
            fan: FanSpeed::Level3,
            ..DeviceState::default()
        };

        state.apply(&Frame {
            kind: *b"G1",
            body: &[b'0', b'9', 72, 0x00],
        });

        assert!(!state.power);
        assert_eq!(state.mode, Mode::Cool);
        assert_eq!(state.fan, FanSpeed::Level3);
    }

    #[test]
    fn unknown_response_types_are_ignored() {
        init_logger();

        let mut state = DeviceState::default();

        state.apply(&Frame {
            kind: *b"XZ",
            body: &[0x01, 0x02, 0x03, 0x04],
        });

        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn fan_mapping_is_a_bijection_on_its_domain() {
        init_logger();

        let mapping = [
            (FanSpeed::Level1, 0x33),
            (FanSpeed::Level2, 0x34),
            (FanSpeed::Level3, 0x35),
            (FanSpeed::Level4, 0x36),
            (FanSpeed::Level5, 0x37),
            (FanSpeed::Auto, 0x41),
            (FanSpeed::Silent, 0x42),
        ];

        for (speed, byte) in mapping {
            assert_eq!(FanSpeed::from_wire(byte), Some(speed));
            assert_eq!(speed.to_wire(), byte);
        }

        assert_eq!(FanSpeed::from_wire(0x30), None);
        assert_eq!(FanSpeed::from_wire(0x38), None);
        assert_eq!(FanSpeed::Unknown.to_wire(), 0x41);
    }

    #[test]
    fn mode_table_round_trips() {
        init_logger();

        for mode in [Mode::Auto, Mode::Dry, Mode::Cool, Mode::Heat, Mode::FanOnly] {
            assert_eq!(Mode::from_wire(mode.to_wire()), Some(mode));
        }

        assert_eq!(Mode::from_wire(b'0'), Some(Mode::Auto));
        assert_eq!(Mode::from_wire(b'5'), None);
        assert_eq!(Mode::Unknown.to_wire(), b'3');
    }

    #[test]
    fn temperature_conversion_asymmetry_is_tolerated() {
        init_logger();

        // 22.0 C rounds up to 72 F; 72 F comes back as 22.2 C.
        assert_eq!(celsius_to_fahrenheit(22.0), 72);
        assert!((fahrenheit_to_celsius(72) - 22.222).abs() < 0.001);
    }

    #[test]
    fn command_payload_layout() {
        init_logger();

        let command = Command {
            power: false,
            mode: Mode::FanOnly,
            target_c: 25.0,
            fan: FanSpeed::Level5,
        };

        assert_eq!(
            command.encode_payload(),
            [b'D', b'1', b'0', b'6', 77, b'7']
        );
    }
}
