//! Wire types for the arm's serial protocols.
//!
//! The supervised protocol (this module) talks to the firmware-side motion
//! controller. Every frame starts with a byte counting the rest of the
//! frame, then a message-type byte, then a fixed number of enclosed bytes
//! per type:
//!
//! | type | message       | enclosed bytes                        |
//! |------|---------------|---------------------------------------|
//! | 0    | home          | none                                  |
//! | 1    | motor state   | 1 (0 = disable, 1 = enable)           |
//! | 2    | set grabber   | 1 (0 = release, 1 = grab)             |
//! | 3    | move position | 6 (x, y, z as i16, high byte first)   |
//!
//! The firmware answers every frame with a single [`Status`] byte.
//!
//! The open-loop joint-streaming protocol, which shares nothing with the
//! above except a serial port, lives in [`stream`].

pub mod stream;

use std::ops::RangeInclusive;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Baud rate of the supervised protocol.
pub const BAUD_RATE: u32 = 115_200;

/// Reachable x coordinates, in millimeters.
pub const X_RANGE: RangeInclusive<i16> = 0..=335;
/// Reachable y coordinates, in millimeters.
pub const Y_RANGE: RangeInclusive<i16> = 100..=450;
/// Reachable z coordinates, in millimeters.
pub const Z_RANGE: RangeInclusive<i16> = 0..=200;

/// A validation failure, detected on the host before any byte is written.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum ValidateError {
    #[error("{axis} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        axis: char,
        value: i64,
        min: i16,
        max: i16,
    },
    /// Coordinates are whole millimeters; we refuse to round rather than
    /// guess which way the caller wanted.
    #[error("{axis} = {value} is not a whole number of millimeters")]
    Fractional { axis: char, value: f64 },
}

/// A Cartesian target, in millimeters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Position {
    pub fn new(x: i16, y: i16, z: i16) -> Position {
        Position { x, y, z }
    }

    /// Builds a position from floating-point coordinates, rejecting
    /// fractional or out-of-range input instead of truncating it.
    pub fn from_f64(x: f64, y: f64, z: f64) -> Result<Position, ValidateError> {
        let pos = Position {
            x: whole_mm('x', x, &X_RANGE)?,
            y: whole_mm('y', y, &Y_RANGE)?,
            z: whole_mm('z', z, &Z_RANGE)?,
        };
        pos.validate()?;
        Ok(pos)
    }

    /// Checks every axis against its configured limits.
    pub fn validate(&self) -> Result<(), ValidateError> {
        check_axis('x', self.x, &X_RANGE)?;
        check_axis('y', self.y, &Y_RANGE)?;
        check_axis('z', self.z, &Z_RANGE)?;
        Ok(())
    }

    /// The six enclosed bytes of a move-position message: each coordinate
    /// split `(v >> 8, v & 0xff)`, x then y then z.
    pub fn encode(&self) -> [u8; 6] {
        let [xh, xl] = self.x.to_be_bytes();
        let [yh, yl] = self.y.to_be_bytes();
        let [zh, zl] = self.z.to_be_bytes();
        [xh, xl, yh, yl, zh, zl]
    }

    /// Inverse of [`Position::encode`].
    pub fn decode(bytes: &[u8; 6]) -> Position {
        Position {
            x: i16::from_be_bytes([bytes[0], bytes[1]]),
            y: i16::from_be_bytes([bytes[2], bytes[3]]),
            z: i16::from_be_bytes([bytes[4], bytes[5]]),
        }
    }
}

fn check_axis(axis: char, value: i16, range: &RangeInclusive<i16>) -> Result<(), ValidateError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidateError::OutOfRange {
            axis,
            value: value.into(),
            min: *range.start(),
            max: *range.end(),
        })
    }
}

fn whole_mm(axis: char, value: f64, range: &RangeInclusive<i16>) -> Result<i16, ValidateError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(ValidateError::Fractional { axis, value });
    }
    // A whole value can still be too big for an i16; report that against
    // the axis limits rather than the integer width.
    if value < f64::from(*range.start()) || value > f64::from(*range.end()) {
        return Err(ValidateError::OutOfRange {
            axis,
            value: value as i64,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(value as i16)
}

/// A command for the firmware-side motion controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Home,
    SetMotors(bool),
    SetGrabber(bool),
    MoveTo(Position),
}

impl Command {
    pub fn message_type(&self) -> u8 {
        match self {
            Command::Home => 0,
            Command::SetMotors(_) => 1,
            Command::SetGrabber(_) => 2,
            Command::MoveTo(_) => 3,
        }
    }

    /// The number of enclosed bytes for this message type.
    pub fn enclosed_len(&self) -> u8 {
        match self {
            Command::Home => 0,
            Command::SetMotors(_) | Command::SetGrabber(_) => 1,
            Command::MoveTo(_) => 6,
        }
    }

    /// Range-checks the command's parameters. The boolean-carrying
    /// commands are valid by construction.
    pub fn validate(&self) -> Result<(), ValidateError> {
        match self {
            Command::MoveTo(pos) => pos.validate(),
            _ => Ok(()),
        }
    }

    /// Encodes the complete frame: the leading byte counts the type byte
    /// plus the enclosed bytes. Encoding never fails; out-of-range values
    /// are [`Command::validate`]'s problem and must be rejected before
    /// this is called.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8);
        frame.push(1 + self.enclosed_len());
        frame.push(self.message_type());
        match self {
            Command::Home => {}
            Command::SetMotors(on) | Command::SetGrabber(on) => frame.push(u8::from(*on)),
            Command::MoveTo(pos) => frame.extend_from_slice(&pos.encode()),
        }
        frame
    }
}

/// The firmware's one-byte reply to a frame.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Status {
    /// The request was accepted and carried out.
    Completed = 0,
    /// Sent when the arm arrives at its current x target; used for timing.
    TargetReached = 1,
    /// The frame's length didn't match its message type.
    InvalidStructure = 2,
    /// A parameter was outside the firmware's limits.
    InvalidRange = 3,
    /// The firmware didn't recognize the message type.
    UnknownType = 4,
}

/// A status byte outside the protocol. This means we've lost framing (or
/// are talking to the wrong device) and must not be ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("unknown status byte {0:#04x} from the firmware")]
pub struct UnknownStatus(pub u8);

impl Status {
    pub fn decode(byte: u8) -> Result<Status, UnknownStatus> {
        Status::try_from(byte).map_err(|_| UnknownStatus(byte))
    }
}
