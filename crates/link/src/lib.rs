//! Client for the supervised arm protocol.
//!
//! The firmware on the other end runs its own motion controller, so this
//! client is a thin, stateless request/reply layer: validate, send one
//! frame, block for exactly one status byte. Anything other than a
//! success status becomes a typed error carrying both the command we sent
//! and the status we got back, so callers can tell a range rejection from
//! a framing problem.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::{debug, trace};
use serialport::{ClearBuffer, SerialPort};
use thiserror::Error;

use grabbot_protocol::{Command, Position, Status, UnknownStatus, ValidateError, BAUD_RATE};

/// How long we'll wait for a status byte before declaring the firmware
/// gone. `block_until_target_reached` can legitimately sit here for the
/// whole duration of a move.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("could not open {port}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("invalid command: {0}")]
    Invalid(#[from] ValidateError),
    /// The firmware refused the frame. The status says why: structure,
    /// range, or an unknown message type.
    #[error("firmware rejected {command:?} with status {status:?}")]
    Rejected { command: Command, status: Status },
    /// We were waiting for a target-reached notification and got
    /// something else.
    #[error("expected a target-reached notification, firmware sent {status:?}")]
    UnexpectedStatus { status: Status },
    #[error(transparent)]
    UnknownStatus(#[from] UnknownStatus),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// The byte-level operations the client needs from a serial port.
/// Factored out so tests can drive the client against a recording mock.
pub trait Transport {
    /// Drops any buffered, unread input.
    fn discard_input(&mut self) -> io::Result<()>;
    /// Writes a whole frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    /// Blocks until one byte arrives.
    fn recv_byte(&mut self) -> io::Result<u8>;
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<SerialTransport, LinkError> {
        let port = serialport::new(path, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| LinkError::Connect {
                port: path.to_owned(),
                source,
            })?;
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

/// A connected arm.
///
/// Holds nothing but the transport; all motion state lives in the
/// firmware. Commands must be serialized by the caller — every write is
/// immediately paired with its one-byte reply.
pub struct Arm<T> {
    transport: T,
}

impl Arm<SerialTransport> {
    /// Opens `path` at the protocol's fixed baud rate.
    pub fn open(path: &str) -> Result<Self, LinkError> {
        Arm::new(SerialTransport::open(path)?)
    }
}

impl<T: Transport> Arm<T> {
    /// Wraps an open transport, discarding whatever the board printed
    /// while powering up.
    pub fn new(mut transport: T) -> Result<Self, LinkError> {
        transport.discard_input()?;
        Ok(Arm { transport })
    }

    /// Moves the arm to the home position defined on the firmware side.
    pub fn home(&mut self) -> Result<(), LinkError> {
        self.transact(Command::Home)
    }

    /// Enables or disables the stepper and servo motors.
    pub fn set_motors(&mut self, enabled: bool) -> Result<(), LinkError> {
        self.transact(Command::SetMotors(enabled))
    }

    /// Opens or closes the grabber on the effector.
    pub fn set_grabber(&mut self, on: bool) -> Result<(), LinkError> {
        self.transact(Command::SetGrabber(on))
    }

    /// Moves to the given coordinate, in millimeters.
    pub fn move_to(&mut self, x: i16, y: i16, z: i16) -> Result<(), LinkError> {
        self.move_to_position(Position::new(x, y, z))
    }

    pub fn move_to_position(&mut self, pos: Position) -> Result<(), LinkError> {
        self.transact(Command::MoveTo(pos))
    }

    /// Blocks until the firmware notifies us that the arm has reached its
    /// current x target. Nothing is sent: the notification is emitted by
    /// the firmware mid-motion, not in reply to a frame.
    pub fn block_until_target_reached(&mut self) -> Result<(), LinkError> {
        let status = Status::decode(self.transport.recv_byte()?)?;
        if status != Status::TargetReached {
            return Err(LinkError::UnexpectedStatus { status });
        }
        Ok(())
    }

    fn transact(&mut self, command: Command) -> Result<(), LinkError> {
        // Validation comes first: a rejected command must leave the
        // transport completely untouched.
        command.validate()?;
        self.transport.discard_input()?;
        let frame = command.encode();
        trace!("sending {command:?} as {frame:?}");
        self.transport.send(&frame)?;
        let status = Status::decode(self.transport.recv_byte()?)?;
        if status != Status::Completed {
            debug!("{command:?} rejected: {status:?}");
            return Err(LinkError::Rejected { command, status });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<u8>,
        discards: usize,
    }

    impl MockTransport {
        fn replying(replies: &[u8]) -> Self {
            MockTransport {
                replies: replies.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn discard_input(&mut self) -> io::Result<()> {
            self.discards += 1;
            Ok(())
        }

        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn recv_byte(&mut self) -> io::Result<u8> {
            self.replies
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no reply queued"))
        }
    }

    #[test]
    fn move_round_trip() {
        let mut arm = Arm::new(MockTransport::replying(&[0])).unwrap();
        arm.move_to(100, 200, 50).unwrap();
        assert_eq!(arm.transport.sent, vec![vec![7, 3, 0, 100, 0, 200, 0, 50]]);
        // once on connect, once before the command
        assert_eq!(arm.transport.discards, 2);
    }

    #[test]
    fn every_command_reads_one_status() {
        let mut arm = Arm::new(MockTransport::replying(&[0, 0, 0])).unwrap();
        arm.home().unwrap();
        arm.set_motors(true).unwrap();
        arm.set_grabber(false).unwrap();
        assert_eq!(
            arm.transport.sent,
            vec![vec![1, 0], vec![2, 1, 1], vec![2, 2, 0]]
        );
        assert!(arm.transport.replies.is_empty());
    }

    #[test]
    fn validation_failure_touches_nothing() {
        let mut arm = Arm::new(MockTransport::replying(&[0])).unwrap();
        let discards_after_connect = arm.transport.discards;
        let err = arm.move_to(400, 200, 50).unwrap_err();
        assert!(matches!(err, LinkError::Invalid(_)));
        assert!(arm.transport.sent.is_empty());
        assert_eq!(arm.transport.discards, discards_after_connect);
    }

    #[test]
    fn rejection_carries_command_and_status() {
        let mut arm = Arm::new(MockTransport::replying(&[3])).unwrap();
        // In range for us but rejected by the firmware anyway; the error
        // must say which command and which status.
        let err = arm.move_to(100, 200, 50).unwrap_err();
        match err {
            LinkError::Rejected { command, status } => {
                assert_eq!(command, Command::MoveTo(Position::new(100, 200, 50)));
                assert_eq!(status, Status::InvalidRange);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn unknown_status_is_a_hard_fault() {
        let mut arm = Arm::new(MockTransport::replying(&[7])).unwrap();
        let err = arm.home().unwrap_err();
        assert!(matches!(err, LinkError::UnknownStatus(UnknownStatus(7))));
    }

    #[test]
    fn wait_for_target() {
        let mut arm = Arm::new(MockTransport::replying(&[1])).unwrap();
        arm.block_until_target_reached().unwrap();
        // it reads without sending
        assert!(arm.transport.sent.is_empty());

        let mut arm = Arm::new(MockTransport::replying(&[0])).unwrap();
        let err = arm.block_until_target_reached().unwrap_err();
        assert!(matches!(
            err,
            LinkError::UnexpectedStatus {
                status: Status::Completed
            }
        ));
    }
}
