//! The open-loop joint-streaming protocol.
//!
//! Here the firmware is nothing but a serial-to-servo bridge: the host
//! does the inverse kinematics itself and streams raw servo bytes. Frames
//! are terminator-delimited and nothing is ever sent back, so there is no
//! status type and no validation — pacing on the host side is the only
//! form of motion control.

/// Baud rate of the joint-streaming protocol.
pub const BAUD_RATE: u32 = 9600;

/// Every frame ends with this byte.
pub const FRAME_END: u8 = 10;

/// A full pose update: grabber servo, then the back, front and bottom
/// joint servos, then the terminator.
pub fn joint_frame(grabber: u8, back: u8, front: u8, bottom: u8) -> [u8; 5] {
    [grabber, back, front, bottom, FRAME_END]
}

/// A grabber-only actuation. The terminator-based framing lets this omit
/// the joint bytes, leaving the joints wherever they are.
pub fn grabber_frame(grabber: u8) -> [u8; 2] {
    [grabber, FRAME_END]
}
