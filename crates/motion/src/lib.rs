//! The host-side motion engine for the joint-streaming protocol.
//!
//! The firmware here is a dumb serial-to-servo bridge, so the host owns
//! everything: the believed pose, the grabbed flag, and the pacing. A
//! Cartesian move is decomposed into linearly interpolated intermediate
//! points, each solved to servo bytes and streamed as one frame, with a
//! fixed delay in between. Nothing ever comes back over the wire; the
//! delays are the only thing standing between a command and the arm
//! slamming to its target.

use std::io::{self, Write};
use std::time::Duration;

use log::{debug, trace};
use serialport::SerialPort;
use thiserror::Error;

use grabbot_geom::{Config, Point};
use grabbot_protocol::stream;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("could not open {port}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },
    /// The solver failed partway through a slide. No frame was sent for
    /// the failing step and the slide is abandoned.
    #[error(transparent)]
    Unreachable(#[from] grabbot_geom::Unreachable),
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Where joint frames go. Tests record them; the real one is a serial
/// port.
pub trait FrameSink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;
}

pub struct SerialSink {
    port: Box<dyn SerialPort>,
}

impl SerialSink {
    pub fn open(path: &str) -> Result<SerialSink, MotionError> {
        let port = serialport::new(path, stream::BAUD_RATE)
            .timeout(Duration::from_secs(5))
            .open()
            .map_err(|source| MotionError::Connect {
                port: path.to_owned(),
                source,
            })?;
        Ok(SerialSink { port })
    }
}

impl FrameSink for SerialSink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }
}

/// The engine's only suspension point. Factored out so tests can count
/// and sum the delays instead of actually waiting through them.
pub trait Pace {
    fn pause(&mut self, delay: Duration);
}

/// Hybrid sleep/spin pacing. The inter-step delays are tens of
/// milliseconds and a plain `thread::sleep` can overshoot by a scheduler
/// quantum, which makes slides visibly stutter.
#[derive(Default)]
pub struct SpinPace(spin_sleep::SpinSleeper);

impl Pace for SpinPace {
    fn pause(&mut self, delay: Duration) {
        self.0.sleep(delay);
    }
}

/// Construction-time tuning. Distances in centimeters, speeds in
/// centimeters per second.
#[derive(Clone, Copy, Debug)]
pub struct Tunables {
    /// Speed along the interpolated path.
    pub speed: f32,
    /// Step density: how many joint frames per centimeter of path.
    pub steps_per_cm: f32,
    /// How long mechanical wobble takes to die down after a slide.
    pub settle_time: Duration,
    /// How long the grabber servo takes to actually open or close.
    pub grab_time: Duration,
    /// The pose the engine assumes at construction and returns to on
    /// [`Engine::park`].
    pub home: Point,
    /// Grabber servo command bytes for the closed and open positions.
    pub grab_on: u8,
    pub grab_off: u8,
    /// When a slide aborts on an unreachable step, the engine normally
    /// still records the intended target as the current position — that
    /// mirrors the firmware bridge's original controller, bug or not.
    /// Strict mode records the last pose actually sent instead.
    pub strict_abort: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            speed: 30.0,
            steps_per_cm: 0.1,
            settle_time: Duration::from_secs(3),
            grab_time: Duration::from_secs(1),
            home: Point::new(0.0, 20.0, 10.0),
            grab_on: 154,
            grab_off: 140,
            strict_abort: false,
        }
    }
}

/// A connected, stateful arm.
///
/// Single-threaded by design: a slide runs to completion (or first
/// kinematic failure) before returning, and the sink is exclusively
/// owned.
pub struct Engine<S, P> {
    sink: S,
    pace: P,
    geom: Config,
    tunables: Tunables,
    position: Point,
    grabbed: bool,
}

impl Engine<SerialSink, SpinPace> {
    pub fn open(path: &str, geom: Config, tunables: Tunables) -> Result<Self, MotionError> {
        Ok(Engine::new(
            SerialSink::open(path)?,
            SpinPace::default(),
            geom,
            tunables,
        ))
    }
}

impl<S: FrameSink, P: Pace> Engine<S, P> {
    /// The engine starts out *believing* the arm is at the home pose; it
    /// has no way to ask. The first [`Engine::home`] call makes that
    /// belief true.
    pub fn new(sink: S, pace: P, geom: Config, tunables: Tunables) -> Self {
        Engine {
            sink,
            pace,
            geom,
            position: tunables.home,
            grabbed: false,
            tunables,
        }
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn grabbed(&self) -> bool {
        self.grabbed
    }

    /// Slides the gripper along a straight line to `target`, streaming
    /// one joint frame per step at the configured cadence.
    pub fn slide_to(&mut self, target: Point) -> Result<(), MotionError> {
        let dist = (target - self.position).length();
        if dist == 0.0 {
            // Re-assert the current pose anyway. The bridge only learns a
            // pose when we send one, so the very first home() has to
            // produce a frame even though we "are" already there.
            return self.write_pose(self.position);
        }

        let steps = (dist * self.tunables.steps_per_cm).ceil().max(1.0) as u32;
        let delay = Duration::from_secs_f32(dist / self.tunables.speed / steps as f32);
        debug!("sliding to {target:?}: {dist:.2}cm in {steps} steps");

        let start = self.position;
        let mut sent = start;
        for i in 0..=steps {
            let pose = start.lerp(target, i as f32 / steps as f32);
            if let Err(err) = self.write_pose(pose) {
                self.position = if self.tunables.strict_abort {
                    sent
                } else {
                    target
                };
                return Err(err);
            }
            sent = pose;
            if i < steps {
                self.pace.pause(delay);
            }
        }
        // Snap to the exact target rather than the last interpolated
        // point, so float error can't accumulate across slides.
        self.position = target;
        Ok(())
    }

    /// Opens or closes the grabber, waiting out the servo travel before
    /// returning.
    pub fn set_grabber(&mut self, on: bool) -> Result<(), MotionError> {
        let byte = if on {
            self.tunables.grab_on
        } else {
            self.tunables.grab_off
        };
        self.sink.send(&stream::grabber_frame(byte))?;
        self.pace.pause(self.tunables.grab_time);
        self.grabbed = on;
        Ok(())
    }

    pub fn home(&mut self) -> Result<(), MotionError> {
        let home = self.tunables.home;
        self.slide_to(home)
    }

    /// Returns the arm to its home pose. Hosts should call this as part
    /// of their own shutdown sequence; the engine never does it behind
    /// the caller's back.
    pub fn park(&mut self) -> Result<(), MotionError> {
        self.home()
    }

    /// Waits out the configured mechanical settle time.
    pub fn settle(&mut self) {
        let settle = self.tunables.settle_time;
        self.pace.pause(settle);
    }

    fn write_pose(&mut self, pose: Point) -> Result<(), MotionError> {
        let servos = self.geom.solve_bytes(pose)?;
        let grabber = if self.grabbed {
            self.tunables.grab_on
        } else {
            self.tunables.grab_off
        };
        let frame = stream::joint_frame(grabber, servos.back, servos.front, servos.bottom);
        trace!("pose {pose:?} -> {frame:?}");
        self.sink.send(&frame)?;
        Ok(())
    }
}
