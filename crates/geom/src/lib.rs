//! Geometry of the arm, including the conversion from a Cartesian target
//! to joint angles and raw servo bytes.
//!
//! The arm is a symmetric two-link linkage: two segments of equal length,
//! driven by the "front" and "back" servos at the shoulder, sitting on a
//! turntable driven by the "bottom" servo. The gripper extends a fixed
//! distance past the wrist, so the usable horizontal reach is measured
//! after subtracting it.
//!
//! Coordinates are in centimeters: x across the base, y straight out from
//! it, z up. Angles come out in degrees because that's what the servo
//! byte conversion wants.

use euclid::Point3D;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Angle = euclid::Angle<f32>;
pub type Point = Point3D<f32, Cm>;

pub struct Cm;

pub type Len = euclid::Length<f32, Cm>;

pub trait LenExt {
    fn cm(self) -> Len;
}

impl LenExt for f32 {
    fn cm(self) -> Len {
        Len::new(self)
    }
}

fn square(x: f32) -> f32 {
    x * x
}

/// The three joint servo angles for one pose.
///
/// `front` and `back` drive the two arm segments; `bottom` rotates the
/// base. Derived from a target point on every step, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    pub front: Angle,
    pub back: Angle,
    pub bottom: Angle,
}

/// The servo command bytes for one pose, ready for a joint frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoBytes {
    pub front: u8,
    pub back: u8,
    pub bottom: u8,
}

/// The target can't be reached by the linkage: the law-of-cosines
/// argument left [-1, 1] (or degenerated to NaN at zero reach).
#[derive(Clone, Copy, Debug, PartialEq, Error)]
#[error("target ({x}, {y}, {z}) is out of the arm's reach")]
pub struct Unreachable {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

pub struct ConfigBuilder {
    arm_length: Len,
    gripper_length: Len,
    front_offset: i16,
    back_offset: i16,
    bottom_offset: i16,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            arm_length: 20.0.cm(),
            gripper_length: 4.0.cm(),
            front_offset: -16,
            back_offset: -8,
            bottom_offset: -25,
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> Config {
        Config {
            arm_length: self.arm_length,
            gripper_length: self.gripper_length,
            front_offset: self.front_offset,
            back_offset: self.back_offset,
            bottom_offset: self.bottom_offset,
        }
    }

    pub fn with_arm_length(&mut self, len: Len) -> &mut Self {
        self.arm_length = len;
        self
    }

    pub fn with_gripper_length(&mut self, len: Len) -> &mut Self {
        self.gripper_length = len;
        self
    }

    pub fn with_offsets(&mut self, front: i16, back: i16, bottom: i16) -> &mut Self {
        self.front_offset = front;
        self.back_offset = back;
        self.bottom_offset = bottom;
        self
    }
}

/// The geometric configuration of an arm.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The length of each of the two arm segments, in centimeters.
    pub arm_length: Len,
    /// How far the gripper extends past the wrist, horizontally.
    pub gripper_length: Len,
    /// Per-servo mounting calibration, in degrees. Added after the
    /// 180-degree flip when converting an angle to a servo byte.
    pub front_offset: i16,
    pub back_offset: i16,
    pub bottom_offset: i16,
}

impl Config {
    /// The inverse-kinematics transform: joint angles that put the
    /// gripper at `target`.
    ///
    /// With `d` the horizontal reach past the gripper and
    /// `r = sqrt(d² + z²)` the shoulder-to-wrist distance, the two equal
    /// segments form an isosceles triangle over `r`, so the elbow
    /// half-angle `A` satisfies `cos A = r / (2 · arm_length)`. Raising
    /// the wrist tilts the whole triangle by the elevation angle, which
    /// adds to the front servo and subtracts from the back one.
    pub fn solve(&self, target: Point) -> Result<JointAngles, Unreachable> {
        let d = (square(target.x) + square(target.y)).sqrt() - self.gripper_length.get();
        let reach_sq = square(d) + square(target.z);
        // Kept in the unsimplified form so that zero reach gives NaN,
        // which the domain check below rejects along with everything the
        // linkage can't fold to.
        let cos_elbow = reach_sq / (2.0 * self.arm_length.get() * reach_sq.sqrt());
        if !(-1.0..=1.0).contains(&cos_elbow) {
            return Err(Unreachable {
                x: target.x,
                y: target.y,
                z: target.z,
            });
        }
        let elbow = Angle::radians(cos_elbow.acos());
        let elevation = Angle::radians(target.z.atan2(d));
        let rotation = Angle::radians(target.x.atan2(target.y));
        Ok(JointAngles {
            front: elbow + elevation,
            back: elbow - elevation,
            bottom: rotation + Angle::degrees(90.0),
        })
    }

    /// Converts joint angles to servo command bytes:
    /// `180 - round(degrees) + offset`, clamped to one byte.
    pub fn servo_bytes(&self, angles: &JointAngles) -> ServoBytes {
        ServoBytes {
            front: servo_byte(angles.front, self.front_offset),
            back: servo_byte(angles.back, self.back_offset),
            bottom: servo_byte(angles.bottom, self.bottom_offset),
        }
    }

    /// [`Config::solve`] straight through to servo bytes.
    pub fn solve_bytes(&self, target: Point) -> Result<ServoBytes, Unreachable> {
        Ok(self.servo_bytes(&self.solve(target)?))
    }
}

fn servo_byte(angle: Angle, offset: i16) -> u8 {
    let deg = angle.to_degrees().round() as i32;
    (180 - deg + i32::from(offset)).clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn default_config() -> Config {
        ConfigBuilder::default().build()
    }

    #[test]
    fn straight_out_pose() {
        // d = 20 with 20cm segments: cos A = 20/40, so a 60 degree elbow,
        // no elevation, base straight ahead.
        let angles = default_config().solve(Point::new(0.0, 24.0, 0.0)).unwrap();
        assert!((angles.front.to_degrees() - 60.0).abs() < 1e-3);
        assert!((angles.back.to_degrees() - 60.0).abs() < 1e-3);
        assert!((angles.bottom.to_degrees() - 90.0).abs() < 1e-3);

        let bytes = default_config().servo_bytes(&angles);
        assert_eq!(bytes.front, 104); // 180 - 60 - 16
        assert_eq!(bytes.back, 112); // 180 - 60 - 8
        assert_eq!(bytes.bottom, 65); // 180 - 90 - 25
    }

    #[test]
    fn elevation_splits_front_and_back() {
        let cfg = default_config();
        let angles = cfg.solve(Point::new(0.0, 20.0, 10.0)).unwrap();
        let flat = cfg.solve(Point::new(0.0, 20.0, 0.0)).unwrap();
        assert!(angles.front > flat.front);
        assert!(angles.back < flat.back);
        // front - back is exactly twice the elevation angle
        let elevation = 10.0f32.atan2(16.0);
        assert!(((angles.front - angles.back).radians - 2.0 * elevation).abs() < 1e-4);
    }

    #[test]
    fn base_rotation() {
        let angles = default_config()
            .solve(Point::new(10.0, 10.0, 0.0))
            .unwrap();
        assert!((angles.bottom.to_degrees() - 135.0).abs() < 1e-3);
    }

    #[test]
    fn zero_reach_is_unreachable_not_a_panic() {
        // x = 0, y = gripper_length puts the wrist exactly at the
        // shoulder; the cosine degenerates to 0/0.
        let err = default_config()
            .solve(Point::new(0.0, 4.0, 0.0))
            .unwrap_err();
        assert_eq!(
            err,
            Unreachable {
                x: 0.0,
                y: 4.0,
                z: 0.0,
            }
        );
    }

    #[test]
    fn beyond_full_extension_is_unreachable() {
        // reach > 2 * arm_length
        assert!(default_config().solve(Point::new(0.0, 60.0, 0.0)).is_err());
        assert!(default_config().solve(Point::new(0.0, 4.0, 41.0)).is_err());
    }

    #[test]
    fn servo_byte_clamps() {
        let angles = JointAngles {
            front: Angle::degrees(400.0),
            back: Angle::degrees(-200.0),
            bottom: Angle::degrees(90.0),
        };
        let bytes = default_config().servo_bytes(&angles);
        assert_eq!(bytes.front, 0); // 180 - 400 - 16 = -236, clamped
        assert_eq!(bytes.back, 255); // 180 + 200 - 8 = 372, clamped
    }

    proptest! {
        // Everything with a reach comfortably inside (0, 2 * arm_length)
        // must solve, and the elbow angle stays in the first quadrant.
        #[test]
        fn interior_targets_solve(y in 4.5f32..30.0, z in 0.0f32..20.0) {
            let angles = default_config().solve(Point::new(0.0, y, z)).unwrap();
            let elbow = (angles.front + angles.back).radians / 2.0;
            assert!((0.0..=core::f32::consts::FRAC_PI_2).contains(&elbow));
        }

        // Targets past full extension must fail cleanly, whatever the
        // direction: with y >= 50 the reach is at least 46 > 2 * 20.
        #[test]
        fn exterior_targets_fail(x in -80.0f32..80.0, y in 50.0f32..90.0) {
            assert!(default_config().solve(Point::new(x, y, 0.0)).is_err());
        }
    }
}
