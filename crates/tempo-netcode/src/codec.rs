//! Fixed-point wire codec
//!
//! Floats are multiplied by a scale, rounded, and saturated into a signed
//! integer. Decoding divides by the same scale, so the round-trip error of an
//! in-range value is at most `0.5 / scale`. Values outside the representable
//! range clamp to the integer limits instead of wrapping.

use tempo_core::{Quat, Vec2, Vec3};

/// Fixed scale for quaternion components
pub const QUAT_SCALE: f32 = 10_000.0;

/// Default scale for positions: roughly +/-256 world units in an i16
pub const POSITION_SCALE: f32 = i16::MAX as f32 / 256.0;

/// Default scale for velocities: roughly +/-64 units per second in an i16
pub const VELOCITY_SCALE: f32 = i16::MAX as f32 / 64.0;

/// A signed integer a float can be quantized into
pub trait Quantized: Copy {
    /// Smallest representable value as a float
    const MIN: f32;
    /// Largest representable value as a float
    const MAX: f32;

    /// Convert an already rounded and clamped value
    fn from_clamped(value: f32) -> Self;

    /// Widen back to a float
    fn to_f32(self) -> f32;
}

macro_rules! impl_quantized {
    ($($ty:ty),*) => {
        $(
            impl Quantized for $ty {
                const MIN: f32 = <$ty>::MIN as f32;
                const MAX: f32 = <$ty>::MAX as f32;

                fn from_clamped(value: f32) -> Self {
                    value as $ty
                }

                fn to_f32(self) -> f32 {
                    self as f32
                }
            }
        )*
    };
}

impl_quantized!(i8, i16, i32);

/// Quantize a float, saturating at the integer limits
///
/// NaN encodes as zero.
pub fn compress<Q: Quantized>(value: f32, scale: f32) -> Q {
    if value.is_nan() {
        return Q::from_clamped(0.0);
    }
    Q::from_clamped((value * scale).round().clamp(Q::MIN, Q::MAX))
}

/// Inverse of [`compress`]
pub fn decompress<Q: Quantized>(value: Q, scale: f32) -> f32 {
    value.to_f32() / scale
}

pub fn compress_vec2<Q: Quantized>(v: Vec2, scale: f32) -> [Q; 2] {
    [compress(v.x, scale), compress(v.y, scale)]
}

pub fn decompress_vec2<Q: Quantized>(v: [Q; 2], scale: f32) -> Vec2 {
    Vec2::new(decompress(v[0], scale), decompress(v[1], scale))
}

pub fn compress_vec3<Q: Quantized>(v: Vec3, scale: f32) -> [Q; 3] {
    [
        compress(v.x, scale),
        compress(v.y, scale),
        compress(v.z, scale),
    ]
}

pub fn decompress_vec3<Q: Quantized>(v: [Q; 3], scale: f32) -> Vec3 {
    Vec3::new(
        decompress(v[0], scale),
        decompress(v[1], scale),
        decompress(v[2], scale),
    )
}

/// Pack a rotation as four `i16` at [`QUAT_SCALE`]
///
/// Components of a unit quaternion lie in `-1..=1`, well inside the range.
pub fn compress_quat(q: Quat) -> [i16; 4] {
    [
        compress(q.w, QUAT_SCALE),
        compress(q.x, QUAT_SCALE),
        compress(q.y, QUAT_SCALE),
        compress(q.z, QUAT_SCALE),
    ]
}

/// Unpack a rotation
///
/// Not renormalized: each component stays within `0.5 / QUAT_SCALE` of what
/// was packed, and the result is within the same bound of unit length.
pub fn decompress_quat(q: [i16; 4]) -> Quat {
    Quat::from_xyzw(
        decompress(q[1], QUAT_SCALE),
        decompress(q[2], QUAT_SCALE),
        decompress(q[3], QUAT_SCALE),
        decompress(q[0], QUAT_SCALE),
    )
}
