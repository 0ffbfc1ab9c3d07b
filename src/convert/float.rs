//! Float-to-float kernels.

use super::convert_channels;
use crate::buffer::BufferView;
use crate::format::{AudioFormat, FormatFlags};

/// Widens 32-bit floats, gathering across the interleave stride. Swapped
/// input is reinterpreted through its 32-bit integer bytes first.
pub(super) fn from_f32(
    source: &AudioFormat,
    input: &[BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    let big_endian = source.flags.contains(FormatFlags::BIG_ENDIAN);

    convert_channels(input, output, frames, |data, channel, stride, out| {
        let samples = data.chunks_exact(4).skip(channel).step_by(stride);
        for (raw, out) in samples.zip(out.iter_mut()) {
            let bytes = [raw[0], raw[1], raw[2], raw[3]];
            let bits = if big_endian {
                u32::from_be_bytes(bytes)
            } else {
                u32::from_le_bytes(bytes)
            };
            *out = f64::from(f32::from_bits(bits));
        }
    });
}

/// Copies 64-bit floats, gathering across the interleave stride. Swapped
/// input is reinterpreted through its 64-bit integer bytes first.
pub(super) fn from_f64(
    source: &AudioFormat,
    input: &[BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    let big_endian = source.flags.contains(FormatFlags::BIG_ENDIAN);

    convert_channels(input, output, frames, |data, channel, stride, out| {
        let samples = data.chunks_exact(8).skip(channel).step_by(stride);
        for (raw, out) in samples.zip(out.iter_mut()) {
            let bytes = [
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ];
            let bits = if big_endian {
                u64::from_be_bytes(bytes)
            } else {
                u64::from_le_bytes(bytes)
            };
            *out = f64::from_bits(bits);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::super::testing::{float, run};

    #[test]
    fn test_f32_native_widens() {
        let values = [0.5f32, -0.25, 1.0, -1.0];
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let channels = run(float(32, 1, false), &mut bytes, 4);
        for (expected, actual) in values.iter().zip(&channels[0]) {
            assert_eq!(*actual, f64::from(*expected));
        }
    }

    #[test]
    fn test_f32_deinterleaves_stereo() {
        // Interleaved L/R pairs.
        let frames = [(0.1f32, -0.1f32), (0.2, -0.2), (0.3, -0.3)];
        let mut bytes = Vec::new();
        for (left, right) in frames {
            bytes.extend_from_slice(&left.to_le_bytes());
            bytes.extend_from_slice(&right.to_le_bytes());
        }

        let channels = run(float(32, 2, false), &mut bytes, 3);
        assert_eq!(channels[0], vec![f64::from(0.1f32), f64::from(0.2f32), f64::from(0.3f32)]);
        assert_eq!(
            channels[1],
            vec![f64::from(-0.1f32), f64::from(-0.2f32), f64::from(-0.3f32)]
        );
    }

    #[test]
    fn test_f32_byte_swap_symmetry() {
        let values = [0.5f32, -0.75, 0.125];
        let mut little = Vec::new();
        let mut big = Vec::new();
        for value in values {
            little.extend_from_slice(&value.to_le_bytes());
            big.extend_from_slice(&value.to_be_bytes());
        }

        let from_little = run(float(32, 1, false), &mut little, 3);
        let from_big = run(float(32, 1, true), &mut big, 3);
        assert_eq!(from_little, from_big);
    }

    #[test]
    fn test_f64_round_trip_is_byte_exact() {
        let values = [0.123456789f64, -0.987654321, 1.0 - f64::EPSILON, -1.0];
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let channels = run(float(64, 1, false), &mut bytes, 4);
        for (expected, actual) in values.iter().zip(&channels[0]) {
            assert_eq!(expected.to_bits(), actual.to_bits());
        }
    }

    #[test]
    fn test_f64_swapped_round_trip_is_byte_exact() {
        let values = [0.25f64, -0.5, 0.75];
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(&value.to_be_bytes());
        }

        let channels = run(float(64, 1, true), &mut bytes, 3);
        for (expected, actual) in values.iter().zip(&channels[0]) {
            assert_eq!(expected.to_bits(), actual.to_bits());
        }
    }
}
