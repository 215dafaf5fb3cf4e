//! Edge windowing, accumulation and saturation

use crate::protocol::StreamPosition;

/// Triangular edge window for pop suppression.
///
/// `Start` ramps 0.0 → 1.0 and `End` ramps 1.0 → 0.0 across `len`
/// samples, hitting both endpoints exactly.
#[inline]
pub fn window(position: StreamPosition, index: usize, len: usize) -> f32 {
    if len <= 1 {
        return match position {
            StreamPosition::None => 0.0,
            _ => 1.0,
        };
    }
    let last = (len - 1) as f32;
    match position {
        StreamPosition::None => 0.0,
        StreamPosition::Middle => 1.0,
        StreamPosition::Start => index as f32 / last,
        StreamPosition::End => (last - index as f32) / last,
    }
}

/// Add `samples × gain × window` into the accumulator.
///
/// Each contribution is truncated to an integer before it is summed, so
/// the accumulated result does not depend on the order clients are mixed in.
pub fn accumulate(acc: &mut [i32], samples: &[i16], gain: f32, position: StreamPosition) {
    accumulate_interleaved(acc, samples, gain, position, 1);
}

/// Multi-channel variant: the window advances per frame, not per sample.
pub fn accumulate_interleaved(
    acc: &mut [i32],
    samples: &[i16],
    gain: f32,
    position: StreamPosition,
    channels: usize,
) {
    if !position.is_active() {
        return;
    }
    let channels = channels.max(1);
    let frames = acc.len().min(samples.len()) / channels;

    for frame in 0..frames {
        let w = window(position, frame, frames);
        let base = frame * channels;
        for ch in 0..channels {
            let contribution = (samples[base + ch] as f32 * gain * w) as i32;
            acc[base + ch] = acc[base + ch].saturating_add(contribution);
        }
    }
}

/// Clamp a 32-bit accumulator value into the i16 range
#[inline]
pub fn saturate(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Saturate a whole accumulator into `out`
pub fn saturate_into(acc: &[i32], out: &mut [i16]) {
    for (dst, &value) in out.iter_mut().zip(acc) {
        *dst = saturate(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_window_shapes() {
        let n = 512;
        for i in 0..n {
            assert_eq!(window(StreamPosition::Middle, i, n), 1.0);
        }
        assert_eq!(window(StreamPosition::Start, 0, n), 0.0);
        assert_eq!(window(StreamPosition::Start, n - 1, n), 1.0);
        assert_eq!(window(StreamPosition::End, 0, n), 1.0);
        assert_eq!(window(StreamPosition::End, n - 1, n), 0.0);
        assert_eq!(window(StreamPosition::None, 10, n), 0.0);
    }

    #[test]
    fn test_window_single_sample_period() {
        assert_eq!(window(StreamPosition::Start, 0, 1), 1.0);
        assert_eq!(window(StreamPosition::End, 0, 1), 1.0);
    }

    #[test]
    fn test_saturation_boundaries() {
        assert_eq!(saturate(32767), 32767);
        assert_eq!(saturate(-32768), -32768);
        assert_eq!(saturate(32768), 32767);
        assert_eq!(saturate(-32769), -32768);
        assert_eq!(saturate(40000), 32767);
        assert_eq!(saturate(i32::MAX), 32767);
        assert_eq!(saturate(i32::MIN), -32768);
    }

    #[test]
    fn test_two_loud_clients_saturate() {
        let mut acc = vec![0i32; 512];
        let loud = vec![20000i16; 512];
        accumulate(&mut acc, &loud, 1.0, StreamPosition::Middle);
        accumulate(&mut acc, &loud, 1.0, StreamPosition::Middle);
        assert!(acc.iter().all(|&v| v == 40000));

        let mut out = vec![0i16; 512];
        saturate_into(&acc, &mut out);
        assert!(out.iter().all(|&v| v == i16::MAX));
    }

    #[test]
    fn test_stereo_window_is_per_frame() {
        let mut acc = vec![0i32; 6];
        accumulate_interleaved(&mut acc, &[100; 6], 1.0, StreamPosition::Start, 2);
        assert_eq!(acc, vec![0, 0, 50, 50, 100, 100]);
    }

    /// Bit-inspection saturation of the original design, kept as an oracle
    fn saturate_by_high_bits(value: i32) -> i16 {
        let high = (value as u32) >> 15;
        if high == 0x0001_FFFF || high == 0 {
            value as i16
        } else if high & 0x1_0000 != 0 {
            i16::MIN
        } else {
            i16::MAX
        }
    }

    proptest! {
        #[test]
        fn prop_saturate_matches_high_bit_check(value in any::<i32>()) {
            prop_assert_eq!(saturate(value), saturate_by_high_bits(value));
        }

        #[test]
        fn prop_in_range_values_pass_through(value in -32768i32..=32767) {
            prop_assert_eq!(saturate(value) as i32, value);
        }

        #[test]
        fn prop_window_bounded(index in 0usize..1024, len in 1usize..1024) {
            let index = index % len;
            for position in [StreamPosition::Start, StreamPosition::Middle, StreamPosition::End] {
                let w = window(position, index, len);
                prop_assert!((0.0..=1.0).contains(&w));
            }
        }

        #[test]
        fn prop_mixing_is_order_independent(
            a in prop::collection::vec(any::<i16>(), 64),
            b in prop::collection::vec(any::<i16>(), 64),
            gain_a in 0.0f32..2.0,
            gain_b in 0.0f32..2.0,
        ) {
            let mut ab = vec![0i32; 64];
            accumulate(&mut ab, &a, gain_a, StreamPosition::Start);
            accumulate(&mut ab, &b, gain_b, StreamPosition::End);

            let mut ba = vec![0i32; 64];
            accumulate(&mut ba, &b, gain_b, StreamPosition::End);
            accumulate(&mut ba, &a, gain_a, StreamPosition::Start);

            let mut only_a = vec![0i32; 64];
            accumulate(&mut only_a, &a, gain_a, StreamPosition::Start);
            let mut only_b = vec![0i32; 64];
            accumulate(&mut only_b, &b, gain_b, StreamPosition::End);
            let summed: Vec<i32> = only_a.iter().zip(&only_b).map(|(x, y)| x + y).collect();

            prop_assert_eq!(&ab, &ba);
            prop_assert_eq!(&ab, &summed);
        }
    }
}
