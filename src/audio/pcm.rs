//! Conversion between normalized f32 samples and wire PCM bytes

use crate::config::SampleEncoding;

/// Encode samples into `out`, returning the number of bytes written.
///
/// Stops early if `out` cannot hold another whole sample.
pub fn encode_samples(samples: &[f32], encoding: SampleEncoding, out: &mut [u8]) -> usize {
    let width = encoding.bytes_per_sample();
    let count = samples.len().min(out.len() / width);

    for (sample, chunk) in samples[..count].iter().zip(out.chunks_exact_mut(width)) {
        let sample = sample.clamp(-1.0, 1.0);
        match encoding {
            SampleEncoding::U8 => {
                chunk[0] = ((sample * 127.5) + 127.5).round() as u8;
            }
            SampleEncoding::I16 => {
                let value = (sample * i16::MAX as f32).round() as i16;
                chunk.copy_from_slice(&value.to_le_bytes());
            }
            SampleEncoding::F32 => {
                chunk.copy_from_slice(&sample.to_le_bytes());
            }
        }
    }
    count * width
}

/// Decode whole samples from `bytes`, appending to `out`.
///
/// Returns the number of bytes consumed; a trailing partial sample is left
/// for the caller to carry into the next call.
pub fn decode_samples(bytes: &[u8], encoding: SampleEncoding, out: &mut Vec<f32>) -> usize {
    let width = encoding.bytes_per_sample();
    let chunks = bytes.chunks_exact(width);
    let consumed = bytes.len() - chunks.remainder().len();

    out.reserve(consumed / width);
    for chunk in chunks {
        let sample = match encoding {
            SampleEncoding::U8 => (chunk[0] as f32 - 127.5) / 127.5,
            SampleEncoding::I16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32,
            SampleEncoding::F32 => {
                let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                if value.is_nan() { 0.0 } else { value }
            }
        };
        out.push(sample.clamp(-1.0, 1.0));
    }
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_i16_encoding_clamps() {
        let mut out = [0u8; 6];
        let written = encode_samples(&[2.0, -2.0, 0.0], SampleEncoding::I16, &mut out);
        assert_eq!(written, 6);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), 0);
    }

    #[test]
    fn test_u8_silence_is_midpoint() {
        let mut out = [0u8; 1];
        encode_samples(&[0.0], SampleEncoding::U8, &mut out);
        assert_eq!(out[0], 128);
    }

    #[test]
    fn test_encode_stops_at_output_capacity() {
        let mut out = [0u8; 5];
        assert_eq!(encode_samples(&[0.1; 4], SampleEncoding::I16, &mut out), 4);
    }

    #[test]
    fn test_decode_leaves_partial_sample() {
        let mut out = Vec::new();
        let bytes = [0x00, 0x40, 0xff];
        assert_eq!(decode_samples(&bytes, SampleEncoding::I16, &mut out), 2);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.5).abs() < 0.001);
    }

    proptest! {
        #[test]
        fn prop_i16_conversion_is_close(samples in prop::collection::vec(-1.0f32..=1.0, 0..256)) {
            let mut bytes = vec![0u8; samples.len() * 2];
            let written = encode_samples(&samples, SampleEncoding::I16, &mut bytes);
            prop_assert_eq!(written, bytes.len());

            let mut decoded = Vec::new();
            decode_samples(&bytes, SampleEncoding::I16, &mut decoded);
            for (a, b) in samples.iter().zip(&decoded) {
                prop_assert!((a - b).abs() < 1.0 / 16000.0);
            }
        }

        #[test]
        fn prop_decoded_samples_are_normalized(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            for encoding in [SampleEncoding::U8, SampleEncoding::I16] {
                let mut decoded = Vec::new();
                decode_samples(&bytes, encoding, &mut decoded);
                prop_assert!(decoded.iter().all(|s| (-1.0..=1.0).contains(s)));
            }
        }
    }
}
