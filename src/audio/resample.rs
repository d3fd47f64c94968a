//! Sample-rate conversion between device rates and the codec rate

/// Linear-interpolation resampler for mono f32 audio
///
/// Output length is `round(input.len() * to_rate / from_rate)`.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return input.to_vec();
    }

    let out_len = ((input.len() as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx >= last {
                return input[last];
            }
            let frac = (pos - idx as f64) as f32;
            input[idx] + (input[idx + 1] - input[idx]) * frac
        })
        .collect()
}

/// Samples needed at `device_rate` to cover `codec_frame` samples at `codec_rate`
pub fn frame_size_for_rate(codec_frame: usize, device_rate: u32, codec_rate: u32) -> usize {
    (codec_frame as u64 * device_rate as u64 / codec_rate as u64) as usize
}

/// Average interleaved frames down to mono
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 48000, 48000), input);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(&[], 44100, 48000).is_empty());
    }

    #[test]
    fn test_frame_lengths() {
        // One 10 ms frame at common device rates lands on 480 codec samples
        for rate in [8000u32, 16000, 44100, 48000, 96000] {
            let frame = frame_size_for_rate(480, rate, 48000);
            let out = resample(&vec![0.0; frame], rate, 48000);
            assert_eq!(out.len(), 480, "rate {}", rate);
        }

        assert_eq!(resample(&vec![0.0; 480], 48000, 44100).len(), 441);
    }

    #[test]
    fn test_interpolates_ramp() {
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let out = resample(&input, 1000, 2000);
        assert_eq!(out.len(), 20);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[4] - 2.0).abs() < 1e-6);
        // Tail holds the last sample instead of reading past the end
        assert_eq!(*out.last().unwrap(), 9.0);
    }

    #[test]
    fn test_downmix() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix_to_mono(&[0.3], 1), vec![0.3]);
    }
}
