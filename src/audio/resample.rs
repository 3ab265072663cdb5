//! Sample-rate conversion with 16-bit quantization.
//!
//! Converts normalized `f32` samples at the device rate into `i16` PCM at the
//! session's target rate. Downsampling uses box-filter decimation: every
//! output sample is the mean of the input samples that fall into its window.
//! There is no interpolation, so upsampling leaves gaps of zeros; speech
//! capture only ever downsamples.

/// Clamps a normalized sample to [-1.0, 1.0] and scales it to the `i16` range.
///
/// Negative values scale by 32768 and non-negative values by 32767 so both
/// ends of the two's-complement range are reachable. The cast truncates
/// toward zero.
pub fn quantize(sample: f64) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Resamples `samples` from `rate_in` to `rate_out` and quantizes to `i16`.
///
/// Equal rates quantize sample-for-sample. Otherwise the output holds
/// `round(len / (rate_in / rate_out))` samples, each the average of its input
/// window `[offset, round((i + 1) * ratio))` clipped to the input. A window
/// left empty by rounding averages to zero.
///
/// Callers are expected to pass finite, positive rates; the session checks
/// frames before they reach this function.
pub fn resample(samples: &[f32], rate_in: f64, rate_out: f64) -> Vec<i16> {
    if rate_in == rate_out {
        return samples.iter().map(|&s| quantize(s as f64)).collect();
    }

    let ratio = rate_in / rate_out;
    let out_len = output_len(samples.len(), ratio);
    let mut result = Vec::with_capacity(out_len);
    let mut offset = 0usize;

    for i in 0..out_len {
        let next = (((i + 1) as f64) * ratio).round() as usize;
        let window = samples.get(offset..next.min(samples.len())).unwrap_or(&[]);

        let sum: f64 = window.iter().map(|&s| s as f64).sum();
        let count = window.len().max(1);
        result.push(quantize(sum / count as f64));

        offset = next;
    }

    result
}

/// Number of output samples produced for `input_len` samples at `ratio`.
pub fn output_len(input_len: usize, ratio: f64) -> usize {
    let len = (input_len as f64 / ratio).round();
    if len.is_finite() && len > 0.0 {
        len as usize
    } else {
        0
    }
}
