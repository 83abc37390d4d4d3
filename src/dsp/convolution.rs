//! Linear convolution
//!
//! Two implementations of the same operation:
//! - [`convolve`]: whole-buffer FFT convolution for offline rendering.
//! - [`PartitionedConvolver`]: uniformly-partitioned overlap-add for
//!   block-by-block live rendering with no added latency.
//!
//! Both accumulate in f64 so their outputs agree to well under 1e-4.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Below this length (of either operand) direct convolution is cheaper
const DIRECT_THRESHOLD: usize = 64;

/// Full linear convolution, `signal.len() + kernel.len() - 1` samples long
///
/// Returns an empty vector if either input is empty.
///
/// # Example
/// ```
/// use reverie::dsp::convolution::convolve;
///
/// let out = convolve(&[1.0, 2.0], &[1.0, 0.5]);
/// assert_eq!(out, vec![1.0, 2.5, 1.0]);
/// ```
pub fn convolve(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    if signal.is_empty() || kernel.is_empty() {
        return Vec::new();
    }
    if signal.len().min(kernel.len()) <= DIRECT_THRESHOLD {
        return convolve_direct(signal, kernel);
    }

    let out_len = signal.len() + kernel.len() - 1;
    let fft_size = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_size);
    let inverse = planner.plan_fft_inverse(fft_size);

    let mut signal_fft = to_complex(signal, fft_size);
    let mut kernel_fft = to_complex(kernel, fft_size);
    forward.process(&mut signal_fft);
    forward.process(&mut kernel_fft);

    for (s, k) in signal_fft.iter_mut().zip(kernel_fft.iter()) {
        *s *= *k;
    }
    inverse.process(&mut signal_fft);

    let scale = 1.0 / fft_size as f64;
    signal_fft[..out_len]
        .iter()
        .map(|c| (c.re * scale) as f32)
        .collect()
}

/// Time-domain convolution for short operands
fn convolve_direct(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0_f64; signal.len() + kernel.len() - 1];
    for (i, &s) in signal.iter().enumerate() {
        for (j, &k) in kernel.iter().enumerate() {
            out[i + j] += s as f64 * k as f64;
        }
    }
    out.into_iter().map(|v| v as f32).collect()
}

fn to_complex(samples: &[f32], size: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); size];
    for (dst, &src) in out.iter_mut().zip(samples) {
        dst.re = src as f64;
    }
    out
}

// ============================================================================
// Partitioned Convolver
// ============================================================================

/// Streaming convolver using uniformly-partitioned overlap-add
///
/// The kernel is split into partitions of `block` samples, each
/// transformed once with a `2 * block` FFT. Every call to
/// [`process_block`](Self::process_block) transforms one input block,
/// multiplies it against the spectra of the previous input blocks, and
/// carries the second half of the result into the next block. Output is
/// sample-aligned with the input.
pub struct PartitionedConvolver {
    block: usize,
    fft_size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    /// Kernel partition spectra, oldest input pairs with the last partition
    partitions: Vec<Vec<Complex<f64>>>,
    /// Ring of input block spectra, `head` is the newest
    history: Vec<Vec<Complex<f64>>>,
    head: usize,
    overlap: Vec<f64>,
    work: Vec<Complex<f64>>,
    accum: Vec<Complex<f64>>,
    fft_scratch: Vec<Complex<f64>>,
}

impl PartitionedConvolver {
    /// Prepare a convolver for `kernel` processing `block` samples per call
    ///
    /// An empty kernel behaves as a single zero tap.
    pub fn new(kernel: &[f32], block: usize) -> Self {
        let block = block.max(1);
        let fft_size = 2 * block;

        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let mut fft_scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let partition_count = kernel.len().div_ceil(block).max(1);
        let mut partitions = Vec::with_capacity(partition_count);
        for p in 0..partition_count {
            let start = (p * block).min(kernel.len());
            let end = ((p + 1) * block).min(kernel.len());
            let mut spectrum = to_complex(&kernel[start..end], fft_size);
            forward.process_with_scratch(&mut spectrum, &mut fft_scratch);
            partitions.push(spectrum);
        }

        Self {
            block,
            fft_size,
            forward,
            inverse,
            history: vec![vec![Complex::new(0.0, 0.0); fft_size]; partition_count],
            partitions,
            head: 0,
            overlap: vec![0.0; block],
            work: vec![Complex::new(0.0, 0.0); fft_size],
            accum: vec![Complex::new(0.0, 0.0); fft_size],
            fft_scratch,
        }
    }

    /// Samples consumed and produced per call
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Convolve one block
    ///
    /// `input` and `output` must both be `block_size()` long; `output` is
    /// overwritten with the wet signal.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.block);
        debug_assert_eq!(output.len(), self.block);

        let count = self.partitions.len();
        self.head = (self.head + 1) % count;

        let spectrum = &mut self.history[self.head];
        for (i, slot) in spectrum.iter_mut().enumerate() {
            let value = if i < self.block {
                input.get(i).copied().unwrap_or(0.0) as f64
            } else {
                0.0
            };
            *slot = Complex::new(value, 0.0);
        }
        self.forward
            .process_with_scratch(spectrum, &mut self.fft_scratch);

        self.accum.fill(Complex::new(0.0, 0.0));
        for (p, partition) in self.partitions.iter().enumerate() {
            let past = &self.history[(self.head + count - p) % count];
            for ((acc, x), h) in self.accum.iter_mut().zip(past).zip(partition) {
                *acc += *x * *h;
            }
        }

        self.work.copy_from_slice(&self.accum);
        self.inverse
            .process_with_scratch(&mut self.work, &mut self.fft_scratch);

        let scale = 1.0 / self.fft_size as f64;
        for i in 0..self.block {
            let value = self.work[i].re * scale + self.overlap[i];
            if let Some(out) = output.get_mut(i) {
                *out = value as f32;
            }
            self.overlap[i] = self.work[self.block + i].re * scale;
        }
    }

    /// Clear input history and the carried tail
    pub fn reset(&mut self) {
        for spectrum in self.history.iter_mut() {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.overlap.fill(0.0);
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(rng: &mut StdRng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn stream(convolver: &mut PartitionedConvolver, signal: &[f32], total: usize) -> Vec<f32> {
        let block = convolver.block_size();
        let mut out = Vec::with_capacity(total);
        let mut input = vec![0.0; block];
        let mut output = vec![0.0; block];
        let mut pos = 0;
        while out.len() < total {
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = signal.get(pos + i).copied().unwrap_or(0.0);
            }
            convolver.process_block(&input, &mut output);
            out.extend_from_slice(&output);
            pos += block;
        }
        out.truncate(total);
        out
    }

    #[test]
    fn test_identity_kernel() {
        let signal: Vec<f32> = (0..200).map(|i| (i as f32 * 0.1).sin()).collect();
        let out = convolve(&signal, &[1.0]);
        assert_eq!(out, signal);
    }

    #[test]
    fn test_fft_matches_direct() {
        let mut rng = StdRng::seed_from_u64(11);
        let signal = noise(&mut rng, 500);
        let kernel = noise(&mut rng, 300);

        let fast = convolve(&signal, &kernel);
        let slow = convolve_direct(&signal, &kernel);
        assert_eq!(fast.len(), 799);
        for (a, b) in fast.iter().zip(&slow) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_empty_inputs() {
        assert!(convolve(&[], &[1.0]).is_empty());
        assert!(convolve(&[1.0], &[]).is_empty());
    }

    #[test]
    fn test_partitioned_matches_offline() {
        let mut rng = StdRng::seed_from_u64(5);
        let signal = noise(&mut rng, 1000);
        let kernel = noise(&mut rng, 333);
        let expected = convolve(&signal, &kernel);

        for block in [1, 16, 128, 500] {
            let mut convolver = PartitionedConvolver::new(&kernel, block);
            let streamed = stream(&mut convolver, &signal, expected.len());
            for (i, (a, b)) in streamed.iter().zip(&expected).enumerate() {
                assert!(
                    (a - b).abs() < 1e-4,
                    "block {} frame {}: {} vs {}",
                    block,
                    i,
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_partitioned_impulse_is_delay_free() {
        let mut convolver = PartitionedConvolver::new(&[0.5, 0.25], 4);
        let mut output = vec![0.0; 4];
        convolver.process_block(&[1.0, 0.0, 0.0, 0.0], &mut output);
        for (a, b) in output.iter().zip([0.5, 0.25, 0.0, 0.0]) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_partitioned_reset() {
        let mut convolver = PartitionedConvolver::new(&[1.0, 1.0, 1.0, 1.0, 1.0], 2);
        let mut output = vec![0.0; 2];
        convolver.process_block(&[1.0, 1.0], &mut output);
        convolver.reset();
        convolver.process_block(&[0.0, 0.0], &mut output);
        assert!(output.iter().all(|s| s.abs() < 1e-9));
    }
}
