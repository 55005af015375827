// ============================================================
//  dsp.rs — Traitement du signal audio
//
//  - Tampon circulaire du signal temporel (fenêtre d'analyse)
//  - Analyseur spectral : Hann + rustfft, lissage, dB → octets
//  - Pics pour le tracé des formes d'onde
//  - Mise en forme de la durée d'enregistrement
// ============================================================

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_FFT_SIZE: usize = 2_048;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

// ─── Tampon temporel ─────────────────────────────────────────────────────────

/// Les `capacity` derniers échantillons mono reçus.
pub struct TimeDomainBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl TimeDomainBuffer {
    pub fn new(capacity: usize) -> Self {
        TimeDomainBuffer {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, data: &[f32]) {
        // Seule la fin d'un bloc plus long que la fenêtre compte
        let start = data.len().saturating_sub(self.capacity);
        for &s in &data[start..] {
            if self.samples.len() == self.capacity {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
    }

    /// Copie la fenêtre la plus récente dans `out` (zéros en tête tant que
    /// le tampon n'est pas plein).
    pub fn latest(&self, out: &mut [f32]) {
        let n = out.len().min(self.samples.len());
        let pad = out.len() - n;
        out[..pad].fill(0.0);
        let skip = self.samples.len() - n;
        for (dst, &src) in out[pad..].iter_mut().zip(self.samples.iter().skip(skip)) {
            *dst = src;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ─── Analyseur spectral ──────────────────────────────────────────────────────

/// Spectre en octets à la manière d'un nœud d'analyse Web Audio :
/// `fft_size / 2` bins, magnitudes lissées dans le temps puis projetées
/// de `[min_db, max_db]` sur `0..=255`.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32, min_db: f32, max_db: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        SpectrumAnalyser {
            fft,
            window: hann_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing: smoothing.clamp(0.0, 1.0),
            min_db,
            max_db,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// `samples` : une fenêtre de `fft_size` échantillons.
    /// `out` : `bin_count()` octets.
    pub fn byte_frequency_data(&mut self, samples: &[f32], out: &mut [u8]) {
        let n = self.fft_size();
        debug_assert_eq!(samples.len(), n);
        debug_assert_eq!(out.len(), self.bin_count());

        for ((c, &s), &w) in self.scratch.iter_mut().zip(samples).zip(&self.window) {
            *c = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.smoothing;
        let range = self.max_db - self.min_db;
        for (k, byte) in out.iter_mut().enumerate() {
            let mag = self.scratch[k].norm() / n as f32;
            let s = tau * self.smoothed[k] + (1.0 - tau) * mag;
            // NaN/inf (signal corrompu) : on repart de zéro
            self.smoothed[k] = if s.is_finite() { s } else { 0.0 };

            let db = if self.smoothed[k] > 0.0 {
                20.0 * self.smoothed[k].log10()
            } else {
                f32::NEG_INFINITY
            };
            let scaled = 255.0 * (db - self.min_db) / range;
            *byte = scaled.floor().clamp(0.0, 255.0) as u8;
        }
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1) as f32).cos()))
        .collect()
}

// ─── Formes d'onde ───────────────────────────────────────────────────────────

/// Pic absolu par tranche ; `buckets` tranches de largeur égale.
pub fn peaks(samples: &[f32], buckets: usize) -> Vec<f32> {
    if buckets == 0 {
        return Vec::new();
    }
    if samples.is_empty() {
        return vec![0.0; buckets];
    }
    (0..buckets)
        .map(|b| {
            let start = b * samples.len() / buckets;
            let end = ((b + 1) * samples.len() / buckets).max(start + 1).min(samples.len());
            samples[start..end]
                .iter()
                .fold(0.0f32, |m, s| m.max(s.abs()))
        })
        .collect()
}

/// Mixage multicanal → mono.
pub fn downmix(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().sum::<f32>() / frame.len() as f32
}

// ─── Durée ───────────────────────────────────────────────────────────────────

/// `MM:SS`, minutes modulo 60.
pub fn format_progress(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    format!("{:02}:{:02}", minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn buffer_keeps_only_the_latest_window() {
        let mut buf = TimeDomainBuffer::new(4);
        buf.push(&[1.0, 2.0]);
        let mut out = [9.0; 4];
        buf.latest(&mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);

        buf.push(&[3.0, 4.0, 5.0]);
        buf.latest(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);

        buf.push(&[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        buf.latest(&mut out);
        assert_eq!(out, [8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn silence_gives_all_zero_bytes() {
        let mut an = SpectrumAnalyser::new(256, 0.8, DEFAULT_MIN_DB, DEFAULT_MAX_DB);
        let mut out = vec![7u8; an.bin_count()];
        an.byte_frequency_data(&vec![0.0; 256], &mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        // 1500 Hz à 48 kHz sur 1024 points : bin 32 exactement
        let mut an = SpectrumAnalyser::new(1024, 0.0, -100.0, 0.0);
        let mut out = vec![0u8; an.bin_count()];
        an.byte_frequency_data(&sine(1500.0, 48_000.0, 1024), &mut out);

        let est = crate::estimator::compute_once(&out, 48_000.0);
        assert_eq!(est.dominant_hz, 1500.0);
        assert!(!est.is_low);
    }

    #[test]
    fn smoothing_lags_behind_a_new_signal() {
        let sig = sine(1500.0, 48_000.0, 1024);
        let mut fast = SpectrumAnalyser::new(1024, 0.0, -100.0, 0.0);
        let mut slow = SpectrumAnalyser::new(1024, 0.9, -100.0, 0.0);
        let mut a = vec![0u8; 512];
        let mut b = vec![0u8; 512];
        fast.byte_frequency_data(&sig, &mut a);
        slow.byte_frequency_data(&sig, &mut b);
        assert!(b[32] < a[32]);
    }

    #[test]
    fn peaks_cover_every_sample() {
        let samples = [0.1, -0.9, 0.2, 0.3, -0.4, 0.05];
        assert_eq!(peaks(&samples, 3), vec![0.9, 0.3, 0.4]);
        assert_eq!(peaks(&samples, 1), vec![0.9]);
        assert_eq!(peaks(&[], 2), vec![0.0, 0.0]);
        // Plus de tranches que d'échantillons
        assert_eq!(peaks(&[0.5, -0.25], 4).len(), 4);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[0.5, -0.5]), 0.0);
        assert!((downmix(&[0.2, 0.4, 0.6]) - 0.4).abs() < 1e-6);
        assert_eq!(downmix(&[]), 0.0);
    }

    #[test]
    fn progress_is_minutes_and_seconds() {
        assert_eq!(format_progress(Duration::from_millis(0)), "00:00");
        assert_eq!(format_progress(Duration::from_millis(65_400)), "01:05");
        assert_eq!(format_progress(Duration::from_secs(3_600 + 125)), "02:05");
    }
}
