// ============================================================
//  estimator.rs — Estimation de la fréquence dominante
//
//  - Échantillonne le spectre live toutes les 100 ms
//  - Bin de magnitude maximale → fréquence en Hz
//  - Alerte « fréquence basse » sous 250 Hz
// ============================================================

use std::sync::{
    mpsc::{self, RecvTimeoutError},
    Arc, RwLock,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const SAMPLING_PERIOD: Duration = Duration::from_millis(100);
pub const LOW_FREQUENCY_HZ: f64 = 250.0;

/// Fournisseur d'instantanés de spectre (magnitudes par bin).
///
/// `bin_count()` est constant pendant une session ; `fill_snapshot` écrit
/// exactement `bin_count()` valeurs dans `out`.
pub trait SpectrumSource: Send + Sync {
    fn bin_count(&self) -> usize;
    fn fill_snapshot(&self, out: &mut [u8]);
}

/// Résultat d'un calcul ponctuel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub dominant_hz: f64,
    pub is_low: bool,
}

/// Paire publiée vers l'UI : `(None, false)` tant qu'aucun tick n'a eu lieu.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub dominant_hz: Option<f64>,
    pub is_low: bool,
}

impl From<Estimate> for Reading {
    fn from(e: Estimate) -> Self {
        Reading { dominant_hz: Some(e.dominant_hz), is_low: e.is_low }
    }
}

// ─── Calcul pur ───────────────────────────────────────────────────────────────

/// Cherche le bin le plus fort et le convertit en Hz.
///
/// Le spectre est supposé être la moitié positive d'une transformée réelle
/// de `2 * N` points : `f = i * sample_rate / (2 * N)`. À magnitude égale,
/// le bin d'indice le plus bas l'emporte (un silence complet donne donc 0 Hz).
///
/// # Panics
///
/// Panique si `snapshot` est vide : une session active a toujours N > 0.
pub fn compute_once<T: Copy + PartialOrd>(snapshot: &[T], sample_rate: f64) -> Estimate {
    assert!(!snapshot.is_empty(), "spectre vide : N doit être > 0");

    let mut max_index = 0usize;
    let mut max_value = snapshot[0];
    for (i, &v) in snapshot.iter().enumerate().skip(1) {
        if v > max_value {
            max_value = v;
            max_index = i;
        }
    }

    let dominant_hz = max_index as f64 * sample_rate / (2.0 * snapshot.len() as f64);
    Estimate {
        dominant_hz,
        is_low: dominant_hz < LOW_FREQUENCY_HZ,
    }
}

// ─── Échantillonneur périodique ───────────────────────────────────────────────

struct Sampler {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Estimateur lié 1:1 à une session de capture.
pub struct FrequencyEstimator {
    reading: Arc<RwLock<Reading>>,
    sampler: Option<Sampler>,
    period: Duration,
    sample_immediately: bool,
}

impl Default for FrequencyEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyEstimator {
    pub fn new() -> Self {
        Self::with_period(SAMPLING_PERIOD)
    }

    pub fn with_period(period: Duration) -> Self {
        FrequencyEstimator {
            reading: Arc::new(RwLock::new(Reading::default())),
            sampler: None,
            period,
            sample_immediately: false,
        }
    }

    /// Premier calcul dès `start` plutôt qu'après une période.
    pub fn sample_immediately(mut self, yes: bool) -> Self {
        self.sample_immediately = yes;
        self
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_some()
    }

    pub fn reading(&self) -> Reading {
        self.reading.read().map(|r| *r).unwrap_or_default()
    }

    /// Démarre l'échantillonnage. Sans source (capture pas encore prête),
    /// ne fait rien.
    pub fn start(&mut self, source: Option<Arc<dyn SpectrumSource>>, sample_rate: f64) {
        let Some(source) = source else {
            log::debug!("estimateur : aucune source de spectre, démarrage ignoré");
            return;
        };
        if self.sampler.is_some() {
            log::warn!("estimateur déjà actif, démarrage ignoré");
            return;
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            log::warn!("estimateur : taux d'échantillonnage invalide ({sample_rate})");
            return;
        }
        let bins = source.bin_count();
        if bins == 0 {
            log::warn!("estimateur : spectre sans bin, démarrage ignoré");
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let reading = Arc::clone(&self.reading);
        let period = self.period;
        let immediate = self.sample_immediately;

        let handle = thread::spawn(move || {
            let mut snapshot = vec![0u8; bins];
            let mut tick = || {
                source.fill_snapshot(&mut snapshot);
                let estimate = compute_once(&snapshot, sample_rate);
                if let Ok(mut r) = reading.write() {
                    *r = estimate.into();
                }
            };

            if immediate {
                tick();
            }

            // Échéances absolues : pas de dérive si un tick prend du temps
            let mut next = Instant::now() + period;
            loop {
                let wait = next.saturating_duration_since(Instant::now());
                match stop_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {
                        tick();
                        next = next_deadline(next, Instant::now(), period);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        log::info!("estimateur démarré ({bins} bins, {sample_rate} Hz)");
        self.sampler = Some(Sampler { stop_tx, handle });
    }

    /// Arrête l'échantillonnage et remet l'état à `(None, false)`.
    /// Au retour, plus aucun tick ne peut se produire.
    pub fn stop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            let _ = sampler.stop_tx.send(());
            if sampler.handle.join().is_err() {
                log::error!("le thread de l'estimateur a paniqué");
            }
            log::info!("estimateur arrêté");
        }
        if let Ok(mut r) = self.reading.write() {
            *r = Reading::default();
        }
    }
}

/// Échéance suivante. Au-delà d'une période de retard (veille, charge),
/// on repart de maintenant au lieu d'enchaîner les ticks en rattrapage.
fn next_deadline(previous: Instant, now: Instant, period: Duration) -> Instant {
    let next = previous + period;
    if next <= now {
        now + period
    } else {
        next
    }
}

impl Drop for FrequencyEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}
