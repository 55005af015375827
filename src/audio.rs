// ============================================================
//  audio.rs — Capture & lecture audio via cpal
//
//  - Énumération des microphones
//  - Session de capture : analyse live + enregistrement (pause/reprise)
//  - Lecture des enregistrements en mémoire
//  - Support : WASAPI (Windows), CoreAudio (macOS), ALSA (Linux)
// ============================================================

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::config::AudioSettings;
use crate::dsp::{self, SpectrumAnalyser, TimeDomainBuffer};
use crate::estimator::SpectrumSource;

/// Taux demandé au micro ; sinon celui du périphérique.
const PREFERRED_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Aucun microphone disponible. Branchez un micro et réessayez.")]
    NoInputDevice,
    #[error("Aucune sortie audio disponible")]
    NoOutputDevice,
    #[error("Microphone introuvable : {0}")]
    DeviceNotFound(String),
    #[error("Format d'échantillon non pris en charge : {0:?}")]
    UnsupportedFormat(SampleFormat),
    #[error("Impossible d'énumérer les périphériques : {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("Configuration du périphérique illisible : {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error("Configuration par défaut indisponible : {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("Ouverture du flux impossible : {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("Démarrage du flux impossible : {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("Mise en pause du flux impossible : {0}")]
    PauseStream(#[from] cpal::PauseStreamError),
}

// ─── Périphériques ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InputDevice {
    pub name: String,
    pub is_default: bool,
}

pub fn list_input_devices() -> Result<Vec<InputDevice>, AudioError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    for device in host.input_devices()? {
        let name = match device.name() {
            Ok(n) => n,
            Err(e) => {
                log::warn!("micro sans nom ignoré : {e}");
                continue;
            }
        };
        let is_default = default_name.as_deref() == Some(name.as_str());
        devices.push(InputDevice { name, is_default });
    }
    Ok(devices)
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    match name {
        None => host.default_input_device().ok_or(AudioError::NoInputDevice),
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string())),
    }
}

// ─── Source de spectre live ───────────────────────────────────────────────────

/// Fenêtre temporelle alimentée par le callback micro + analyseur.
/// Instantané calculé à la demande de l'estimateur.
pub struct LiveSpectrum {
    window: Arc<Mutex<TimeDomainBuffer>>,
    analyser: Mutex<(SpectrumAnalyser, Vec<f32>)>,
}

impl LiveSpectrum {
    fn new(window: Arc<Mutex<TimeDomainBuffer>>, settings: &AudioSettings) -> Self {
        let analyser = SpectrumAnalyser::new(
            settings.fft_size,
            settings.smoothing,
            settings.min_db,
            settings.max_db,
        );
        let scratch = vec![0.0; settings.fft_size];
        LiveSpectrum {
            window,
            analyser: Mutex::new((analyser, scratch)),
        }
    }
}

impl SpectrumSource for LiveSpectrum {
    fn bin_count(&self) -> usize {
        self.analyser.lock().map(|a| a.0.bin_count()).unwrap_or(0)
    }

    fn fill_snapshot(&self, out: &mut [u8]) {
        let Ok(mut guard) = self.analyser.lock() else {
            return;
        };
        let (analyser, samples) = &mut *guard;
        if let Ok(window) = self.window.lock() {
            window.latest(samples);
        }
        analyser.byte_frequency_data(&samples[..], out);
    }
}

// ─── Enregistrement ───────────────────────────────────────────────────────────

/// Prise mono gardée en mémoire le temps du processus.
#[derive(Debug, Clone)]
pub struct Recording {
    pub label: String,
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

fn samples_to_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / sample_rate as f64)
}

/// Session de capture active. Le flux s'arrête quand la session est
/// libérée (`finish` ou drop).
pub struct CaptureSession {
    stream: cpal::Stream,
    device_name: String,
    sample_rate: u32,
    window: Arc<Mutex<TimeDomainBuffer>>,
    recorded: Arc<Mutex<Vec<f32>>>,
    paused: Arc<AtomicBool>,
    spectrum: Arc<LiveSpectrum>,
}

impl CaptureSession {
    pub fn start(device_name: Option<&str>, settings: &AudioSettings) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_name)?;
        let name = device.name().unwrap_or_else(|_| "Inconnu".into());

        let (config, format) = find_mono_input_config(&device, SampleRate(PREFERRED_SAMPLE_RATE))?;
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let window = Arc::new(Mutex::new(TimeDomainBuffer::new(settings.fft_size)));
        let recorded: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let paused = Arc::new(AtomicBool::new(false));

        let sink = CaptureSink {
            channels,
            window: Arc::clone(&window),
            recorded: Arc::clone(&recorded),
            paused: Arc::clone(&paused),
            mono: Vec::new(),
            frame: Vec::with_capacity(channels),
        };

        let stream = match format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, sink)?,
            SampleFormat::I16 => build_input::<i16>(&device, &config, sink)?,
            SampleFormat::U16 => build_input::<u16>(&device, &config, sink)?,
            SampleFormat::I32 => build_input::<i32>(&device, &config, sink)?,
            SampleFormat::U8 => build_input::<u8>(&device, &config, sink)?,
            SampleFormat::F64 => build_input::<f64>(&device, &config, sink)?,
            other => return Err(AudioError::UnsupportedFormat(other)),
        };
        stream.play()?;

        log::info!(
            "capture démarrée sur « {name} » ({sample_rate} Hz, {channels} canal(aux), {format:?})"
        );

        let spectrum = Arc::new(LiveSpectrum::new(Arc::clone(&window), settings));
        Ok(CaptureSession {
            stream,
            device_name: name,
            sample_rate,
            window,
            recorded,
            paused,
            spectrum,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn spectrum(&self) -> Arc<LiveSpectrum> {
        Arc::clone(&self.spectrum)
    }

    /// L'analyse continue pendant la pause ; seul l'enregistrement s'arrête.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        let len = self.recorded.lock().map(|r| r.len()).unwrap_or(0);
        samples_to_duration(len, self.sample_rate)
    }

    /// Dernière fenêtre d'analyse (oscilloscope).
    pub fn live_window(&self) -> Vec<f32> {
        match self.window.lock() {
            Ok(w) => {
                let mut out = vec![0.0; w.capacity()];
                w.latest(&mut out);
                out
            }
            Err(_) => Vec::new(),
        }
    }

    /// Pics des `span` dernières secondes enregistrées.
    pub fn recorded_tail_peaks(&self, span: Duration, buckets: usize) -> Vec<f32> {
        let want = (span.as_secs_f64() * self.sample_rate as f64) as usize;
        match self.recorded.lock() {
            Ok(r) => {
                let start = r.len().saturating_sub(want);
                // Fenêtre pas encore remplie : le tracé part de la gauche
                let filled = ((r.len() - start) * buckets).checked_div(want).unwrap_or(0);
                let mut out = dsp::peaks(&r[start..], filled.max(1).min(buckets));
                out.resize(buckets, 0.0);
                out
            }
            Err(_) => vec![0.0; buckets],
        }
    }

    /// Pics de toute la prise, sur une échelle d'au moins `timeline`.
    pub fn recorded_peaks(&self, timeline: Duration, buckets: usize) -> Vec<f32> {
        match self.recorded.lock() {
            Ok(r) => {
                let total = samples_to_duration(r.len(), self.sample_rate).max(timeline);
                let used = if total.is_zero() {
                    0
                } else {
                    let ratio = samples_to_duration(r.len(), self.sample_rate).as_secs_f64()
                        / total.as_secs_f64();
                    ((ratio * buckets as f64).ceil() as usize).min(buckets)
                };
                let mut out = if used == 0 { Vec::new() } else { dsp::peaks(&r, used) };
                out.resize(buckets, 0.0);
                out
            }
            Err(_) => vec![0.0; buckets],
        }
    }

    /// Coupe le flux et rend la prise (None si rien n'a été capturé).
    pub fn finish(self, label: String) -> Option<Recording> {
        if let Err(e) = self.stream.pause() {
            log::debug!("pause du flux d'entrée : {e}");
        }
        let CaptureSession { stream, recorded, sample_rate, .. } = self;
        drop(stream);

        let samples = match Arc::try_unwrap(recorded) {
            Ok(m) => m.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => shared.lock().map(|r| r.clone()).unwrap_or_default(),
        };
        if samples.is_empty() {
            log::warn!("capture terminée sans échantillon");
            return None;
        }
        log::info!("capture terminée : {} échantillons", samples.len());
        Some(Recording {
            label,
            samples: Arc::new(samples),
            sample_rate,
        })
    }
}

/// État partagé avec le callback d'entrée.
struct CaptureSink {
    channels: usize,
    window: Arc<Mutex<TimeDomainBuffer>>,
    recorded: Arc<Mutex<Vec<f32>>>,
    paused: Arc<AtomicBool>,
    mono: Vec<f32>,
    frame: Vec<f32>,
}

impl CaptureSink {
    fn feed<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        // Mix multicanal → mono
        self.mono.clear();
        for chunk in data.chunks(self.channels.max(1)) {
            self.frame.clear();
            self.frame.extend(chunk.iter().map(|&s| f32::from_sample(s)));
            self.mono.push(dsp::downmix(&self.frame));
        }

        if let Ok(mut w) = self.window.lock() {
            w.push(&self.mono);
        }
        if !self.paused.load(Ordering::SeqCst) {
            if let Ok(mut r) = self.recorded.lock() {
                r.extend_from_slice(&self.mono);
            }
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut sink: CaptureSink,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| sink.feed(data),
        |e| log::error!("erreur entrée audio : {e}"),
        None,
    )?;
    Ok(stream)
}

/// Cherche une config mono (ou stéréo en fallback) au taux voulu sur le micro.
fn find_mono_input_config(
    device: &cpal::Device,
    desired_rate: SampleRate,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    for supported in device.supported_input_configs()? {
        if supported.sample_format() == SampleFormat::F32
            && supported.min_sample_rate() <= desired_rate
            && supported.max_sample_rate() >= desired_rate
        {
            let channels = supported.channels().min(2);
            return Ok((
                StreamConfig {
                    channels,
                    sample_rate: desired_rate,
                    buffer_size: cpal::BufferSize::Default,
                },
                SampleFormat::F32,
            ));
        }
    }

    let conf = device.default_input_config()?;
    Ok((
        StreamConfig {
            channels: conf.channels(),
            sample_rate: conf.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        },
        conf.sample_format(),
    ))
}

// ─── Lecture ──────────────────────────────────────────────────────────────────

struct Cursor {
    position: f64,
}

/// Lecture d'une prise sur la sortie par défaut. Le signal mono est copié
/// sur tous les canaux ; rééchantillonnage linéaire si les taux diffèrent.
pub struct Playback {
    _stream: cpal::Stream,
    cursor: Arc<Mutex<Cursor>>,
    playing: Arc<AtomicBool>,
    len: usize,
}

impl Playback {
    pub fn start(recording: &Recording) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoOutputDevice)?;
        let (config, format) = find_output_config(&device, SampleRate(recording.sample_rate))?;

        let step = recording.sample_rate as f64 / config.sample_rate.0 as f64;
        let cursor = Arc::new(Mutex::new(Cursor { position: 0.0 }));
        let playing = Arc::new(AtomicBool::new(true));
        let source = PlaybackSource {
            samples: Arc::clone(&recording.samples),
            channels: config.channels as usize,
            step,
            cursor: Arc::clone(&cursor),
            playing: Arc::clone(&playing),
        };

        let stream = match format {
            SampleFormat::F32 => build_output::<f32>(&device, &config, source)?,
            SampleFormat::I16 => build_output::<i16>(&device, &config, source)?,
            SampleFormat::U16 => build_output::<u16>(&device, &config, source)?,
            SampleFormat::I32 => build_output::<i32>(&device, &config, source)?,
            other => return Err(AudioError::UnsupportedFormat(other)),
        };
        stream.play()?;
        log::info!(
            "lecture de « {} » ({} Hz → {} Hz)",
            recording.label,
            recording.sample_rate,
            config.sample_rate.0
        );

        Ok(Playback {
            _stream: stream,
            cursor,
            playing,
            len: recording.samples.len(),
        })
    }

    /// Lecture / pause. Reprend du début si la fin était atteinte.
    pub fn toggle(&self) {
        let was_playing = self.playing.fetch_xor(true, Ordering::SeqCst);
        log::debug!("lecture {}", if was_playing { "en pause" } else { "reprise" });
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let pos = self.cursor.lock().map(|c| c.position).unwrap_or(0.0);
        (pos / self.len as f64).clamp(0.0, 1.0) as f32
    }
}

struct PlaybackSource {
    samples: Arc<Vec<f32>>,
    channels: usize,
    step: f64,
    cursor: Arc<Mutex<Cursor>>,
    playing: Arc<AtomicBool>,
}

impl PlaybackSource {
    fn render<T>(&self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let silence = T::from_sample(0.0f32);
        if !self.playing.load(Ordering::SeqCst) {
            data.fill(silence);
            return;
        }
        let Ok(mut cursor) = self.cursor.lock() else {
            data.fill(silence);
            return;
        };

        let channels = self.channels.max(1);
        let mut written = 0;
        for frame in data.chunks_mut(channels) {
            let Some(v) = interpolate(&self.samples, cursor.position) else {
                break;
            };
            frame.fill(T::from_sample(v));
            cursor.position += self.step;
            written += frame.len();
        }
        if written < data.len() {
            // Fin de prise : pause et retour au début
            data[written..].fill(silence);
            cursor.position = 0.0;
            self.playing.store(false, Ordering::SeqCst);
        }
    }
}

fn interpolate(samples: &[f32], position: f64) -> Option<f32> {
    let i = position.floor() as usize;
    let a = *samples.get(i)?;
    let b = samples.get(i + 1).copied().unwrap_or(a);
    let t = (position - i as f64) as f32;
    Some(a + (b - a) * t)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    source: PlaybackSource,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| source.render(data),
        |e| log::error!("erreur sortie audio : {e}"),
        None,
    )?;
    Ok(stream)
}

/// Cherche une config de sortie au taux de la prise ; préfère la stéréo F32,
/// sinon la config par défaut du périphérique.
fn find_output_config(
    device: &cpal::Device,
    desired_rate: SampleRate,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    for supported in device.supported_output_configs()? {
        if supported.channels() == 2
            && supported.sample_format() == SampleFormat::F32
            && supported.min_sample_rate() <= desired_rate
            && supported.max_sample_rate() >= desired_rate
        {
            return Ok((
                StreamConfig {
                    channels: 2,
                    sample_rate: desired_rate,
                    buffer_size: cpal::BufferSize::Default,
                },
                SampleFormat::F32,
            ));
        }
    }

    let conf = device.default_output_config()?;
    Ok((
        StreamConfig {
            channels: conf.channels(),
            sample_rate: conf.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        },
        conf.sample_format(),
    ))
}

/// Nom du micro par défaut.
pub fn default_input_name() -> String {
    cpal::default_host()
        .default_input_device()
        .map(|d| d.name().unwrap_or_else(|_| "Inconnu".into()))
        .unwrap_or_else(|| "Aucun".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(channels: usize) -> CaptureSink {
        CaptureSink {
            channels,
            window: Arc::new(Mutex::new(TimeDomainBuffer::new(4))),
            recorded: Arc::new(Mutex::new(Vec::new())),
            paused: Arc::new(AtomicBool::new(false)),
            mono: Vec::new(),
            frame: Vec::with_capacity(channels),
        }
    }

    #[test]
    fn sink_downmixes_and_records() {
        let mut s = sink(2);
        s.feed(&[0.5f32, -0.5, 1.0, 0.0]);
        assert_eq!(*s.recorded.lock().unwrap(), vec![0.0, 0.5]);
    }

    #[test]
    fn sink_reuses_its_frame_buffer() {
        let mut s = sink(2);
        let frame = s.frame.as_ptr();
        s.feed(&[0.1f32, 0.2, 0.3, 0.4]);
        s.feed(&[0.5f32, 0.6]);
        assert_eq!(s.frame.as_ptr(), frame);
        assert_eq!(s.recorded.lock().unwrap().len(), 3);
    }

    #[test]
    fn sink_keeps_analysing_while_paused() {
        let mut s = sink(1);
        s.paused.store(true, Ordering::SeqCst);
        s.feed(&[i16::MAX, 0]);
        assert!(s.recorded.lock().unwrap().is_empty());

        let mut out = [0.0; 4];
        s.window.lock().unwrap().latest(&mut out);
        assert!(out[2] > 0.99);
    }

    #[test]
    fn live_spectrum_reads_the_shared_window() {
        let settings = AudioSettings {
            fft_size: 64,
            ..AudioSettings::default()
        };
        let window = Arc::new(Mutex::new(TimeDomainBuffer::new(64)));
        let spectrum = LiveSpectrum::new(Arc::clone(&window), &settings);
        assert_eq!(spectrum.bin_count(), 32);

        let mut out = vec![9u8; 32];
        spectrum.fill_snapshot(&mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn interpolation_is_linear_and_stops_at_the_end() {
        let s = [0.0, 1.0, 0.0];
        assert_eq!(interpolate(&s, 0.5), Some(0.5));
        assert_eq!(interpolate(&s, 2.0), Some(0.0));
        assert_eq!(interpolate(&s, 3.0), None);
    }

    #[test]
    fn playback_source_rewinds_and_pauses_at_the_end() {
        let src = PlaybackSource {
            samples: Arc::new(vec![0.25, 0.5]),
            channels: 2,
            step: 1.0,
            cursor: Arc::new(Mutex::new(Cursor { position: 0.0 })),
            playing: Arc::new(AtomicBool::new(true)),
        };
        let mut out = [1.0f32; 6];
        src.render(&mut out);
        assert_eq!(out, [0.25, 0.25, 0.5, 0.5, 0.0, 0.0]);
        assert!(!src.playing.load(Ordering::SeqCst));
        assert_eq!(src.cursor.lock().unwrap().position, 0.0);
    }

    #[test]
    fn recording_duration_follows_sample_rate() {
        let rec = Recording {
            label: "#1".into(),
            samples: Arc::new(vec![0.0; 24_000]),
            sample_rate: 48_000,
        };
        assert_eq!(rec.duration(), Duration::from_millis(500));
    }
}
