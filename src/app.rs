// ============================================================
//  app.rs — Machine d'état de l'application
//
//  Gère le cycle de vie d'une session d'enregistrement :
//    Idle → Recording ⇄ Paused → Idle…
//  L'estimateur de fréquence vit exactement le temps de la session.
// ============================================================

use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    io,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    audio::{self, CaptureSession, InputDevice, Playback, Recording},
    config::Settings,
    estimator::{FrequencyEstimator, Reading, SpectrumSource},
    ui,
};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Idle,
    Recording,
    Paused,
}

/// Lecture en cours d'une prise de la liste.
pub struct ActivePlayback {
    pub index: usize,
    pub playback: Playback,
}

pub struct AppState {
    pub step: Step,
    pub settings: Settings,
    config_path: Option<PathBuf>,

    // Périphériques : index 0 = micro par défaut, puis `devices[i - 1]`
    pub devices: Vec<InputDevice>,
    pub selected_device: usize,
    pub default_device_name: String,

    pub session: Option<CaptureSession>,
    pub estimator: FrequencyEstimator,
    pub reading: Reading,

    pub recordings: Vec<Recording>,
    pub selected_recording: usize,
    pub playback: Option<ActivePlayback>,

    pub error: Option<String>,
}

impl AppState {
    /// `config_path` à `None` : les réglages ne sont pas réécrits sur disque.
    pub fn new(
        settings: Settings,
        config_path: Option<PathBuf>,
        devices: Vec<InputDevice>,
    ) -> Self {
        let selected_device = settings
            .audio
            .device
            .as_deref()
            .and_then(|wanted| devices.iter().position(|d| d.name == wanted))
            .map(|i| i + 1)
            .unwrap_or(0);
        let default_device_name = devices
            .iter()
            .find(|d| d.is_default)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| "Aucun".into());
        let estimator = FrequencyEstimator::new()
            .sample_immediately(settings.estimator.sample_immediately);

        AppState {
            step: Step::Idle,
            settings,
            config_path,
            devices,
            selected_device,
            default_device_name,
            session: None,
            estimator,
            reading: Reading::default(),
            recordings: Vec::new(),
            selected_recording: 0,
            playback: None,
            error: None,
        }
    }

    /// Choisit un micro pour cette exécution seulement (`--device`) ;
    /// les réglages enregistrés ne changent pas.
    pub fn with_device_override(mut self, name: Option<&str>) -> Self {
        let Some(name) = name else {
            return self;
        };
        match self.devices.iter().position(|d| d.name == name) {
            Some(i) => self.selected_device = i + 1,
            None => {
                log::warn!("micro « {name} » introuvable, micro par défaut utilisé");
                self.selected_device = 0;
            }
        }
        self
    }

    /// Nom du micro choisi ; `None` = périphérique par défaut.
    pub fn selected_device_name(&self) -> Option<&str> {
        match self.selected_device {
            0 => None,
            i => self.devices.get(i - 1).map(|d| d.name.as_str()),
        }
    }

    pub fn device_label(&self) -> String {
        match self.selected_device_name() {
            Some(name) => name.to_string(),
            None => format!("Par défaut ({})", self.default_device_name),
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.step, Step::Recording | Step::Paused)
    }

    // ── Enregistrement ──────────────────────────────────────────────────────

    /// Bouton Enregistrer / Stop.
    pub fn toggle_record(&mut self) {
        if self.is_capturing() {
            self.stop_recording();
        } else {
            self.start_recording();
        }
    }

    fn start_recording(&mut self) {
        self.error = None;
        let device = self.selected_device_name().map(str::to_owned);
        match CaptureSession::start(device.as_deref(), &self.settings.audio) {
            Ok(session) => {
                let source: Arc<dyn SpectrumSource> = session.spectrum();
                self.estimator.start(Some(source), session.sample_rate() as f64);
                self.session = Some(session);
                self.step = Step::Recording;
            }
            Err(e) => {
                log::error!("démarrage de l'enregistrement : {e}");
                self.error = Some(e.to_string());
            }
        }
    }

    fn stop_recording(&mut self) {
        self.estimator.stop();
        self.reading = Reading::default();
        if let Some(session) = self.session.take() {
            let label = format!("Enregistrement #{}", self.recordings.len() + 1);
            if let Some(rec) = session.finish(label) {
                self.recordings.push(rec);
                self.selected_recording = self.recordings.len() - 1;
            }
        }
        self.step = Step::Idle;
    }

    /// Bouton Pause / Reprendre.
    pub fn toggle_pause(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        self.error = None;
        if session.is_paused() {
            session.resume();
            self.step = Step::Recording;
        } else {
            session.pause();
            self.step = Step::Paused;
        }
    }

    /// Relève la dernière estimation publiée par l'estimateur.
    pub fn poll_estimator(&mut self) {
        self.reading = self.estimator.reading();
    }

    // ── Sélection du micro ──────────────────────────────────────────────────

    pub fn next_device(&mut self) {
        if self.step != Step::Idle {
            return;
        }
        self.selected_device = (self.selected_device + 1) % (self.devices.len() + 1);
        self.remember_device();
    }

    pub fn previous_device(&mut self) {
        if self.step != Step::Idle {
            return;
        }
        let n = self.devices.len() + 1;
        self.selected_device = (self.selected_device + n - 1) % n;
        self.remember_device();
    }

    fn remember_device(&mut self) {
        self.settings.audio.device = self.selected_device_name().map(str::to_owned);
        self.persist();
    }

    // ── Options de forme d'onde ─────────────────────────────────────────────

    pub fn toggle_scrolling(&mut self) {
        self.settings.waveform.scrolling = !self.settings.waveform.scrolling;
        self.persist();
    }

    pub fn toggle_continuous(&mut self) {
        self.settings.waveform.continuous = !self.settings.waveform.continuous;
        self.persist();
    }

    fn persist(&mut self) {
        self.error = None;
        if let Some(path) = &self.config_path {
            if let Err(e) = self.settings.save(path) {
                log::error!("sauvegarde de la configuration : {e}");
                self.error = Some(e.to_string());
            }
        }
    }

    // ── Enregistrements ─────────────────────────────────────────────────────

    pub fn next_recording(&mut self) {
        if !self.recordings.is_empty() {
            self.selected_recording = (self.selected_recording + 1).min(self.recordings.len() - 1);
        }
    }

    pub fn previous_recording(&mut self) {
        self.selected_recording = self.selected_recording.saturating_sub(1);
    }

    /// Bouton Lecture / Pause de la prise sélectionnée.
    pub fn toggle_playback(&mut self) {
        let index = self.selected_recording;
        if let Some(active) = &self.playback {
            if active.index == index {
                active.playback.toggle();
                return;
            }
        }
        let Some(rec) = self.recordings.get(index) else {
            return;
        };
        self.error = None;
        // Une seule lecture à la fois
        self.playback = None;
        match Playback::start(rec) {
            Ok(playback) => self.playback = Some(ActivePlayback { index, playback }),
            Err(e) => {
                log::error!("lecture de « {} » : {e}", rec.label);
                self.error = Some(e.to_string());
            }
        }
    }

    pub fn is_playing(&self, index: usize) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| p.index == index && p.playback.is_playing())
    }

    pub fn playback_progress(&self, index: usize) -> f32 {
        match &self.playback {
            Some(p) if p.index == index => p.playback.progress(),
            _ => 0.0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.session.as_ref().map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Libère la session et l'estimateur avant de quitter.
    pub fn shutdown(&mut self) {
        if self.is_capturing() {
            self.stop_recording();
        }
        self.playback = None;
    }
}

// ─── Point d'entrée ───────────────────────────────────────────────────────────

pub struct App;

impl App {
    /// `config_path` à `None` : rien n'est enregistré. `notice` s'affiche
    /// dès le premier rendu.
    pub fn run(
        settings: Settings,
        config_path: Option<PathBuf>,
        device: Option<&str>,
        notice: Option<String>,
    ) -> Result<()> {
        let devices = match audio::list_input_devices() {
            Ok(d) => d,
            Err(e) => {
                log::warn!("énumération des micros : {e}");
                Vec::new()
            }
        };
        log::info!(
            "{} micro(s) détecté(s), défaut : {}",
            devices.len(),
            audio::default_input_name()
        );

        let mut state = AppState::new(settings, config_path, devices).with_device_override(device);
        state.error = notice;

        // Init terminal
        enable_raw_mode().context("passage du terminal en mode brut")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = Self::event_loop(&mut terminal, &mut state);
        state.shutdown();

        // Restaure le terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        state: &mut AppState,
    ) -> Result<()> {
        // Tick plus court que la période d'échantillonnage de l'estimateur
        let tick = Duration::from_millis(50);
        let mut last_tick = Instant::now();

        loop {
            state.poll_estimator();

            // Rendu
            terminal.draw(|f| ui::draw(f, state))?;

            // Gestion des événements clavier
            let timeout = tick.checked_sub(last_tick.elapsed()).unwrap_or_default();
            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match (key.code, key.modifiers) {
                        // Quitter
                        (KeyCode::Char('q'), _)
                        | (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,

                        // Enregistrer / Stop
                        (KeyCode::Char(' ') | KeyCode::Char('r') | KeyCode::Char('R'), _) => {
                            state.toggle_record();
                        }

                        // Pause / Reprendre
                        (KeyCode::Char('p') | KeyCode::Char('P'), _) => state.toggle_pause(),

                        // Choix du micro
                        (KeyCode::Down | KeyCode::Char('m'), _) => state.next_device(),
                        (KeyCode::Up | KeyCode::Char('M'), _) => state.previous_device(),

                        // Options de forme d'onde
                        (KeyCode::Char('s') | KeyCode::Char('S'), _) => state.toggle_scrolling(),
                        (KeyCode::Char('c') | KeyCode::Char('C'), _) => state.toggle_continuous(),

                        // Enregistrements
                        (KeyCode::Left, _) => state.previous_recording(),
                        (KeyCode::Right, _) => state.next_recording(),
                        (KeyCode::Enter, _) => state.toggle_playback(),

                        _ => {}
                    }
                }
            }

            if last_tick.elapsed() >= tick {
                last_tick = Instant::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<InputDevice> {
        vec![
            InputDevice { name: "Built-in".into(), is_default: true },
            InputDevice { name: "USB Mic".into(), is_default: false },
        ]
    }

    fn recording(label: &str) -> Recording {
        Recording {
            label: label.into(),
            samples: Arc::new(vec![0.0; 480]),
            sample_rate: 48_000,
        }
    }

    #[test]
    fn starts_idle_with_empty_reading() {
        let state = AppState::new(Settings::default(), None, devices());
        assert_eq!(state.step, Step::Idle);
        assert_eq!(state.reading, Reading::default());
        assert_eq!(state.selected_device_name(), None);
        assert_eq!(state.device_label(), "Par défaut (Built-in)");
    }

    #[test]
    fn restores_saved_device() {
        let mut settings = Settings::default();
        settings.audio.device = Some("USB Mic".into());
        let state = AppState::new(settings, None, devices());
        assert_eq!(state.selected_device_name(), Some("USB Mic"));
    }

    #[test]
    fn forgotten_device_falls_back_to_default() {
        let mut settings = Settings::default();
        settings.audio.device = Some("Unplugged".into());
        let state = AppState::new(settings, None, devices());
        assert_eq!(state.selected_device, 0);
    }

    #[test]
    fn device_selection_wraps_and_is_remembered() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.next_device();
        assert_eq!(state.selected_device_name(), Some("Built-in"));
        state.next_device();
        state.next_device();
        assert_eq!(state.selected_device_name(), None);
        state.previous_device();
        assert_eq!(state.selected_device_name(), Some("USB Mic"));
        assert_eq!(state.settings.audio.device.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn device_is_locked_while_capturing() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.step = Step::Paused;
        state.next_device();
        assert_eq!(state.selected_device, 0);
    }

    #[test]
    fn waveform_options_toggle() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.toggle_scrolling();
        state.toggle_continuous();
        assert!(state.settings.waveform.scrolling);
        assert!(!state.settings.waveform.continuous);
    }

    fn scratch_config(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("audio-recorder-app-{}-{name}", std::process::id()))
            .join("config.toml")
    }

    #[test]
    fn device_override_is_not_saved() {
        let path = scratch_config("override");
        let mut saved = Settings::default();
        saved.audio.device = Some("Built-in".into());
        saved.save(&path).unwrap();

        let mut state = AppState::new(saved, Some(path.clone()), devices())
            .with_device_override(Some("USB Mic"));
        assert_eq!(state.selected_device_name(), Some("USB Mic"));
        state.toggle_continuous();

        let on_disk = Settings::read(&path).unwrap();
        assert_eq!(on_disk.audio.device.as_deref(), Some("Built-in"));
        assert!(!on_disk.waveform.continuous);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn unknown_override_falls_back_to_default() {
        let state = AppState::new(Settings::default(), None, devices())
            .with_device_override(Some("Unplugged"));
        assert_eq!(state.selected_device_name(), None);
    }

    #[test]
    fn device_chosen_in_the_ui_is_saved() {
        let path = scratch_config("chosen");
        let mut state = AppState::new(Settings::default(), Some(path.clone()), devices())
            .with_device_override(Some("Built-in"));
        state.next_device();
        assert_eq!(
            Settings::read(&path).unwrap().audio.device.as_deref(),
            Some("USB Mic")
        );
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn next_action_clears_a_previous_error() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.error = Some("sauvegarde impossible".into());
        state.toggle_scrolling();
        assert_eq!(state.error, None);
    }

    #[test]
    fn failed_save_is_reported() {
        // Le parent du fichier est un fichier : création du dossier impossible
        let blocker = std::env::temp_dir()
            .join(format!("audio-recorder-app-{}-blocker", std::process::id()));
        std::fs::write(&blocker, "").unwrap();
        let mut state =
            AppState::new(Settings::default(), Some(blocker.join("config.toml")), devices());
        state.toggle_scrolling();
        assert!(state.error.is_some());
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn pause_without_session_does_nothing() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.toggle_pause();
        assert_eq!(state.step, Step::Idle);
    }

    #[test]
    fn recording_selection_is_clamped() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.next_recording();
        assert_eq!(state.selected_recording, 0);

        state.recordings = vec![recording("#1"), recording("#2")];
        state.next_recording();
        state.next_recording();
        assert_eq!(state.selected_recording, 1);
        state.previous_recording();
        state.previous_recording();
        assert_eq!(state.selected_recording, 0);
    }

    #[test]
    fn nothing_plays_without_playback() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.recordings = vec![recording("#1")];
        assert!(!state.is_playing(0));
        assert_eq!(state.playback_progress(0), 0.0);
        assert_eq!(state.elapsed(), Duration::ZERO);
    }

    #[test]
    fn shutdown_when_idle_keeps_recordings() {
        let mut state = AppState::new(Settings::default(), None, devices());
        state.recordings = vec![recording("#1")];
        state.shutdown();
        assert_eq!(state.recordings.len(), 1);
        assert!(!state.estimator.is_running());
    }
}
