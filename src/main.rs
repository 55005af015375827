// ============================================================
//  Audio Recorder — Enregistreur micro en terminal
//
//  Capture, forme d'onde live, pause/reprise, choix du micro,
//  lecture des prises et fréquence dominante (< 250 Hz signalé).
//
//  Dépendances :
//    cpal       — capture & lecture audio cross-platform
//    rustfft    — FFT rapide O(n log n)
//    ratatui    — interface TUI
//    crossterm  — terminal cross-platform
//    log        — journalisation (fichier, via env_logger)
//    serde/toml — configuration persistante
//    clap       — arguments de ligne de commande
// ============================================================

mod app;
mod audio;
mod config;
mod dsp;
mod estimator;
mod ui;

use anyhow::{Context, Result};
use app::App;
use clap::Parser;
use config::{LogTarget, Settings};
use std::fs::{self, File};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "audio-recorder",
    version,
    about = "Enregistreur audio avec estimation de la fréquence dominante"
)]
struct Cli {
    /// Micro à utiliser (nom exact, voir --list-devices)
    #[arg(short, long)]
    device: Option<String>,

    /// Liste les micros disponibles puis quitte
    #[arg(long)]
    list_devices: bool,

    /// Fichier de configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fichier de journal
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Niveau de journal (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(target: &LogTarget) -> Result<()> {
    let path = &target.file;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("création du dossier de journal {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("ouverture du journal {}", path.display()))?;

    env_logger::Builder::new()
        .parse_filters(&target.filters)
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .context("initialisation du journal")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        let devices = audio::list_input_devices().context("énumération des micros")?;
        if devices.is_empty() {
            println!("Aucun micro détecté");
        }
        for d in devices {
            let mark = if d.is_default { " (défaut)" } else { "" };
            println!("{}{}", d.name, mark);
        }
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let loaded = Settings::load(&config_path, cli.config.is_some())
        .with_context(|| format!("lecture de {}", config_path.display()))?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let target = loaded.settings.log.resolve(
        cli.log_level.as_deref(),
        cli.log_file.as_deref(),
        rust_log.as_deref(),
    );
    init_logging(&target)?;
    log::info!("configuration : {}", config_path.display());

    let save_path = loaded.save_path(&config_path);
    let notice = loaded.error.map(|e| {
        log::warn!("{e} ({}). Valeurs par défaut utilisées.", config_path.display());
        format!("{e} : réglages par défaut, fichier non modifié")
    });

    App::run(loaded.settings, save_path, cli.device.as_deref(), notice)
}
