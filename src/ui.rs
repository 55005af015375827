// ============================================================
//  ui.rs — Interface TUI avec ratatui
//
//    - En-tête + statut REC / PAUSE / PRÊT
//    - Boutons Enregistrer / Pause + durée MM:SS
//    - Choix du micro, options de forme d'onde
//    - Forme d'onde live (défilante, continue ou oscilloscope)
//    - Fréquence dominante + alerte fréquence basse
//    - Liste des enregistrements, forme d'onde et lecture
//    - Aide clavier en bas
// ============================================================

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Chart, Dataset, GraphType, LineGauge, List, ListItem, Paragraph,
        Sparkline, Wrap,
    },
    Frame,
};
use std::time::Duration;

use crate::{
    app::{AppState, Step},
    dsp::{self, format_progress},
    estimator::{Reading, LOW_FREQUENCY_HZ, SAMPLING_PERIOD},
};

// ─── Palette ──────────────────────────────────────────────────────────────────

const GREEN: Color = Color::Rgb(0, 255, 135);
const ORANGE: Color = Color::Rgb(255, 107, 53);
const CYAN: Color = Color::Rgb(0, 204, 255);
const RED: Color = Color::Rgb(255, 45, 85);
const YELLOW: Color = Color::Rgb(255, 214, 10);
const PURPLE: Color = Color::Rgb(200, 0, 200);
const GRAY: Color = Color::Rgb(80, 80, 100);
const WHITE: Color = Color::Rgb(220, 220, 230);
const BORDER: Color = Color::Rgb(35, 35, 55);

/// Texte du panneau fréquence : `N/A` tant qu'aucune estimation n'existe.
pub fn frequency_text(reading: &Reading) -> String {
    match reading.dominant_hz {
        Some(hz) => format!("{:.2} Hz", hz),
        None => "N/A".to_string(),
    }
}

// ─── Point d'entrée du rendu ──────────────────────────────────────────────────

pub fn draw(f: &mut Frame, state: &AppState) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(4),  // Header
            Constraint::Length(3),  // Boutons + durée
            Constraint::Length(3),  // Micro + options
            Constraint::Min(8),     // Forme d'onde live + fréquence
            Constraint::Length(9),  // Enregistrements
            Constraint::Length(3),  // Aide clavier
        ])
        .split(area);

    draw_header(f, chunks[0], state);
    draw_controls(f, chunks[1], state);
    draw_options(f, chunks[2], state);

    let center = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[3]);

    draw_live_waveform(f, center[0], state);
    draw_frequency(f, center[1], state);

    draw_recordings(f, chunks[4], state);
    draw_help(f, chunks[5], state);
}

// ─── En-tête ──────────────────────────────────────────────────────────────────

fn draw_header(f: &mut Frame, area: Rect, state: &AppState) {
    let status = match state.step {
        Step::Recording => {
            Span::styled("◉ REC", Style::default().fg(RED).add_modifier(Modifier::BOLD))
        }
        Step::Paused => {
            Span::styled("❚❚ PAUSE", Style::default().fg(YELLOW).add_modifier(Modifier::BOLD))
        }
        Step::Idle => Span::styled("● PRÊT", Style::default().fg(GREEN)),
    };

    let title = Line::from(vec![
        Span::styled(
            "  Audio Recorder  ",
            Style::default().fg(WHITE).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        status,
    ]);

    let subtitle = Line::from(Span::styled(
        "  Appuyez sur [Espace] pour enregistrer",
        Style::default().fg(GRAY),
    ));

    let device = match &state.session {
        Some(s) => format!("{} — {} Hz", s.device_name(), s.sample_rate()),
        None => state.device_label(),
    };
    let device_line = Line::from(vec![
        Span::styled("  Entrée : ", Style::default().fg(GRAY)),
        Span::styled(device, Style::default().fg(CYAN)),
    ]);

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::Rgb(40, 40, 60)));

    let para = Paragraph::new(vec![title, subtitle, device_line])
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(para, area);
}

// ─── Boutons / erreur ─────────────────────────────────────────────────────────

fn draw_controls(f: &mut Frame, area: Rect, state: &AppState) {
    if let Some(err) = &state.error {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(RED));
        let para = Paragraph::new(Span::styled(format!(" ⚠ {}", err), Style::default().fg(RED)))
            .block(block);
        f.render_widget(para, area);
        return;
    }

    let (record_label, record_color) = if state.is_capturing() {
        ("Stop", RED)
    } else {
        ("Enregistrer", CYAN)
    };

    let mut spans = vec![
        Span::styled("  [Espace] ", Style::default().fg(record_color).add_modifier(Modifier::BOLD)),
        Span::styled(record_label, Style::default().fg(WHITE).add_modifier(Modifier::BOLD)),
    ];

    // Pause visible seulement pendant une session
    if state.is_capturing() {
        let pause_label = if state.step == Step::Paused { "Reprendre" } else { "Pause" };
        spans.push(Span::styled(
            "    [P] ",
            Style::default().fg(YELLOW).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(pause_label, Style::default().fg(WHITE)));
        spans.push(Span::styled(
            format!("    {}", format_progress(state.elapsed())),
            Style::default().fg(GRAY),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

// ─── Micro + options de forme d'onde ─────────────────────────────────────────

fn checkbox(on: bool) -> &'static str {
    if on {
        "☑"
    } else {
        "☐"
    }
}

fn draw_options(f: &mut Frame, area: Rect, state: &AppState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    let locked = state.step != Step::Idle;
    let device_block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Micro ", Style::default().fg(GRAY)))
        .border_style(Style::default().fg(BORDER));
    let device_line = Line::from(vec![
        Span::styled(
            if locked { "  " } else { "  [↑/↓] " },
            Style::default().fg(CYAN).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            state.device_label(),
            Style::default().fg(if locked { GRAY } else { WHITE }),
        ),
        Span::styled(
            format!("  ({}/{})", state.selected_device + 1, state.devices.len() + 1),
            Style::default().fg(GRAY),
        ),
    ]);
    f.render_widget(Paragraph::new(device_line).block(device_block), cols[0]);

    let w = &state.settings.waveform;
    let options_block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Forme d'onde ", Style::default().fg(GRAY)))
        .border_style(Style::default().fg(BORDER));
    let options = Line::from(vec![
        Span::styled("  [S] ", Style::default().fg(CYAN).add_modifier(Modifier::BOLD)),
        Span::styled(format!("{} Défilante", checkbox(w.scrolling)), Style::default().fg(WHITE)),
        Span::styled("   [C] ", Style::default().fg(CYAN).add_modifier(Modifier::BOLD)),
        Span::styled(format!("{} Continue", checkbox(w.continuous)), Style::default().fg(WHITE)),
    ]);
    f.render_widget(Paragraph::new(options).block(options_block), cols[1]);
}

// ─── Forme d'onde live ────────────────────────────────────────────────────────

fn to_bars(peaks: &[f32]) -> Vec<u64> {
    peaks
        .iter()
        .map(|p| (p.clamp(0.0, 1.0) * 100.0).round() as u64)
        .collect()
}

fn draw_live_waveform(f: &mut Frame, area: Rect, state: &AppState) {
    let w = &state.settings.waveform;
    let mode = if w.scrolling {
        "défilante"
    } else if w.continuous {
        "continue"
    } else {
        "oscilloscope"
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" Micro — {} ", mode),
            Style::default().fg(GRAY).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(BORDER));

    let Some(session) = &state.session else {
        let para = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(
                "  Lancez un enregistrement pour afficher la forme d'onde",
                Style::default().fg(GRAY),
            )),
        ])
        .block(block);
        f.render_widget(para, area);
        return;
    };

    let buckets = area.width.saturating_sub(2) as usize;

    if w.scrolling || w.continuous {
        let peaks = if w.scrolling {
            session.recorded_tail_peaks(Duration::from_secs_f32(w.scroll_window_secs), buckets)
        } else {
            session.recorded_peaks(Duration::from_secs_f32(w.continuous_duration_secs), buckets)
        };
        let bars = to_bars(&peaks);
        let spark = Sparkline::default()
            .block(block)
            .style(Style::default().fg(PURPLE))
            .max(100)
            .data(&bars);
        f.render_widget(spark, area);
        return;
    }

    // Oscilloscope : dernière fenêtre d'analyse
    let window = session.live_window();
    let points: Vec<(f64, f64)> = window
        .iter()
        .enumerate()
        .map(|(i, &s)| (i as f64, s.clamp(-1.0, 1.0) as f64))
        .collect();
    let datasets = vec![Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(PURPLE))
        .data(&points)];
    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(GRAY))
                .bounds([0.0, window.len().saturating_sub(1).max(1) as f64]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(GRAY))
                .bounds([-1.0, 1.0]),
        );
    f.render_widget(chart, area);
}

// ─── Fréquence dominante ──────────────────────────────────────────────────────

fn draw_frequency(f: &mut Frame, area: Rect, state: &AppState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Fréquence dominante ", Style::default().fg(GRAY)))
        .border_style(Style::default().fg(if state.reading.is_low { RED } else { BORDER }));

    let value_color = match state.reading.dominant_hz {
        None => GRAY,
        Some(_) if state.reading.is_low => RED,
        Some(_) => GREEN,
    };

    let mut lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("  Fréquence : ", Style::default().fg(GRAY)),
            Span::styled(
                frequency_text(&state.reading),
                Style::default().fg(value_color).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
    ];

    if state.reading.is_low {
        lines.push(Line::from(Span::styled(
            format!("  ⚠ Attention : fréquence trop basse (sous {:.0} Hz)", LOW_FREQUENCY_HZ),
            Style::default().fg(RED).add_modifier(Modifier::BOLD),
        )));
    }

    lines.push(Line::from(Span::styled(
        format!(
            "  Seuil {:.0} Hz · mesure toutes les {} ms",
            LOW_FREQUENCY_HZ,
            SAMPLING_PERIOD.as_millis()
        ),
        Style::default().fg(GRAY),
    )));

    f.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

// ─── Enregistrements ─────────────────────────────────────────────────────────

fn draw_recordings(f: &mut Frame, area: Rect, state: &AppState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let list_block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" Enregistrements ", Style::default().fg(GRAY)))
        .border_style(Style::default().fg(BORDER));

    if state.recordings.is_empty() {
        let para = Paragraph::new(Span::styled("  Aucun enregistrement", Style::default().fg(GRAY)))
            .block(list_block);
        f.render_widget(para, cols[0]);
        let empty = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(BORDER));
        f.render_widget(empty, cols[1]);
        return;
    }

    let items: Vec<ListItem> = state
        .recordings
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let selected = i == state.selected_recording;
            let marker = if state.is_playing(i) { "▶" } else if selected { "›" } else { " " };
            ListItem::new(Line::from(vec![
                Span::styled(format!(" {} ", marker), Style::default().fg(ORANGE)),
                Span::styled(
                    rec.label.clone(),
                    Style::default().fg(if selected { WHITE } else { GRAY }),
                ),
                Span::styled(
                    format!("  {}", format_progress(rec.duration())),
                    Style::default().fg(GRAY),
                ),
            ]))
        })
        .collect();
    f.render_widget(List::new(items).block(list_block), cols[0]);

    let index = state.selected_recording;
    let Some(rec) = state.recordings.get(index) else {
        return;
    };
    let play_label = if state.is_playing(index) { "Pause" } else { "Lecture" };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {}  [Entrée] {} ", rec.label, play_label),
            Style::default().fg(ORANGE).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(cols[1]);
    f.render_widget(block, cols[1]);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(inner);

    let bars = to_bars(&dsp::peaks(&rec.samples, rows[0].width as usize));
    let spark = Sparkline::default()
        .style(Style::default().fg(ORANGE))
        .max(100)
        .data(&bars);
    f.render_widget(spark, rows[0]);

    let progress = state.playback_progress(index) as f64;
    let gauge = LineGauge::default()
        .filled_style(Style::default().fg(ORANGE))
        .unfilled_style(Style::default().fg(GRAY))
        .ratio(progress)
        .label(format_progress(rec.duration().mul_f64(progress)));
    f.render_widget(gauge, rows[1]);
}

// ─── Aide clavier ─────────────────────────────────────────────────────────────

fn draw_help(f: &mut Frame, area: Rect, _state: &AppState) {
    let items: Vec<(&str, &str)> = vec![
        ("[Espace]", "Enregistrer/Stop"),
        ("[P]", "Pause"),
        ("[↑/↓]", "Micro"),
        ("[S/C]", "Forme d'onde"),
        ("[←/→]", "Enregistrement"),
        ("[Entrée]", "Lecture"),
        ("[Q]", "Quitter"),
    ];

    let spans: Vec<Span> = items
        .iter()
        .flat_map(|(key, desc)| {
            vec![
                Span::styled(
                    format!(" {} ", key),
                    Style::default().fg(CYAN).add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("{} ", desc), Style::default().fg(GRAY)),
                Span::styled(" │ ", Style::default().fg(Color::Rgb(40, 40, 55))),
            ]
        })
        .collect();

    let line = Line::from(spans);
    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::Rgb(35, 35, 50)));

    f.render_widget(Paragraph::new(line).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{InputDevice, Recording};
    use crate::config::Settings;
    use ratatui::{backend::TestBackend, Terminal};
    use std::sync::Arc;

    fn render(state: &AppState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(140, 42)).unwrap();
        terminal.draw(|f| draw(f, state)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    fn state() -> AppState {
        let devices = vec![InputDevice { name: "Built-in".into(), is_default: true }];
        AppState::new(Settings::default(), None, devices)
    }

    #[test]
    fn frequency_text_formats_two_decimals() {
        assert_eq!(frequency_text(&Reading::default()), "N/A");
        let r = Reading { dominant_hz: Some(2153.3203125), is_low: false };
        assert_eq!(frequency_text(&r), "2153.32 Hz");
        let r = Reading { dominant_hz: Some(0.0), is_low: true };
        assert_eq!(frequency_text(&r), "0.00 Hz");
    }

    #[test]
    fn idle_screen_shows_no_frequency() {
        let screen = render(&state());
        assert!(screen.contains("N/A"));
        assert!(screen.contains("PRÊT"));
        assert!(!screen.contains("trop basse"));
        assert!(screen.contains("Aucun enregistrement"));
    }

    #[test]
    fn low_reading_shows_warning() {
        let mut s = state();
        s.reading = Reading { dominant_hz: Some(93.75), is_low: true };
        let screen = render(&s);
        assert!(screen.contains("93.75 Hz"));
        assert!(screen.contains("trop basse"));
    }

    #[test]
    fn recordings_are_listed() {
        let mut s = state();
        s.recordings.push(Recording {
            label: "Enregistrement #1".into(),
            samples: Arc::new(vec![0.5; 48_000 * 2]),
            sample_rate: 48_000,
        });
        let screen = render(&s);
        assert!(screen.contains("Enregistrement #1"));
        assert!(screen.contains("00:02"));
        assert!(screen.contains("Lecture"));
    }

    #[test]
    fn errors_replace_the_controls() {
        let mut s = state();
        s.error = Some("Aucun microphone disponible".into());
        let screen = render(&s);
        assert!(screen.contains("Aucun microphone disponible"));
    }
}
