use std::error::Error;
use std::io::stdout;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use crossbeam_channel::unbounded;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction as LayoutDirection, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap};

use crate::control::api;
use crate::dispatch::{StreamPhase, StreamStatus};
use crate::driver::Direction;
use crate::registry::SlotInfo;
use crate::session::{DriverState, Session};

const TICK_RATE: Duration = Duration::from_millis(100);

struct AppState {
    driver: String,
    sample_rate: Option<f64>,
    frames: usize,
    slots: Vec<SlotInfo>,
    status: Option<StreamStatus>,
    message: Option<String>,
    last_update: Option<Instant>,
}

/// Run the monitor console for `session` until `q` is pressed.
pub fn run(session: &Session) -> Result<(), Box<dyn Error>> {
    setup_terminal()?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (status_tx, status_rx) = unbounded();
    std::thread::spawn(move || {
        loop {
            if status_tx.send(api::stream_status()).is_err() {
                break;
            }
            std::thread::sleep(TICK_RATE);
        }
    });

    let slots = session.slots();
    let frames = slots
        .first()
        .map(|slot| slot.byte_len / slot.descriptor.format.byte_width().max(1))
        .unwrap_or(0);
    let mut app = AppState {
        driver: session.info().name.clone(),
        sample_rate: session.sample_rate().ok(),
        frames,
        slots,
        status: None,
        message: None,
        last_update: None,
    };

    let result = event_loop(&mut terminal, &mut app, session, &status_rx);
    restore_terminal()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut AppState,
    session: &Session,
    status_rx: &Receiver<StreamStatus>,
) -> Result<(), Box<dyn Error>> {
    loop {
        terminal.draw(|frame| draw(frame, app))?;

        if let Some(status) = try_recv_latest(status_rx) {
            app.status = Some(status);
            app.last_update = Some(Instant::now());
        }

        if event::poll(Duration::from_millis(10))? {
            if let CEvent::Key(key) = event::read()? {
                if handle_key(app, session, key) {
                    return Ok(());
                }
            }
        }
    }
}

fn setup_terminal() -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn try_recv_latest<T>(rx: &Receiver<T>) -> Option<T> {
    let mut last = None;
    while let Ok(value) = rx.try_recv() {
        last = Some(value);
    }
    last
}

fn handle_key(app: &mut AppState, session: &Session, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('s') => {
            let result = if session.state() == DriverState::Running {
                session.stop().map(|_| "Stream stopped")
            } else {
                session.start().map(|_| "Stream started")
            };
            app.message = Some(match result {
                Ok(msg) => msg.to_string(),
                Err(err) => format!("Error: {err}"),
            });
        }
        KeyCode::Char('p') => {
            app.message = Some(match session.control_panel() {
                Ok(()) => "Control panel opened".to_string(),
                Err(err) => format!("Error: {err}"),
            });
        }
        _ => {}
    }
    false
}

fn draw(frame: &mut ratatui::Frame<'_>, app: &AppState) {
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(5),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_channels(frame, chunks[1], app);
    draw_footer(frame, chunks[2], app);
}

fn phase_label(phase: StreamPhase) -> Span<'static> {
    let (text, color) = match phase {
        StreamPhase::Idle => ("Idle", Color::DarkGray),
        StreamPhase::Armed => ("Armed", Color::Yellow),
        StreamPhase::Running => ("Running", Color::Green),
    };
    Span::styled(text, Style::default().fg(color).add_modifier(Modifier::BOLD))
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default()
        .title(format!("ASIO Host Console: {}", app.driver))
        .borders(Borders::ALL);

    let content = if let Some(status) = &app.status {
        let rate = app
            .sample_rate
            .map(|r| format!("{r:.0} Hz"))
            .unwrap_or_else(|| "unknown".to_string());
        Paragraph::new(Line::from(vec![
            phase_label(status.phase),
            Span::raw(format!(
                "    Rate: {}    Buffer: {} frames    Half: {}    Position: {}",
                rate, app.frames, status.ready_half, status.last_sample_position,
            )),
        ]))
    } else {
        Paragraph::new(Line::from(vec![Span::styled(
            "Waiting for stream status",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]))
    };

    frame.render_widget(content.block(block), area);
}

fn draw_channels(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let block = Block::default().title("Channels").borders(Borders::ALL);

    let header = Row::new(vec![
        Cell::from("Dir"),
        Cell::from("#"),
        Cell::from("Name"),
        Cell::from("Format"),
        Cell::from("Bytes/half"),
        Cell::from("View"),
    ])
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let rows = app.slots.iter().map(|slot| {
        let ch = &slot.descriptor;
        Row::new(vec![
            Cell::from(match ch.direction {
                Direction::Input => "in",
                Direction::Output => "out",
            }),
            Cell::from(format!("{}", ch.index)),
            Cell::from(ch.name.clone()),
            Cell::from(format!("{:?}", ch.format)),
            Cell::from(format!("{}", slot.byte_len)),
            Cell::from(if slot.copied { "copy" } else { "direct" }),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(4),
            Constraint::Length(20),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = "s: Start/stop  •  p: Control panel  •  q: Quit";
    let mut lines = vec![Line::from(info)];
    if let Some(status) = &app.status {
        lines.push(Line::from(format!(
            "Delivered: {}    Ignored: {}    Dropped: {}",
            status.delivered, status.ignored, status.dropped
        )));
    }
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    } else if let Some(updated) = app.last_update {
        let ago = updated.elapsed().as_secs_f32();
        lines.push(Line::from(Span::styled(
            format!("Last update {:.1}s ago", ago),
            Style::default().fg(Color::DarkGray),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
