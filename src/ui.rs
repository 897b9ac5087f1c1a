//! The full-screen terminal client: a scrolling session log over an input
//! line. Invocations run on spawned tasks; their outcomes come back over an
//! event channel and settle the matching log entry.

use crate::commands::{parse_input, render_result, Input};
use crate::core::config::Config;
use crate::core::log::{EntryId, EntryState, LogEntry, Outcome, Sender, SessionLog};
use crate::mcp::connection::Connection;
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

enum UiEvent {
    Term(Event),
    Settled { id: EntryId, outcome: Outcome },
    System(String),
}

struct App {
    log: SessionLog,
    input: String,
    scroll_offset: u16,
    auto_scroll: bool,
}

impl App {
    fn new() -> Self {
        Self {
            log: SessionLog::new(),
            input: String::new(),
            scroll_offset: 0,
            auto_scroll: true,
        }
    }

    fn build_display_lines(&self) -> Vec<Line<'_>> {
        self.log.entries().map(entry_line).collect()
    }

    fn scroll_to_bottom(&mut self, available_height: u16) {
        let total_lines = self.build_display_lines().len() as u16;
        self.scroll_offset = total_lines.saturating_sub(available_height);
    }
}

fn entry_line(entry: &LogEntry) -> Line<'_> {
    if entry.state == EntryState::Processing {
        return Line::from(Span::styled(
            entry.text.as_str(),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ));
    }
    match entry.sender {
        Sender::User => Line::from(vec![
            Span::styled(
                "You: ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(entry.text.as_str(), Style::default().fg(Color::Cyan)),
        ]),
        Sender::System => Line::from(Span::styled(
            entry.text.as_str(),
            Style::default().fg(Color::DarkGray),
        )),
        Sender::Server => match entry.tool.as_deref() {
            // Echo results get their own presentation.
            Some("echo") => Line::from(vec![
                Span::styled(
                    "Echo: ",
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(entry.text.as_str(), Style::default().fg(Color::White)),
            ]),
            Some(tool) => Line::from(vec![
                Span::styled(format!("[{tool}] "), Style::default().fg(Color::Green)),
                Span::styled(entry.text.as_str(), Style::default().fg(Color::White)),
            ]),
            None => Line::from(Span::styled(
                entry.text.as_str(),
                Style::default().fg(Color::White),
            )),
        },
    }
}

fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.area());

    let lines = app.build_display_lines();
    let available_height = chunks[0].height.saturating_sub(1);
    let total_lines = lines.len() as u16;
    let max_offset = total_lines.saturating_sub(available_height);
    let scroll_offset = app.scroll_offset.min(max_offset);

    let log = Paragraph::new(lines)
        .block(Block::default().title("MCP Terminal"))
        .wrap(Wrap { trim: true })
        .scroll((scroll_offset, 0));
    f.render_widget(log, chunks[0]);

    let input = Paragraph::new(app.input.as_str())
        .style(Style::default().fg(Color::Yellow))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("@echo <text> | @add <a> <b> (Enter to send, Ctrl+C to quit)"),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(input, chunks[1]);

    f.set_cursor_position((chunks[1].x + app.input.len() as u16 + 1, chunks[1].y + 1));
}

fn spawn_event_reader(event_tx: mpsc::UnboundedSender<UiEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Ok(true) = event::poll(Duration::from_millis(10)) {
                match event::read() {
                    Ok(ev) => {
                        if event_tx.send(UiEvent::Term(ev)).is_err() {
                            break;
                        }
                    }
                    Err(_) => continue,
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
    })
}

fn spawn_connect(connection: Arc<Connection>, event_tx: mpsc::UnboundedSender<UiEvent>) {
    tokio::spawn(async move {
        match connection.connect().await {
            Ok(()) => {
                let _ = event_tx.send(UiEvent::System("Connected to MCP server.".to_string()));
                if let Ok(listing) = connection.list_tools().await {
                    let names: Vec<&str> =
                        listing.tools.iter().map(|def| def.name.as_str()).collect();
                    let _ = event_tx.send(UiEvent::System(format!(
                        "Tools available: {}",
                        names.join(", ")
                    )));
                }
            }
            Err(err) => {
                let _ = event_tx.send(UiEvent::System(format!(
                    "Failed to connect to MCP server: {err}"
                )));
            }
        }
    });
}

fn spawn_invoke(
    connection: Arc<Connection>,
    event_tx: mpsc::UnboundedSender<UiEvent>,
    id: EntryId,
    tool: &'static str,
    arguments: serde_json::Value,
    timeout: Duration,
) {
    tokio::spawn(async move {
        let outcome = match connection.invoke(tool, arguments, timeout).await {
            Ok(result) => Outcome::Success(render_result(tool, &result)),
            Err(err) => Outcome::Error(format!("Error: {err}")),
        };
        let _ = event_tx.send(UiEvent::Settled { id, outcome });
    });
}

/// Runs the terminal client until the user quits.
pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let connection = Arc::new(Connection::new(
        &config.server_url,
        config.client_info(),
        config.tool_timeout(),
    )?);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<UiEvent>();
    let event_reader = spawn_event_reader(event_tx.clone());
    spawn_connect(connection.clone(), event_tx.clone());

    let mut app = App::new();
    app.log.push(
        Sender::System,
        format!("Connecting to {}...", config.server_url),
    );

    let result = loop {
        terminal.draw(|f| draw(f, &app))?;
        let term_height = terminal.size()?.height;
        let available_height = term_height.saturating_sub(4);

        let ui_event =
            match tokio::time::timeout(Duration::from_millis(50), event_rx.recv()).await {
                Ok(Some(ui_event)) => ui_event,
                Ok(None) => break Ok(()),
                Err(_) => continue,
            };
        match ui_event {
            UiEvent::Term(Event::Key(key)) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    break Ok(());
                }
                KeyCode::Enter => {
                    let raw = std::mem::take(&mut app.input);
                    if raw.trim().is_empty() {
                        continue;
                    }
                    handle_submission(&mut app, &connection, &event_tx, &config, &raw);
                    if app.auto_scroll {
                        app.scroll_to_bottom(available_height);
                    }
                }
                KeyCode::Backspace => {
                    app.input.pop();
                }
                KeyCode::Up => {
                    app.scroll_offset = app.scroll_offset.saturating_sub(1);
                    app.auto_scroll = false;
                }
                KeyCode::Down => {
                    app.scroll_offset = app.scroll_offset.saturating_add(1);
                    app.auto_scroll = true;
                }
                KeyCode::Char(c) => {
                    app.input.push(c);
                }
                _ => {}
            },
            UiEvent::Term(_) => {}
            UiEvent::Settled { id, outcome } => {
                if !app.log.settle(id, outcome) {
                    debug!(id, "Outcome for an already settled entry");
                }
                if app.auto_scroll {
                    app.scroll_to_bottom(available_height);
                }
            }
            UiEvent::System(text) => {
                app.log.push(Sender::System, text);
                if app.auto_scroll {
                    app.scroll_to_bottom(available_height);
                }
            }
        }
    };

    event_reader.abort();
    connection.close().await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn handle_submission(
    app: &mut App,
    connection: &Arc<Connection>,
    event_tx: &mpsc::UnboundedSender<UiEvent>,
    config: &Config,
    raw: &str,
) {
    app.log.push(Sender::User, raw.trim());
    match parse_input(raw) {
        Input::Invoke { tool, arguments } => {
            let id = app.log.begin(tool);
            spawn_invoke(
                connection.clone(),
                event_tx.clone(),
                id,
                tool,
                arguments,
                config.tool_timeout(),
            );
        }
        Input::UnknownCommand(_) => {
            app.log.push(Sender::System, "Unknown command.");
        }
        Input::BadArguments(usage) => {
            app.log.push(Sender::System, usage);
        }
        Input::FreeText(_) => {
            app.log
                .push(Sender::System, "Free-form text is not handled yet.");
        }
    }
}
