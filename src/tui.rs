use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, Wrap},
};
use std::io;
use std::time::Duration;

use crate::analysis::{ScanState, ScanStatus, Scanner};
use crate::comfy_table::visibility_ratio;
use crate::filter_utils::Category;
use crate::scan_config::{Interval, ScanConfig};
use crate::signal::rank_results;

// --- App State ---

struct App {
    scanner: Scanner,
    interval: Interval,
    lookback_days: u32,
    selected_category_index: usize,
    /// Feedback for the last key action (rejections, cancel requests).
    notice: Option<String>,
}

impl App {
    fn new(scanner: Scanner, defaults: &ScanConfig) -> Self {
        let selected_category_index = Category::ALL
            .iter()
            .position(|c| *c == defaults.category)
            .unwrap_or(0);
        Self {
            scanner,
            interval: defaults.interval,
            lookback_days: defaults.lookback_days,
            selected_category_index,
            notice: None,
        }
    }

    fn selected_category(&self) -> Category {
        Category::ALL[self.selected_category_index]
    }

    fn start_scan(&mut self) {
        let config = ScanConfig {
            interval: self.interval,
            lookback_days: self.lookback_days,
            category: self.selected_category(),
        };
        self.notice = match self.scanner.start_scan(config) {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
    }
}

// --- TUI ---

pub async fn run_tui(scanner: Scanner, defaults: ScanConfig) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, App::new(scanner, &defaults)).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App) -> Result<()> {
    loop {
        let status = app.scanner.status();
        terminal.draw(|f| ui(f, &app, &status))?;

        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if !handle_key_event(key, &mut app) {
                        app.scanner.cancel();
                        return Ok(());
                    }
                }
                // Redrawn on the next iteration.
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
        // Let the scan task make progress between frames.
        tokio::task::yield_now().await;
    }
}

fn handle_key_event(key: KeyEvent, app: &mut App) -> bool {
    let categories = Category::ALL.len();
    match key.code {
        KeyCode::Char('q') => return false,
        KeyCode::F(5) | KeyCode::Char('s') => app.start_scan(),
        KeyCode::Char('c') => {
            app.notice = if app.scanner.cancel() {
                Some("Cancelling after the current symbol...".to_string())
            } else {
                Some("No scan is running".to_string())
            };
        }
        KeyCode::Up => {
            app.selected_category_index = app
                .selected_category_index
                .checked_sub(1)
                .unwrap_or(categories - 1);
        }
        KeyCode::Down => {
            app.selected_category_index = (app.selected_category_index + 1) % categories;
        }
        KeyCode::Char(c) if c.is_ascii_digit() => {
            let digit = c.to_digit(10).unwrap_or(0) as usize;
            if digit > 0 && digit <= categories {
                app.selected_category_index = digit - 1;
            }
        }
        _ => {}
    }
    true
}

fn state_label(status: &ScanStatus) -> (&'static str, Color) {
    match status.state {
        ScanState::Idle => ("Idle", Color::Gray),
        ScanState::Running => ("Running", Color::Yellow),
        ScanState::Completed => ("Completed", Color::Green),
        ScanState::Failed => ("Failed", Color::Red),
        ScanState::Cancelled => ("Cancelled", Color::Magenta),
    }
}

fn ui(f: &mut Frame, app: &App, status: &ScanStatus) {
    let main_layout = Layout::horizontal([Constraint::Percentage(22), Constraint::Percentage(78)])
        .split(f.size());

    let right_chunks = Layout::vertical([
        Constraint::Length(3), // Scan config + state
        Constraint::Length(3), // Progress
        Constraint::Min(0),    // Results
    ])
    .split(main_layout[1]);

    // Sidebar: categories
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Categories")
        .title_alignment(Alignment::Center);
    let inner_sidebar_area = sidebar_block.inner(main_layout[0]);
    f.render_widget(sidebar_block, main_layout[0]);

    let sidebar_chunks = Layout::vertical([
        Constraint::Min(1),    // Category list
        Constraint::Length(4), // Selected category description
        Constraint::Length(2), // Key help
    ])
    .split(inner_sidebar_area);

    let category_lines: Vec<Line> = Category::ALL
        .iter()
        .enumerate()
        .map(|(i, category)| {
            let mut line = Line::from(format!("{} {}", i + 1, category));
            if i == app.selected_category_index {
                line = line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            line
        })
        .collect();
    f.render_widget(Paragraph::new(category_lines), sidebar_chunks[0]);

    f.render_widget(
        Paragraph::new(app.selected_category().description())
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true }),
        sidebar_chunks[1],
    );
    f.render_widget(
        Paragraph::new("F5/s scan  c cancel\nq quit").alignment(Alignment::Center),
        sidebar_chunks[2],
    );

    // Header: what the last run was and how it ended
    let (state, state_color) = state_label(status);
    let header = Line::from(vec![
        Span::styled(state, Style::default().fg(state_color).bold()),
        Span::raw(format!(
            "  {} | {} | {} days  (next: {} | {} days)",
            status.config.category,
            status.config.interval,
            status.config.lookback_days,
            app.interval,
            app.lookback_days
        )),
    ]);
    f.render_widget(
        Paragraph::new(header).block(Block::default().borders(Borders::ALL).title("Scan")),
        right_chunks[0],
    );

    let progress_label = if status.is_running {
        format!(
            "{}% of {} symbols, checking {}",
            status.progress, status.total_symbols, status.current_symbol
        )
    } else if let Some(file) = &status.results_file {
        format!("{}% - saved to {}", status.progress, file.display())
    } else {
        format!("{}%", status.progress)
    };
    f.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Progress"))
            .gauge_style(Style::default().fg(Color::Cyan))
            .percent(u16::from(status.progress.min(100)))
            .label(progress_label),
        right_chunks[1],
    );

    // Results, ranked live
    let mut results = status.results.clone();
    rank_results(&mut results);
    let top_score = results.first().map_or(1.0, |r| r.score);

    let header_row = Row::new(["Rank", "Symbol", "Score", "Close", "RSI", "Vol x"].map(Cell::from))
        .style(Style::default().bg(Color::DarkGray));
    let rows = results.iter().take(100).enumerate().map(|(i, result)| {
        let ratio = visibility_ratio(result.score, top_score);
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;
        let gray_val = (150.0 * ratio) as u8;
        let gray = Style::default().fg(Color::Rgb(gray_val, gray_val, gray_val));

        Row::new([
            Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
            Cell::from(result.symbol.clone())
                .style(Style::default().fg(Color::Rgb(0, cyan_val, cyan_val))),
            Cell::from(format!("{:.2}", result.score))
                .style(Style::default().fg(Color::Rgb(0, green_val, 0))),
            Cell::from(format!("{:.2}", result.close_price)).style(gray),
            Cell::from(format!("{:.2}", result.rsi)).style(gray),
            Cell::from(format!("{:.2}", result.volume_ratio)).style(gray),
        ])
        .height(1)
    });
    f.render_widget(
        Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Percentage(24),
                Constraint::Percentage(18),
                Constraint::Percentage(20),
                Constraint::Percentage(14),
                Constraint::Percentage(14),
            ],
        )
        .header(header_row)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Candidates ({})", results.len())),
        ),
        right_chunks[2],
    );

    let popup = status
        .error
        .as_deref()
        .map(|e| ("Scan error", e))
        .or_else(|| app.notice.as_deref().map(|n| ("Notice", n)));
    if let Some((title, message)) = popup {
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(message)
                .block(Block::default().title(title).borders(Borders::ALL))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            area,
        );
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
