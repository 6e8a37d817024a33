use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;
use std::time::Duration;

use crate::models::{Record, RecordId, Status};
use crate::tracker::Tracker;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const WRAP_WIDTH: usize = 70;

struct AppState {
    selected: usize,
    scroll_offset: u16,
    pending_delete: Option<RecordId>,
    message: Option<String>,
}

impl AppState {
    fn new() -> Self {
        Self {
            selected: 0,
            scroll_offset: 0,
            pending_delete: None,
            message: None,
        }
    }

    fn next(&mut self, len: usize) {
        if len > 0 && self.selected < len - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn clamp(&mut self, len: usize) {
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

pub fn run_browse(tracker: &mut Tracker) -> Result<()> {
    if tracker.records().is_empty() {
        println!("No applications yet.");
        return Ok(());
    }

    let mut state = AppState::new();

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, tracker);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    tracker: &mut Tracker,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        for error in tracker.poll_save_errors() {
            state.message = Some(format!("Save failed: {}", error));
        }
        state.clamp(tracker.records().len());
        list_state.select(Some(state.selected));

        terminal.draw(|frame| draw(frame, state, tracker, &mut list_state))?;

        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let current = tracker.records().get(state.selected).map(|r| r.id);

        // A pending delete only survives until the next key
        if let Some(id) = state.pending_delete.take() {
            if key.code == KeyCode::Char('y') {
                tracker.delete(id);
                state.message = Some(format!("Deleted #{}", id));
                if tracker.records().is_empty() {
                    break;
                }
            } else {
                state.message = Some("Delete cancelled".to_string());
            }
            continue;
        }

        let status = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => break,
            KeyCode::Down | KeyCode::Char('j') => {
                state.next(tracker.records().len());
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                state.prev();
                None
            }
            KeyCode::Char('J') | KeyCode::PageDown => {
                state.scroll_down();
                None
            }
            KeyCode::Char('K') | KeyCode::PageUp => {
                state.scroll_up();
                None
            }
            KeyCode::Char('d') => {
                if let Some(id) = current {
                    state.pending_delete = Some(id);
                    state.message = Some(format!("Delete #{}? y to confirm", id));
                }
                None
            }
            KeyCode::Char('a') => Some(Status::Applied),
            KeyCode::Char('i') => Some(Status::Interviewing),
            KeyCode::Char('o') => Some(Status::Offer),
            KeyCode::Char('x') => Some(Status::Rejected),
            _ => None,
        };

        if let (Some(status), Some(id)) = (status, current) {
            match tracker.set_status(id, status) {
                Ok(()) => state.message = Some(format!("#{} marked {}", id, status)),
                Err(e) => state.message = Some(e.to_string()),
            }
        }
    }
    Ok(())
}

fn status_style(status: Status) -> Style {
    match status {
        Status::Applied => Style::default().fg(Color::Cyan),
        Status::Interviewing => Style::default().fg(Color::Yellow),
        Status::Offer => Style::default().fg(Color::Green),
        Status::Rejected => Style::default().fg(Color::Red),
    }
}

fn draw(frame: &mut Frame, state: &AppState, tracker: &Tracker, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[0]);

    let records = tracker.records();

    // Left panel: application list
    let items: Vec<ListItem> = records
        .iter()
        .map(|record| {
            let status_icon = match record.status {
                Status::Applied => " ",
                Status::Interviewing => "*",
                Status::Offer => "+",
                Status::Rejected => "x",
            };
            let line = format!(
                "{} #{:<4} {} @ {}",
                status_icon, record.id, record.position, record.company
            );
            ListItem::new(truncate(&line, 60))
        })
        .collect();

    let source = match tracker.identity() {
        Some(identity) => format!("remote: {}", identity.uid),
        None => "local".to_string(),
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Applications ({}) [{}] ",
            records.len(),
            source
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: detail
    let detail = match records.get(state.selected) {
        Some(record) => build_detail(record),
        None => Text::raw("No application selected"),
    };
    let detail_widget = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    let message = Paragraph::new(state.message.clone().unwrap_or_default())
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(message, rows[1]);

    let help = Paragraph::new(
        " j/k:navigate  J/K:scroll  a:applied i:interviewing o:offer x:rejected  d:delete  q:quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn build_detail(record: &Record) -> Text<'_> {
    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        record.position.as_str(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", record.company)));
    lines.push(Line::from(Span::styled(
        format!("Status: {}", record.status),
        status_style(record.status),
    )));

    let date = record
        .date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    lines.push(Line::from(format!("Applied: {}", date)));
    if let Some(location) = record.location {
        lines.push(Line::from(format!("Location: {}", location)));
    }
    if let Some(agent) = record.agent {
        lines.push(Line::from(format!("Via: {}", agent)));
    }
    lines.push(Line::from(""));

    let sections = [
        ("REQUIREMENTS", &record.requirements),
        ("NICE TO HAVE", &record.optional_requirements),
        ("BENEFITS", &record.benefits),
        ("DESCRIPTION", &record.full_description),
        ("NOTES", &record.notes),
    ];
    for (label, text) in sections {
        if text.trim().is_empty() {
            continue;
        }
        lines.push(Line::from(Span::styled(
            label,
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for paragraph in text.lines() {
            for line in textwrap::fill(paragraph, WRAP_WIDTH).lines() {
                lines.push(Line::from(format!("  {}", line)));
            }
        }
        lines.push(Line::from(""));
    }

    Text::from(lines)
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
