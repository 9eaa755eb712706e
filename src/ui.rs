use crate::engine::EngineSnapshot;
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::event::{
    self,
    Event,
    KeyCode,
    KeyEvent,
    KeyEventKind,
    KeyModifiers,
};
use crossterm::terminal::{
    disable_raw_mode,
    enable_raw_mode,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use std::io::{
    self,
    stdout,
};
use tokio::sync::mpsc;

/// Brush colors, cycled with `[` and `]`.
pub const PALETTE: [u32; 16] = [
    0xffffff, 0xe4e4e4, 0x888888, 0x222222, 0xffa7d1, 0xe50000, 0xe59500, 0xa06a42,
    0xe5d900, 0x94e044, 0x02be01, 0x00d3dd, 0x0083c7, 0x0000ea, 0xcf6ee4, 0x820080,
];

const LEADERS_SHOWN: usize = 10;
const ERRORS_SHOWN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    Quit,
    Paint { x: usize, y: usize, color: u32 },
    Visibility(bool),
    /// Farm the other berry from now on.
    SwitchFarming,
    Redraw,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    QuitModal,
}

#[derive(Debug)]
pub struct UiState {
    mode: Mode,
    width: usize,
    height: usize,
    cursor: (usize, usize),
    palette_idx: usize,
    /// While on, every cursor move paints the cell it lands on.
    pen: bool,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

impl UiState {
    pub fn new(width: usize, height: usize) -> Self {
        UiState {
            mode: Mode::Normal,
            width,
            height,
            cursor: (width / 2, height / 2),
            palette_idx: 0,
            pen: false,
            terminal: None,
        }
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.cursor
    }

    pub fn color(&self) -> u32 {
        PALETTE[self.palette_idx]
    }

    pub fn pen(&self) -> bool {
        self.pen
    }

    fn paint_here(&self) -> UserEvent {
        let (x, y) = self.cursor;
        UserEvent::Paint {
            x,
            y,
            color: self.color(),
        }
    }

    fn move_cursor(&mut self, dx: isize, dy: isize) -> UserEvent {
        let (x, y) = self.cursor;
        let x = x.saturating_add_signed(dx).min(self.width.saturating_sub(1));
        let y = y.saturating_add_signed(dy).min(self.height.saturating_sub(1));
        let moved = (x, y) != self.cursor;
        self.cursor = (x, y);
        if self.pen && moved {
            self.paint_here()
        } else {
            UserEvent::Redraw
        }
    }
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<io::Result<Event>>;

/// Terminal input read on a dedicated thread, since `event::read` blocks.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let event = event::read();
            let failed = event.is_err();
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    match input_events.recv().await {
        Some(event) => Ok(event?),
        None => Err(eyre!("terminal input stream closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    match event {
        Event::FocusGained => Some(UserEvent::Visibility(true)),
        Event::FocusLost => Some(UserEvent::Visibility(false)),
        Event::Resize(..) => Some(UserEvent::Redraw),
        Event::Key(key) if key.kind == KeyEventKind::Press => interpret_key(state, key),
        _ => None,
    }
}

fn interpret_key(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    // Raw mode swallows SIGINT.
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    if state.mode == Mode::QuitModal {
        return match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        };
    }
    let event = match key.code {
        KeyCode::Left | KeyCode::Char('h') => state.move_cursor(-1, 0),
        KeyCode::Right | KeyCode::Char('l') => state.move_cursor(1, 0),
        KeyCode::Up | KeyCode::Char('k') => state.move_cursor(0, -1),
        KeyCode::Down | KeyCode::Char('j') => state.move_cursor(0, 1),
        KeyCode::Char(' ') | KeyCode::Enter => state.paint_here(),
        KeyCode::Char(']') | KeyCode::Tab => {
            state.palette_idx = (state.palette_idx + 1) % PALETTE.len();
            UserEvent::Redraw
        }
        KeyCode::Char('[') | KeyCode::BackTab => {
            state.palette_idx = (state.palette_idx + PALETTE.len() - 1) % PALETTE.len();
            UserEvent::Redraw
        }
        KeyCode::Char('p') => {
            state.pen = !state.pen;
            if state.pen {
                state.paint_here()
            } else {
                UserEvent::Redraw
            }
        }
        KeyCode::Char('f') => UserEvent::SwitchFarming,
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            UserEvent::Redraw
        }
        _ => return None,
    };
    Some(event)
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableFocusChange
    )?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableFocusChange,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &EngineSnapshot) -> Result<()> {
    if let Some(mut term) = state.terminal.take() {
        let res = term.draw(|f| ui(f, state, snap)).map(|_| ());
        state.terminal = Some(term);
        res?;
    }
    Ok(())
}

pub fn rgb(color: u32) -> Color {
    Color::Rgb((color >> 16) as u8, (color >> 8) as u8, color as u8)
}

pub fn format_pixels(balance: Option<f64>) -> String {
    match balance {
        Some(balance) => format!("{balance:.3}"),
        None => String::from("-"),
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &EngineSnapshot) {
    f.render_widget(Clear, f.area());
    let board_height = snap.height.div_ceil(2) as u16 + 2;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(board_height),
            Constraint::Length(ERRORS_SHOWN as u16 + 2),
            Constraint::Length(3),
        ])
        .split(f.area());
    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(snap.width as u16 + 2),
            Constraint::Min(30),
        ])
        .split(chunks[1]);

    draw_top(f, chunks[0], state, snap);
    draw_board(f, middle[0], state, snap);
    draw_side(f, middle[1], state, snap);
    draw_errors(f, chunks[2], snap);
    draw_help(f, chunks[3]);
    if state.mode == Mode::QuitModal {
        let area = centered_rect(30, 20, f.area());
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Quit? (Y/N)")
                .block(Block::default().borders(Borders::ALL).title("Confirm Quit")),
            area,
        );
    }
}

fn draw_top(f: &mut Frame, area: Rect, state: &UiState, snap: &EngineSnapshot) {
    let sync = match (snap.visible, snap.polling) {
        (_, false) => "idle",
        (false, true) => "hidden",
        (true, true) => "live",
    };
    let line = format!(
        "{} | queued {} | sending {} | sync {} | {}",
        snap.account_id, snap.queued, snap.in_flight, sync, snap.status
    );
    let brush = Span::styled("  ", Style::default().bg(rgb(state.color())));
    let pen = if state.pen { " pen" } else { "" };
    let paragraph = Paragraph::new(vec![
        Line::from(line),
        Line::from(vec![Span::raw("brush "), brush, Span::raw(pen)]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(paragraph, area);
}

// Two board rows per terminal line: the upper half block takes the top pixel as
// foreground and the lower pixel as background.
fn draw_board(f: &mut Frame, area: Rect, state: &UiState, snap: &EngineSnapshot) {
    let pixel = |x: usize, y: usize| -> Color {
        if (x, y) == state.cursor {
            return rgb(state.color());
        }
        snap.cell(x, y)
            .map(|cell| rgb(cell.color))
            .unwrap_or(Color::Black)
    };
    let mut lines = Vec::with_capacity(snap.height.div_ceil(2));
    for y in (0..snap.height).step_by(2) {
        let spans: Vec<Span> = (0..snap.width)
            .map(|x| {
                let mut style = Style::default().fg(pixel(x, y)).bg(pixel(x, y + 1));
                if state.cursor.0 == x && (state.cursor.1 == y || state.cursor.1 == y + 1) {
                    style = style.add_modifier(Modifier::SLOW_BLINK);
                }
                Span::styled("▀", style)
            })
            .collect();
        lines.push(Line::from(spans));
    }
    let board = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Board"));
    f.render_widget(board, area);
}

fn draw_side(f: &mut Frame, area: Rect, state: &UiState, snap: &EngineSnapshot) {
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(3)])
        .split(area);

    let (cx, cy) = state.cursor;
    let under_cursor = match snap.cell(cx, cy) {
        Some(cell) => format!(
            "#{:06x} owner {}{}",
            cell.color,
            cell.owner,
            if cell.pending { " (pending)" } else { "" }
        ),
        None => String::from("-"),
    };
    let account = vec![
        Line::from(format!(
            "index {} | pixels {}",
            snap.account_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| String::from("-")),
            snap.num_pixels
        )),
        Line::from(format!(
            "avocado {}",
            format_pixels(snap.avocado)
        )),
        Line::from(format!(
            "banana {}",
            format_pixels(snap.banana)
        )),
        Line::from(format!("farming {}", snap.farming_preference)),
        Line::from(format!("({cx}, {cy}) {under_cursor}")),
    ];
    f.render_widget(
        Paragraph::new(account).block(Block::default().borders(Borders::ALL).title("Account")),
        side[0],
    );

    let leaders: Vec<Line> = snap
        .leaderboard
        .iter()
        .take(LEADERS_SHOWN)
        .enumerate()
        .map(|(rank, entry)| {
            let name = entry
                .account_id
                .clone()
                .unwrap_or_else(|| format!("#{}", entry.owner));
            Line::from(format!("{:>2}. {:<20} {}", rank + 1, name, entry.pixels))
        })
        .collect();
    f.render_widget(
        Paragraph::new(leaders).block(Block::default().borders(Borders::ALL).title("Leaderboard")),
        side[1],
    );
}

fn draw_errors(f: &mut Frame, area: Rect, snap: &EngineSnapshot) {
    let lines: Vec<Line> = if snap.errors.is_empty() {
        vec![Line::from("No errors")]
    } else {
        snap.errors
            .iter()
            .rev()
            .take(ERRORS_SHOWN)
            .map(|e| Line::from(e.clone()))
            .collect()
    };
    let color = if snap.errors.is_empty() {
        Color::Green
    } else {
        Color::Red
    };
    let errors = Paragraph::new(lines)
        .style(Style::default().fg(color))
        .block(Block::default().borders(Borders::ALL).title("Errors"));
    f.render_widget(errors, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "arrows/hjkl move | space paint | [ ] color | p pen | f farm | q/Esc quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
