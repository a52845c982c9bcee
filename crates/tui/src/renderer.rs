use std::io::stdout;
use std::time::Duration;

use anyhow::Result;
use callpath_core::views::{TreeLine, tree_lines};
use callpath_core::{CallProfiler, StatsSort, Statistics};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Table, Tabs},
};

const SCROLL_PAGE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Tree,
    Statistics,
}

impl Tab {
    fn toggle(self) -> Self {
        match self {
            Tab::Tree => Tab::Statistics,
            Tab::Statistics => Tab::Tree,
        }
    }

    fn index(self) -> usize {
        match self {
            Tab::Tree => 0,
            Tab::Statistics => 1,
        }
    }
}

/// Viewer state, kept apart from the terminal so key handling is testable.
struct App {
    tab: Tab,
    lines: Vec<TreeLine>,
    stats: Statistics,
    sort: StatsSort,
    ascending: bool,
    indent_width: usize,
    tree_scroll: usize,
    stats_scroll: usize,
    quit: bool,
}

impl App {
    fn new(profiler: &CallProfiler) -> Self {
        let config = profiler.config();
        Self {
            tab: Tab::Tree,
            lines: tree_lines(profiler.tree()),
            stats: profiler.statistics(),
            sort: config.sort,
            ascending: config.ascending,
            indent_width: config.indent_width,
            tree_scroll: 0,
            stats_scroll: 0,
            quit: false,
        }
    }

    fn row_count(&self) -> usize {
        match self.tab {
            Tab::Tree => self.lines.len(),
            Tab::Statistics => self.stats.entries.len(),
        }
    }

    fn scroll_mut(&mut self) -> &mut usize {
        match self.tab {
            Tab::Tree => &mut self.tree_scroll,
            Tab::Statistics => &mut self.stats_scroll,
        }
    }

    fn scroll_by(&mut self, delta: isize) {
        let max = self.row_count().saturating_sub(1);
        let scroll = self.scroll_mut();
        *scroll = scroll.saturating_add_signed(delta).min(max);
    }

    fn resort(&mut self) {
        self.stats.sort_by(self.sort, self.ascending);
        self.stats_scroll = 0;
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Tab | KeyCode::BackTab => self.tab = self.tab.toggle(),
            KeyCode::Char('s') => {
                self.sort = self.sort.next();
                self.resort();
            }
            KeyCode::Char('r') => {
                self.ascending = !self.ascending;
                self.resort();
            }
            KeyCode::Up | KeyCode::Char('k') => self.scroll_by(-1),
            KeyCode::Down | KeyCode::Char('j') => self.scroll_by(1),
            KeyCode::PageUp => self.scroll_by(-(SCROLL_PAGE as isize)),
            KeyCode::PageDown => self.scroll_by(SCROLL_PAGE as isize),
            KeyCode::Home => *self.scroll_mut() = 0,
            KeyCode::End => *self.scroll_mut() = self.row_count().saturating_sub(1),
            _ => {}
        }
    }

    fn draw(&self, frame: &mut Frame<'_>) {
        let [tabs_area, body, footer] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .areas(frame.area());

        let tabs = Tabs::new(vec!["Tree", "Statistics"])
            .select(self.tab.index())
            .style(Style::default().fg(Color::White).bg(Color::DarkGray))
            .highlight_style(Style::default().fg(Color::Green).add_modifier(Modifier::BOLD));
        frame.render_widget(tabs, tabs_area);

        match self.tab {
            Tab::Tree => self.draw_tree(frame, body),
            Tab::Statistics => self.draw_stats(frame, body),
        }

        let order = if self.ascending { "asc" } else { "desc" };
        let help = format!(
            " {} calls | sort: {} ({order}) | Tab switch | s sort | r reverse | ↑↓ scroll | q quit ",
            self.stats.total_calls(),
            self.sort.label(),
        );
        frame.render_widget(
            Paragraph::new(help).style(Style::default().fg(Color::Black).bg(Color::Gray)),
            footer,
        );
    }

    fn draw_tree(&self, frame: &mut Frame<'_>, area: Rect) {
        let lines: Vec<Line<'_>> = self
            .lines
            .iter()
            .skip(self.tree_scroll)
            .map(|line| {
                let indent = " ".repeat(line.depth.saturating_sub(1) * self.indent_width);
                Line::from(vec![
                    Span::raw(indent),
                    Span::styled(line.identity.as_str(), Style::default().fg(Color::Yellow)),
                    Span::raw(format!(
                        "  {:.3} ms  x{}",
                        line.total_ms, line.call_count
                    )),
                ])
            })
            .collect();
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Profiling Result ");
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_stats(&self, frame: &mut Frame<'_>, area: Rect) {
        let header = Row::new(vec![
            "Function Name",
            "Call Count",
            "Total Time (s)",
            "Per Call (s)",
            "Cumulative Time (s)",
            "Per Call (s)",
        ])
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));

        let rows = self.stats.entries.iter().skip(self.stats_scroll).map(|e| {
            Row::new(vec![
                e.identity.to_string(),
                e.call_count.to_string(),
                format!("{:.6}", e.total_time.as_secs_f64()),
                format!("{:.6}", e.total_per_call()),
                format!("{:.6}", e.self_time.as_secs_f64()),
                format!("{:.6}", e.self_per_call()),
            ])
        });

        let widths = [
            Constraint::Min(24),
            Constraint::Length(12),
            Constraint::Length(16),
            Constraint::Length(14),
            Constraint::Length(20),
            Constraint::Length(14),
        ];
        let title = format!(
            " {} function calls in {:.6} seconds ",
            self.stats.total_calls(),
            self.stats.total_self_time().as_secs_f64()
        );
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(table, area);
    }
}

pub fn run_tui(profiler: &CallProfiler) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(profiler);
    let outcome = event_loop(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    outcome
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    while !app.quit {
        terminal.draw(|frame| app.draw(frame))?;

        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(key.code),
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollDown => app.scroll_by(3),
                    MouseEventKind::ScrollUp => app.scroll_by(-3),
                    _ => {}
                },
                _ => {}
            }
        }
    }
    Ok(())
}
