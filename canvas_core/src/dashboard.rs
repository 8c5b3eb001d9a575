//! Canvas TUI Dashboard Module
//! ===========================
//!
//! Full-screen terminal view of one node's slice, drawn with Ratatui.
//!
//! Enable with the `dashboard` feature flag.
//!
//! Shows:
//! - Node id, role (leader highlighted) and frame counter
//! - The slice grid with the shared object
//! - Local coordinates, or "not visible"

use std::io::{self, Stdout};

use canvas_env::NodeId;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};

use crate::renderer::{slice_lines, RenderError, Renderer};

// =============================================================================
// DASHBOARD RENDERER
// =============================================================================

/// Renderer that owns the terminal for the lifetime of the node.
pub struct DashboardRenderer {
    node_id: NodeId,
    width: u32,
    height: u32,
    terminal: Terminal<CrosstermBackend<Stdout>>,
    frame_count: u64,
}

impl DashboardRenderer {
    /// Switches the terminal to the alternate screen.
    pub fn new(node_id: NodeId, width: u32, height: u32) -> io::Result<Self> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.hide_cursor()?;

        Ok(Self {
            node_id,
            width,
            height,
            terminal,
            frame_count: 0,
        })
    }

    fn ui(
        f: &mut Frame,
        node_id: NodeId,
        frame_count: u64,
        grid: &[String],
        local_x: Option<i32>,
        local_y: i32,
        is_leader: bool,
    ) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),  // Header
                Constraint::Min(3),     // Slice grid
                Constraint::Length(1),  // Footer
            ])
            .split(f.area());

        // === HEADER ===
        let (role_text, role_color) = if is_leader {
            ("LEADER", Color::Green)
        } else {
            ("FOLLOWER", Color::Cyan)
        };
        let header = Paragraph::new(Line::from(vec![
            Span::styled(format!("Node {}", node_id), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::styled(role_text, Style::default().fg(role_color).add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::raw(format!("Frame: {}", frame_count)),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));
        f.render_widget(header, chunks[0]);

        // === SLICE ===
        let lines: Vec<Line> = grid.iter().map(|row| Line::from(row.as_str())).collect();
        let slice = Paragraph::new(lines)
            .block(Block::default().title("Slice").borders(Borders::ALL));
        f.render_widget(slice, chunks[1]);

        // === FOOTER ===
        let position = match local_x {
            Some(x) => format!("Local: ({}, {})  |  Ctrl-C to quit", x, local_y),
            None => "Local: not visible  |  Ctrl-C to quit".to_string(),
        };
        let footer = Paragraph::new(position).style(Style::default().fg(Color::DarkGray));
        f.render_widget(footer, chunks[2]);
    }
}

impl Renderer for DashboardRenderer {
    fn render(&mut self, local_x: Option<i32>, local_y: i32, is_leader: bool) -> Result<(), RenderError> {
        let grid = slice_lines(self.width, self.height, local_x, local_y);
        let node_id = self.node_id;
        let frame_count = self.frame_count;

        self.terminal
            .draw(|f| Self::ui(f, node_id, frame_count, &grid, local_x, local_y, is_leader))?;
        self.frame_count += 1;
        Ok(())
    }
}

impl Drop for DashboardRenderer {
    fn drop(&mut self) {
        // Restore terminal
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
