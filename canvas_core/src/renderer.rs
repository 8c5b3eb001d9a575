//! Renderer collaborator - draws one node's slice.
//!
//! The event loop calls [`Renderer::render`] once per pass whether or not the
//! state changed. Implementations decide what to do with repeated frames.

use canvas_env::NodeId;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Draws the shared object inside this node's slice.
pub trait Renderer: Send + 'static {
    /// # Arguments
    /// * `local_x` - Column inside the slice, `None` when nothing is visible
    /// * `local_y` - Row (no vertical tiling)
    /// * `is_leader` - Whether this node currently drives the simulation
    fn render(&mut self, local_x: Option<i32>, local_y: i32, is_leader: bool) -> Result<(), RenderError>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, local_x: Option<i32>, local_y: i32, is_leader: bool) -> Result<(), RenderError> {
        (**self).render(local_x, local_y, is_leader)
    }
}

/// Discards every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _local_x: Option<i32>, _local_y: i32, _is_leader: bool) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Grid rows for a slice, `O` marking the object.
///
/// The object is clamped into the slice so a transiently out-of-range row
/// still lands on the grid. A zero-sized slice has no cells to mark.
pub fn slice_lines(width: u32, height: u32, local_x: Option<i32>, local_y: i32) -> Vec<String> {
    let cell = local_x.filter(|_| width > 0 && height > 0).map(|x| {
        (
            x.clamp(0, width as i32 - 1),
            local_y.clamp(0, height as i32 - 1),
        )
    });

    (0..height as i32)
        .map(|row| {
            (0..width as i32)
                .map(|col| if cell == Some((col, row)) { 'O' } else { '.' })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    local_x: Option<i32>,
    local_y: i32,
    is_leader: bool,
}

/// Text renderer: a `height x width` grid of `.` with `O` at the object.
///
/// Writes only when the frame differs from the previous one.
pub struct TerminalRenderer<W: Write + Send + 'static> {
    node_id: NodeId,
    width: u32,
    height: u32,
    out: W,
    last: Option<Frame>,
}

impl TerminalRenderer<std::io::Stdout> {
    pub fn stdout(node_id: NodeId, width: u32, height: u32) -> Self {
        Self::new(node_id, width, height, std::io::stdout())
    }
}

impl<W: Write + Send + 'static> TerminalRenderer<W> {
    pub fn new(node_id: NodeId, width: u32, height: u32, out: W) -> Self {
        Self {
            node_id,
            width,
            height,
            out,
            last: None,
        }
    }

    pub fn writer(&self) -> &W {
        &self.out
    }

    fn draw(&mut self, frame: Frame) -> std::io::Result<()> {
        let role = if frame.is_leader { "Leader" } else { "Follower" };
        writeln!(self.out)?;
        writeln!(self.out, "--- NODE {} (Role: {}) ---", self.node_id, role)?;

        for line in slice_lines(self.width, self.height, frame.local_x, frame.local_y) {
            writeln!(self.out, "{}", line)?;
        }

        match frame.local_x {
            Some(x) => writeln!(self.out, "Local: ({}, {})", x, frame.local_y)?,
            None => writeln!(self.out, "Local: not visible")?,
        }
        writeln!(self.out, "{}", "-".repeat(32))?;
        self.out.flush()
    }
}

impl<W: Write + Send + 'static> Renderer for TerminalRenderer<W> {
    fn render(&mut self, local_x: Option<i32>, local_y: i32, is_leader: bool) -> Result<(), RenderError> {
        let frame = Frame {
            local_x,
            local_y,
            is_leader,
        };
        if self.last == Some(frame) {
            return Ok(());
        }
        self.draw(frame)?;
        self.last = Some(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(renderer: &TerminalRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.writer().clone()).unwrap()
    }

    #[test]
    fn test_draws_object_in_grid() {
        let mut renderer = TerminalRenderer::new(NodeId(1), 4, 3, Vec::new());
        renderer.render(Some(2), 1, false).unwrap();

        let text = output(&renderer);
        assert!(text.contains("--- NODE 1 (Role: Follower) ---"));
        assert!(text.contains("....\n..O.\n....\n"));
        assert!(text.contains("Local: (2, 1)"));
    }

    #[test]
    fn test_repeated_frame_not_redrawn() {
        let mut renderer = TerminalRenderer::new(NodeId(0), 4, 2, Vec::new());
        renderer.render(None, 0, true).unwrap();
        let first = output(&renderer).len();

        renderer.render(None, 0, true).unwrap();
        assert_eq!(output(&renderer).len(), first);

        renderer.render(None, 0, false).unwrap();
        assert!(output(&renderer).len() > first);
    }

    #[test]
    fn test_slice_lines_marks_object() {
        let lines = slice_lines(3, 2, Some(1), 1);
        assert_eq!(lines, vec!["...".to_string(), ".O.".to_string()]);

        let empty = slice_lines(2, 2, None, 0);
        assert!(empty.iter().all(|row| row == ".."));
    }

    #[test]
    fn test_zero_sized_slice_does_not_panic() {
        assert!(slice_lines(0, 3, Some(4), 1).iter().all(|row| row.is_empty()));
        assert!(slice_lines(5, 0, Some(4), 1).is_empty());

        let mut renderer = TerminalRenderer::new(NodeId(2), 0, 2, Vec::new());
        renderer.render(Some(0), 0, false).unwrap();
        assert!(output(&renderer).contains("Local: (0, 0)"));
    }

    #[test]
    fn test_out_of_range_row_is_clamped() {
        let mut renderer = TerminalRenderer::new(NodeId(0), 2, 2, Vec::new());
        renderer.render(Some(0), 9, true).unwrap();

        let text = output(&renderer);
        assert!(text.contains("..\nO.\n"));
        assert!(text.contains("Role: Leader"));
    }
}
