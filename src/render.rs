//! Rendering surface for the transcript
//!
//! The controller never reads anything back from the renderer; output
//! failures are logged and otherwise ignored.

use crate::controller::ChatError;
use crate::transcript::{Turn, TurnRole};
use crossterm::cursor::MoveTo;
use crossterm::style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{queue, QueueableCommand};
use std::io::{self, Write};

/// Display target for a conversation
pub trait Renderer: Send {
    /// Repaint the whole transcript
    fn render_history(&mut self, turns: &[Turn]);

    /// Echo the user turn that was just accepted, with budget annotation
    fn render_user_echo(&mut self, turn: &Turn, total_len: usize, max_context_len: usize);

    /// An assistant response is about to stream in
    fn begin_assistant(&mut self);

    /// Next piece of the in-flight assistant response
    fn render_fragment(&mut self, fragment: &str);

    /// The in-flight assistant response is complete
    fn end_assistant(&mut self);

    /// The exchange failed; nothing was committed for the assistant
    fn render_error(&mut self, error: &ChatError);

    /// Ask for the next line of input
    fn prompt(&mut self, text: &str);
}

/// Annotation shown in front of an echoed user message
#[must_use]
pub fn echo_annotation(index: u64, total_len: usize, max_context_len: usize) -> String {
    format!("[{index}|{total_len}/{max_context_len}]")
}

/// Line-oriented terminal renderer with crossterm styling
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
    title: String,
    in_response: bool,
}

impl TerminalRenderer<io::Stdout> {
    #[must_use]
    pub fn stdout(title: impl Into<String>) -> Self {
        Self::new(io::stdout(), title)
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    #[must_use]
    pub fn new(out: W, title: impl Into<String>) -> Self {
        Self {
            out,
            title: title.into(),
            in_response: false,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn role_label(&mut self, role: TurnRole) -> io::Result<()> {
        let (label, color) = match role {
            TurnRole::User => ("user", Color::Green),
            TurnRole::Assistant => ("assistant", Color::Cyan),
        };
        queue!(
            self.out,
            SetForegroundColor(color),
            SetAttribute(Attribute::Bold),
            Print(format!("{label}> ")),
            SetAttribute(Attribute::Reset),
            ResetColor,
        )
    }

    fn write_history(&mut self, turns: &[Turn]) -> io::Result<()> {
        queue!(
            self.out,
            Clear(ClearType::All),
            MoveTo(0, 0),
            SetAttribute(Attribute::Bold),
            Print(&self.title),
            SetAttribute(Attribute::Reset),
            Print("\n\n"),
        )?;
        for turn in turns {
            self.role_label(turn.role())?;
            self.out.queue(Print(turn.content()))?;
            self.out.queue(Print("\n"))?;
        }
        self.out.flush()
    }

    fn log_failure(result: io::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, "Terminal write failed");
        }
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn render_history(&mut self, turns: &[Turn]) {
        let result = self.write_history(turns);
        Self::log_failure(result);
    }

    fn render_user_echo(&mut self, turn: &Turn, total_len: usize, max_context_len: usize) {
        let annotation = echo_annotation(turn.index(), total_len, max_context_len);
        let result = self
            .role_label(turn.role())
            .and_then(|()| {
                queue!(
                    self.out,
                    SetAttribute(Attribute::Dim),
                    Print(annotation),
                    SetAttribute(Attribute::Reset),
                    Print(format!(" {}\n", turn.content())),
                )
            })
            .and_then(|()| self.out.flush());
        Self::log_failure(result);
    }

    fn begin_assistant(&mut self) {
        self.in_response = true;
        let result = self
            .role_label(TurnRole::Assistant)
            .and_then(|()| self.out.flush());
        Self::log_failure(result);
    }

    fn render_fragment(&mut self, fragment: &str) {
        let result = self
            .out
            .queue(Print(fragment))
            .map(|_| ())
            .and_then(|()| self.out.flush());
        Self::log_failure(result);
    }

    fn end_assistant(&mut self) {
        self.in_response = false;
        let result = self.out.write_all(b"\n").and_then(|()| self.out.flush());
        Self::log_failure(result);
    }

    fn render_error(&mut self, error: &ChatError) {
        let lead = if std::mem::take(&mut self.in_response) {
            "\n"
        } else {
            ""
        };
        let result = queue!(
            self.out,
            Print(lead),
            SetForegroundColor(Color::Red),
            Print(format!("error: {error}\n")),
            ResetColor,
        )
        .and_then(|()| self.out.flush());
        Self::log_failure(result);
    }

    fn prompt(&mut self, text: &str) {
        let result = queue!(
            self.out,
            SetAttribute(Attribute::Dim),
            Print(format!("{text} ")),
            SetAttribute(Attribute::Reset),
        )
        .and_then(|()| self.out.flush());
        Self::log_failure(result);
    }
}
