use std::io::{self, Write};
use vectormind_core::state::FALLBACK_REPLY;
use vectormind_core::{ExchangeUpdate, Message, Source};

pub const INTERRUPTED_MARKER: &str = "[interrupted]";

/// Writes a streaming reply to a terminal.
///
/// Content updates carry the whole message so far; only the part that has not
/// been written yet is emitted.
pub struct StreamPrinter<W: Write> {
    out: W,
    printed: usize,
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Renders one update. Returns `true` once the exchange has ended.
    pub fn update(&mut self, update: &ExchangeUpdate) -> io::Result<bool> {
        match update {
            ExchangeUpdate::Content { content, .. } => {
                self.content(content)?;
                Ok(false)
            }
            // Printed with the final message.
            ExchangeUpdate::Sources { .. } => Ok(false),
            ExchangeUpdate::Completed(message) => {
                self.content(message.content())?;
                writeln!(self.out)?;
                write_sources(&mut self.out, message.sources())?;
                self.finish()
            }
            ExchangeUpdate::Failed { .. } => {
                if self.printed == 0 {
                    writeln!(self.out, "{FALLBACK_REPLY}")?;
                } else {
                    writeln!(self.out)?;
                }
                self.finish()
            }
            ExchangeUpdate::Cancelled(_) => {
                if self.printed > 0 {
                    writeln!(self.out)?;
                }
                writeln!(self.out, "{INTERRUPTED_MARKER}")?;
                self.finish()
            }
        }
    }

    fn content(&mut self, content: &str) -> io::Result<()> {
        if content.len() < self.printed || !content.is_char_boundary(self.printed) {
            // Not an extension of what is on screen; start a fresh line.
            writeln!(self.out)?;
            self.printed = 0;
        }
        self.out.write_all(content[self.printed..].as_bytes())?;
        self.out.flush()?;
        self.printed = content.len();
        Ok(())
    }

    fn finish(&mut self) -> io::Result<bool> {
        self.printed = 0;
        self.out.flush()?;
        Ok(true)
    }
}

/// Prints a finished reply, as returned by the non-streaming endpoint.
pub fn write_answer<W: Write>(out: &mut W, message: &Message) -> io::Result<()> {
    writeln!(out, "{}", message.content())?;
    write_sources(out, message.sources())
}

pub fn write_sources<W: Write>(out: &mut W, sources: &[Source]) -> io::Result<()> {
    if sources.is_empty() {
        return Ok(());
    }
    writeln!(out, "Sources:")?;
    for source in sources {
        writeln!(
            out,
            "  - {} (p. {}, relevance {:.2})",
            source.filename, source.page_number, source.relevance_score
        )?;
    }
    Ok(())
}
