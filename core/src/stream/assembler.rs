use super::interpreter::Event;
use crate::state::Message;

/// What an applied event changed, so the caller knows which notification to
/// raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Content,
    Sources,
    Completed,
    Failed(String),
    Ignored,
}

/// Folds events into the in-flight assistant message.
#[derive(Debug)]
pub struct Assembler {
    message: Message,
    finished: bool,
}

impl Assembler {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            finished: false,
        }
    }

    pub fn apply(&mut self, event: Event) -> Step {
        if self.finished {
            return Step::Ignored;
        }
        match event {
            Event::ContentDelta(delta) => {
                self.message.append(&delta);
                Step::Content
            }
            Event::SourceSet(sources) => {
                self.message.replace_sources(sources);
                Step::Sources
            }
            Event::Complete => {
                self.message.complete();
                self.finished = true;
                Step::Completed
            }
            Event::StreamError(reason) => {
                self.finished = true;
                Step::Failed(reason)
            }
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    /// True once a completion or error event has been applied.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
