pub mod render;

pub use render::{write_answer, write_sources, StreamPrinter};
