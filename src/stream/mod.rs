//! Live demultiplexing of child process output into line and chunk events.

mod ansi;
mod demux;
mod error;
mod events;
mod splitter;

pub use ansi::*;
pub use demux::*;
pub use error::*;
pub use events::*;
pub use splitter::*;
