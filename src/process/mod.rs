//! Package-manager script process supervision.

mod command;
mod error;
mod state;
mod supervisor;

pub use command::*;
pub use error::*;
pub use state::*;
pub use supervisor::*;
