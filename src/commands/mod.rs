//! Voice command vocabulary, history and host forwarding

mod dispatcher;
mod history;
mod interpreter;

pub use dispatcher::CommandDispatcher;
#[cfg(test)]
pub use dispatcher::CommandSink;
pub use interpreter::{interpret, CommandParams, CommandToken};
