pub mod commands;
pub mod console;
pub mod dispatcher;

pub use commands::{parse_control, ControlCommand};
pub use console::ConsoleGateway;
pub use dispatcher::Dispatcher;
