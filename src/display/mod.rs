//! Display module for terminal output formatting.

pub mod message;

pub use message::{print_connected, print_error, print_info, MessageDisplay};
