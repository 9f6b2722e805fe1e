//! Operator command listener.

mod server;

pub use server::{CommandListener, ListenerError, PickCommand, DEFAULT_LISTENER_ADDR};
