mod connection;
mod keepalive;
mod reader;
mod state;

pub use connection::{Connection, ControlFrame};
pub use keepalive::{spawn_close_on_cancel, spawn_ping_loop, spawn_status_loop};
pub use reader::Reader;
pub use state::ConnState;
