mod ping;

pub(crate) use ping::{PingStats, PongError};
