//! Chat transport abstractions (Telegram today, other messengers behind the same port).

pub mod port;
pub mod throttled;
pub mod types;
