#![deny(clippy::all)]

mod env;
mod sync;

pub use env::env_flag;
pub use env::env_parse;
pub use env::env_string;
pub use sync::mutex_lock_or_recover;
