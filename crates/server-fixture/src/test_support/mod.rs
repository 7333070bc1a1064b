//! Test doubles for the OS-facing seams of the kill protocol.

mod mock_listeners;
mod mock_process;
mod mock_sleeper;

pub use mock_listeners::MockListenerTable;
pub use mock_process::MockProcessController;
pub use mock_sleeper::MockSleeper;
