mod signal_handler;
pub mod telemetry;

pub use signal_handler::ShutdownSignal;
