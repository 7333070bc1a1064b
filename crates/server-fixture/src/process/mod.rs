mod controller;
mod supervisor;

pub use controller::KillOutcome;
pub use controller::ProcessController;
pub use controller::UnixProcessController;
pub use supervisor::ExitEvent;
pub use supervisor::ServerProcess;
