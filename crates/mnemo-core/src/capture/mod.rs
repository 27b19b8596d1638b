//! Deciding when to capture and running the capture.

pub mod coordinator;
pub mod monitor;
pub mod session;

pub use coordinator::{CaptureCoordinator, CaptureHandle, CaptureOutcome, CaptureSettings, Confirmer};
pub use monitor::{FlagStore, FlagStoreDyn, MemoryFlagStore, Signal, ThresholdMonitor};
pub use session::{SessionState, TranscriptBuffer};
