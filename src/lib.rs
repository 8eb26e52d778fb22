//! POSIX signal conformance probe
//!
//! Exercises signal masking, pending-signal coalescing and queuing, and the
//! way pending state crosses `fork` and `execve` boundaries. Every deviation
//! from the POSIX contract is fatal to the run.

pub mod boundary;
pub mod check;
pub mod config;
pub mod counter;
pub mod errors;
pub mod mask;
pub mod scenario;
pub mod signo;

// Re-export commonly used types
pub use config::{Mode, ProbeConfig};
pub use counter::{DeliveryCounter, Disposition, DELIVERIES};
pub use errors::{ProbeError, Result};
pub use mask::{MaskController, SignalSet};
pub use scenario::{Phase, Probe, ProbeRunner, Scenario};
pub use signo::SignalId;
