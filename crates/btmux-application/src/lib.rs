//! Application layer: the device use case, the optimization cycle, and the
//! ports through which the surrounding platform plugs in.

pub mod cycle;
pub mod ports;
pub mod usecase;

pub use cycle::{CycleReport, CycleScheduler, SessionFailure};
pub use ports::{
    DeviceEventListener, FixedLoadEstimator, ListenerRegistry, SystemLoadEstimator,
    TransportCommand,
};
pub use usecase::{AdmissionOutcome, DeviceUseCase};
