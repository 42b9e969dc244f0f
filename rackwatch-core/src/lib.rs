//! rackwatch core - the sensor polling loop and everything it drives.
//!
//! One tick reads the sensor through [`SensorSource`], classifies the
//! reading against the configured threshold, fans the resulting
//! [`Sample`] out to every registered [`Sink`] and finally asks the
//! [`ShutdownCoordinator`] whether the rack has to be powered down.
//!
//! Hardware, storage and network adapters live in `rackwatch-monitor`;
//! this crate only defines the seams they plug into.

pub mod classifier;
pub mod display;
pub mod models;
pub mod poll;
pub mod sensor;
pub mod shutdown;
pub mod sinks;
pub mod state;

pub use classifier::classify;
pub use display::{CharacterDisplay, DisplayError, DisplaySink};
pub use models::{Reading, Sample, Status};
pub use poll::{LoopExit, PollConfig, PollLoop, TickOutcome};
pub use sensor::{RawReading, SensorDevice, SensorError, SensorSource};
pub use shutdown::{
    CampaignReport, CoordinatorState, HostManager, HostOutcome, ShutdownCoordinator,
    ShutdownError, Verdict,
};
pub use sinks::{FanOutReport, HealthBoard, Sink, SinkError, SinkHealth, SinkSet};
pub use state::LatestSample;
