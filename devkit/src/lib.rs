/*!
# rackwatch devkit - fakes and harness for testing without hardware

- Scripted sensor device (readings, failures, hangs)
- Recording and failing sinks
- In-memory character display
- Mock host manager that counts campaigns
- `TestHarness` wiring all of the above into a real `PollLoop`
*/

pub mod display_stub;
pub mod hosts_stub;
pub mod sensor_stub;
pub mod sink_stub;
pub mod test_utils;

pub use display_stub::MemoryDisplay;
pub use hosts_stub::MockHostManager;
pub use sensor_stub::{ScriptedSensor, Step};
pub use sink_stub::{FailingSink, RecordingSink};
pub use test_utils::{HarnessBuilder, TestHarness};
