//! Synchronized sampling
//!
//! - [`record`]: field values and the per-tick [`SampleRecord`]
//! - [`clock`]: monotonic and manual time sources
//! - [`session`]: the tick loop, termination policies and stepped phases

pub mod clock;
pub mod record;
pub mod session;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use record::{FieldValue, SampleRecord};
pub use session::{
    FlagPoll, Phase, RecordSink, SamplingSession, TerminationPolicy, TickSource,
};
