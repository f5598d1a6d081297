//! Shared test mocks and utilities for Chronicle.

mod bus;
mod clock;
mod snapshot;
mod store;
mod tally;

pub use bus::{
    FailingReadModelBuilder, ObservableReadModelBuilder, RecordingBus, RecordingReadModelBuilder,
};
pub use clock::FixedClock;
pub use snapshot::RecordingSnapshotRepository;
pub use store::{
    CallLog, FailingEventStore, FailingManifest, RecordingEventStore, RecordingManifest,
};
pub use tally::{AddToTally, SnapshotTally, Tally, TallyEvent, TallyEventKind, stored_events};
