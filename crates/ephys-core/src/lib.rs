//! Ephys-Core: signal model and event time-locking for electrophysiology
//!
//! Multi-channel LFP, MUA and spike recordings as `(channel, time, trial)`
//! arrays with an explicit time axis, cut into event-aligned epochs.

pub mod channel;
pub mod error;
pub mod events;
pub mod literal;
pub mod modality;
pub mod preprocess;
pub mod signal;
pub mod timelocked;
pub mod trials;

pub use channel::{ChannelInfo, ChannelTable};
pub use error::{EphysError, EphysResult};
pub use events::EventTable;
pub use literal::Literal;
pub use modality::{Modalities, Modality};
pub use signal::Signal;
pub use timelocked::TimeLockedSeries;
pub use trials::{ConditionTrials, LockDuration};
