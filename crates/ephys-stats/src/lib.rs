//! Ephys-Stats: incremental statistics over time-locked recordings
//!
//! Statistics fold signals one recording at a time, persist to disk and are
//! grouped into keyed summaries across sessions and cortical areas.

pub mod alignment;
pub mod config;
pub mod persist;
pub mod spectrum;
pub mod statistic;
pub mod summary;
pub mod transform;

pub use alignment::{alignment_summary, LaminarAlignment};
pub use config::{AlignmentConfig, FrequencyBand, SpectralConfig, TaperConfig, TaperWindow};
pub use persist::ArrayTable;
pub use spectrum::{PowerSpectrum, Spectrogram, SpectrogramView};
pub use statistic::{ChannelStatistic, SampleAxis, Statistic, StatisticData};
pub use summary::{SignalBundle, Summary};
pub use transform::{FftTransform, FrequencyTransform};
