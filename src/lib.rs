//! Pull-based metric collection: instruments record into per-series
//! accumulators, a controller sweeps them into checkpoint sets on demand,
//! and exporters read the last completed set.

pub mod aggregator;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod context;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod labels;
pub mod meter;
pub mod number;
pub mod selector;
pub mod temporality;
pub mod util;
pub mod view;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::aggregator::{AggregationKind, Aggregator, AggregatorConfig, HistogramConfig, SketchConfig};
    pub use crate::clock::{Clock, MockClock, SystemClock};
    pub use crate::config::{ConfigSource, Settings, load_settings};
    pub use crate::context::Context;
    pub use crate::controller::{ControllerConfig, ControllerConfigBuilder, PullController};
    pub use crate::descriptor::{Descriptor, InstrumentKind, Library};
    pub use crate::error::{MetricsError, Result};
    pub use crate::export::{Record, RecordMap};
    pub use crate::labels::{KeyValue, LabelSet};
    pub use crate::meter::{Counter, Meter, UpDownCounter, ValueRecorder};
    pub use crate::number::{Number, NumberKind};
    pub use crate::selector::{AggregatorSelector, SimpleSelector};
    pub use crate::temporality::{ExportKindSelector, Temporality, TemporalitySelector};
    pub use crate::view::{View, ViewRegistry};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
