//! Instrument identity
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::number::NumberKind;

/// The kind of instrument a measurement comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Synchronous, monotonic, adding
    Counter,
    /// Synchronous, non-monotonic, adding
    UpDownCounter,
    /// Asynchronous, monotonic, reports cumulative totals
    SumObserver,
    /// Asynchronous, non-monotonic, reports cumulative totals
    UpDownSumObserver,
    /// Synchronous, grouping
    ValueRecorder,
    /// Asynchronous, grouping
    ValueObserver,
}

impl InstrumentKind {
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::UpDownCounter | InstrumentKind::ValueRecorder
        )
    }

    pub fn is_asynchronous(&self) -> bool {
        !self.is_synchronous()
    }

    /// Adding instruments are aggregated with a sum by default
    pub fn is_adding(&self) -> bool {
        !self.is_grouping()
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, InstrumentKind::ValueRecorder | InstrumentKind::ValueObserver)
    }

    /// Monotonic instruments reject negative measurements
    pub fn is_monotonic(&self) -> bool {
        matches!(self, InstrumentKind::Counter | InstrumentKind::SumObserver)
    }

    /// Whether observations are already cumulative totals
    pub fn is_precomputed_sum(&self) -> bool {
        matches!(self, InstrumentKind::SumObserver | InstrumentKind::UpDownSumObserver)
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::UpDownCounter => "up_down_counter",
            InstrumentKind::SumObserver => "sum_observer",
            InstrumentKind::UpDownSumObserver => "up_down_sum_observer",
            InstrumentKind::ValueRecorder => "value_recorder",
            InstrumentKind::ValueObserver => "value_observer",
        };
        f.write_str(name)
    }
}

/// Identity of the library that owns an instrument
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub schema_url: Option<String>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            schema_url: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.schema_url = Some(schema_url.into());
        self
    }
}

/// Immutable description of an instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Descriptor {
    name: String,
    kind: InstrumentKind,
    number_kind: NumberKind,
    description: String,
    unit: String,
    library: Library,
}

impl Descriptor {
    pub fn new(
        name: impl Into<String>,
        kind: InstrumentKind,
        number_kind: NumberKind,
        library: Library,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            number_kind,
            description: String::new(),
            unit: String::new(),
            library,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn number_kind(&self) -> NumberKind {
        self.number_kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Copy of this descriptor presented under a different name and description.
    /// Kind and number kind are carried over unchanged.
    pub(crate) fn renamed(&self, name: Option<&str>, description: Option<&str>) -> Self {
        let mut desc = self.clone();
        if let Some(name) = name {
            desc.name = name.to_string();
        }
        if let Some(description) = description {
            desc.description = description.to_string();
        }
        desc
    }
}
