use std::{fmt, str::FromStr};

use anyhow::anyhow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
}

/// Adding a variant here and to `ALL` is all that is needed to add a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollectionKind {
    Sidewalk,
    CurbRamp,
    Crossing,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 3] = [
        CollectionKind::Sidewalk,
        CollectionKind::CurbRamp,
        CollectionKind::Crossing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Sidewalk => "sidewalk",
            CollectionKind::CurbRamp => "curb-ramp",
            CollectionKind::Crossing => "crossing",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            CollectionKind::Sidewalk => "sidewalk-collection.json",
            CollectionKind::CurbRamp => "curbramp-collection.json",
            CollectionKind::Crossing => "crossing-collection.json",
        }
    }

    pub fn default_geometry(&self) -> GeometryKind {
        match self {
            CollectionKind::Sidewalk => GeometryKind::LineString,
            CollectionKind::CurbRamp => GeometryKind::Point,
            CollectionKind::Crossing => GeometryKind::LineString,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollectionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        CollectionKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                anyhow!(
                    "Unknown collection '{}', expected one of: {}",
                    s,
                    CollectionKind::ALL.map(|kind| kind.name()).join(", ")
                )
            })
    }
}
