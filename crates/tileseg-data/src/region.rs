//! Geographic train/test partitioning of tiles.
//!
//! Tile filenames look like `<prefix>_<x>_<y>_<suffix>`. A tile belongs to a
//! split when its basename contains one of the split's region ids, unless its
//! coordinates fall inside one of that region's skip zones (areas with known
//! bad labels).

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};

/// Region ids of the training scenes.
pub const TRAIN_REGION_IDS: [&str; 6] = ["f883a0", "4e7c7f", "f15272", "825a50", "f49f31", "e52478"];

/// Region ids of the held-out test scenes.
pub const TEST_REGION_IDS: [&str; 1] = ["d41d81"];

/// Which side of the geographic partition to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => f.write_str("train"),
            Self::Test => f.write_str("test"),
        }
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown split '{other}' (expected train or test)")),
        }
    }
}

/// Inclusive tile-coordinate rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipZone {
    pub x0: i64,
    pub x1: i64,
    pub y0: i64,
    pub y1: i64,
}

impl SkipZone {
    pub const fn new(x0: i64, x1: i64, y0: i64, y1: i64) -> Self {
        Self { x0, x1, y0, y1 }
    }

    pub const fn contains(&self, x: i64, y: i64) -> bool {
        self.x0 <= x && x <= self.x1 && self.y0 <= y && y <= self.y1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: String,
    pub skip_zones: Vec<SkipZone>,
}

impl Region {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            skip_zones: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_skip_zone(mut self, zone: SkipZone) -> Self {
        self.skip_zones.push(zone);
        self
    }
}

/// Ordered region lookup. The first region whose id occurs in a basename wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    pub const fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    /// The built-in table for `split`. None of the built-in regions carry
    /// skip zones yet.
    pub fn for_split(split: Split) -> Self {
        let ids: &[&str] = match split {
            Split::Train => &TRAIN_REGION_IDS,
            Split::Test => &TEST_REGION_IDS,
        };
        Self::new(ids.iter().copied().map(Region::new).collect())
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Whether `filename` belongs to this table's split.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::MalformedFilename`] when the coordinates cannot
    /// be read from the basename.
    pub fn classify(&self, filename: &str) -> DatasetResult<bool> {
        let name = basename(filename);
        let (x, y) = tile_coordinates(name)?;

        let Some(region) = self.regions.iter().find(|r| name.contains(r.id.as_str())) else {
            return Ok(false);
        };
        Ok(!region.skip_zones.iter().any(|zone| zone.contains(x, y)))
    }
}

/// Classify `filename` against the built-in table for `split`.
pub fn classify(filename: &str, split: Split) -> DatasetResult<bool> {
    RegionTable::for_split(split).classify(filename)
}

/// Parse `(x, y)` from a `<prefix>_<x>_<y>_<suffix>` basename.
pub fn tile_coordinates(name: &str) -> DatasetResult<(i64, i64)> {
    let fields: Vec<&str> = name.split('_').collect();
    if fields.len() < 4 {
        return Err(DatasetError::MalformedFilename {
            name: name.to_string(),
            reason: format!("expected 4 '_'-separated fields, found {}", fields.len()),
        });
    }

    let parse = |field: &str, axis: &str| {
        field
            .parse::<i64>()
            .map_err(|_| DatasetError::MalformedFilename {
                name: name.to_string(),
                reason: format!("{axis} coordinate '{field}' is not an integer"),
            })
    };
    Ok((parse(fields[1], "x")?, parse(fields[2], "y")?))
}

fn basename(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_zone() -> RegionTable {
        RegionTable::new(vec![
            Region::new("f883a0").with_skip_zone(SkipZone::new(10, 20, 5, 8)),
            Region::new("4e7c7f"),
        ])
    }

    #[test]
    fn builtin_tables_are_disjoint() {
        assert!(classify("f883a0_3_4_i.jpg", Split::Train).unwrap());
        assert!(!classify("f883a0_3_4_i.jpg", Split::Test).unwrap());
        assert!(classify("d41d81_3_4_i.jpg", Split::Test).unwrap());
        assert!(!classify("d41d81_3_4_i.jpg", Split::Train).unwrap());
    }

    #[test]
    fn unknown_region_is_rejected() {
        assert!(!classify("abcdef_1_1_i.jpg", Split::Train).unwrap());
    }

    #[test]
    fn skip_zone_truth_table() {
        let table = table_with_zone();

        assert!(!table.classify("f883a0_10_5_i.jpg").unwrap());
        assert!(!table.classify("f883a0_20_8_i.jpg").unwrap());
        assert!(!table.classify("f883a0_15_6_i.jpg").unwrap());
        // Only one axis inside the zone.
        assert!(table.classify("f883a0_15_9_i.jpg").unwrap());
        assert!(table.classify("f883a0_21_6_i.jpg").unwrap());
        // Zones belong to their own region.
        assert!(table.classify("4e7c7f_15_6_i.jpg").unwrap());
    }

    #[test]
    fn directories_are_ignored() {
        let table = table_with_zone();
        assert!(!table.classify("/data/images/f883a0_12_7_i.jpg").unwrap());
    }

    #[test]
    fn malformed_names_fail() {
        let short = classify("f883a0_12.jpg", Split::Train).unwrap_err();
        assert!(matches!(short, DatasetError::MalformedFilename { .. }));

        let alpha = classify("f883a0_ab_7_i.jpg", Split::Train).unwrap_err();
        assert!(alpha.to_string().contains("'ab'"));
    }

    #[test]
    fn split_parses_case_insensitively() {
        assert_eq!("TRAIN".parse::<Split>().unwrap(), Split::Train);
        assert!("val".parse::<Split>().is_err());
    }
}
