//! Enumeration of image/mask pairs on disk.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::{
    error::{DatasetError, DatasetResult},
    region::{RegionTable, Split},
};

/// Samples per trim group for `batch_trim`.
pub const TRIM_GROUP: usize = 16;

/// Default root of the test submission tiles.
pub const DEFAULT_TEST_ROOT: &str = "submission_data/test";

/// Default root of the training tiles.
pub const DEFAULT_TRAIN_ROOT: &str = "training_data";

/// One image with its optional mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub image_path: PathBuf,
    /// Absent in test mode.
    pub mask_path: Option<PathBuf>,
    pub id: String,
}

/// Directory layout to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `<root>/images/*.jpg` paired with `<root>/masks/*_mask.jpg`.
    Train,
    /// `<root>/<id>/<id>.tif`, no masks.
    Test,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => f.write_str("train"),
            Self::Test => f.write_str("test"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown mode '{other}' (expected train or test)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    pub root: PathBuf,
    pub mode: Mode,
    /// Keep only tiles of this geographic split (train mode only).
    pub region_split: Option<Split>,
    /// Truncate to `k * 16` samples when that many exist.
    pub batch_trim: Option<usize>,
    /// Directory checked by the overwrite filter.
    pub out_dir: Option<PathBuf>,
    /// Disable the overwrite filter.
    pub overwrite: bool,
}

impl IndexConfig {
    pub fn train(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mode: Mode::Train,
            region_split: None,
            batch_trim: None,
            out_dir: None,
            overwrite: false,
        }
    }

    pub fn test(root: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Test,
            ..Self::train(root)
        }
    }

    #[must_use]
    pub const fn with_region_split(mut self, split: Option<Split>) -> Self {
        self.region_split = split;
        self
    }

    #[must_use]
    pub const fn with_batch_trim(mut self, batch_trim: Option<usize>) -> Self {
        self.batch_trim = batch_trim;
        self
    }

    #[must_use]
    pub fn with_out_dir(mut self, out_dir: Option<PathBuf>) -> Self {
        self.out_dir = out_dir;
        self
    }

    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// Ordered, validated list of samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleIndex {
    samples: Vec<Sample>,
}

impl SampleIndex {
    /// Enumerate, filter and order the samples described by `config`.
    ///
    /// Samples are sorted by identifier. Region filtering, trimming and the
    /// overwrite filter are applied in that order.
    ///
    /// # Errors
    ///
    /// - [`DatasetError::ImageDirectoryNotFound`] / [`DatasetError::MaskDirectoryNotFound`]
    ///   when the layout is missing.
    /// - [`DatasetError::MalformedFilename`] when region filtering meets a
    ///   name without tile coordinates.
    /// - [`DatasetError::EmptyIndex`] when the overwrite filter removes every
    ///   sample.
    pub fn build(config: &IndexConfig) -> DatasetResult<Self> {
        let mut samples = match config.mode {
            Mode::Train => collect_train(&config.root)?,
            Mode::Test => collect_test(&config.root)?,
        };
        samples.sort_by(|a, b| a.id.cmp(&b.id));
        let found = samples.len();

        if let (Mode::Train, Some(split)) = (config.mode, config.region_split) {
            let table = RegionTable::for_split(split);
            let mut kept = Vec::with_capacity(samples.len());
            for sample in samples {
                if table.classify(&file_name(&sample.image_path)?)? {
                    kept.push(sample);
                }
            }
            samples = kept;
            tracing::debug!(%split, kept = samples.len(), found, "applied region split");
        }

        if let Some(k) = config.batch_trim {
            let budget = k.saturating_mul(TRIM_GROUP);
            if budget <= samples.len() {
                samples.truncate(budget);
            } else {
                tracing::debug!(budget, available = samples.len(), "batch_trim skipped");
            }
        }

        if let (false, Some(out_dir)) = (config.overwrite, config.out_dir.as_ref()) {
            let before = samples.len();
            samples.retain(|s| !out_dir.join(format!("{}.tif", s.id)).exists());
            tracing::info!(
                before,
                remaining = samples.len(),
                out_dir = %out_dir.display(),
                "filtered samples with existing outputs"
            );
            if before > 0 && samples.is_empty() {
                return Err(DatasetError::EmptyIndex {
                    out_dir: out_dir.clone(),
                });
            }
        }

        tracing::info!(
            mode = %config.mode,
            samples = samples.len(),
            root = %config.root.display(),
            "sample index built"
        );
        Ok(Self { samples })
    }

    pub const fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.id.as_str())
    }
}

fn collect_train(root: &Path) -> DatasetResult<Vec<Sample>> {
    let image_root = root.join("images");
    let mask_root = root.join("masks");
    if !image_root.is_dir() {
        return Err(DatasetError::ImageDirectoryNotFound { path: image_root });
    }
    if !mask_root.is_dir() {
        return Err(DatasetError::MaskDirectoryNotFound { path: mask_root });
    }

    let mut samples = Vec::new();
    for entry in list_dir(&image_root)? {
        let image_path = entry.into_path();
        if !image_path.is_file() || image_path.extension().and_then(|e| e.to_str()) != Some("jpg")
        {
            continue;
        }

        let name = file_name(&image_path)?;
        let mask_path = mask_root.join(name.replace("_i.jpg", "_mask.jpg"));
        if !mask_path.is_file() {
            tracing::debug!(image = %image_path.display(), "no mask found, skipping");
            continue;
        }

        let id = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name.as_str())
            .to_string();
        samples.push(Sample {
            image_path,
            mask_path: Some(mask_path),
            id,
        });
    }
    Ok(samples)
}

fn collect_test(root: &Path) -> DatasetResult<Vec<Sample>> {
    if !root.is_dir() {
        return Err(DatasetError::ImageDirectoryNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut samples = Vec::new();
    for entry in list_dir(root)? {
        let id = file_name(entry.path())?;
        let image_path = root.join(&id).join(format!("{id}.tif"));
        if !image_path.is_file() {
            tracing::debug!(entry = %entry.path().display(), "no tile image found, skipping");
            continue;
        }
        samples.push(Sample {
            image_path,
            mask_path: None,
            id,
        });
    }
    Ok(samples)
}

fn list_dir(dir: &Path) -> DatasetResult<Vec<walkdir::DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DatasetError::DirectoryReadFailed {
            path: dir.to_path_buf(),
            source: e.into(),
        })
}

fn file_name(path: &Path) -> DatasetResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DatasetError::InvalidUtf8Path {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn train_layout(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images")).unwrap();
        fs::create_dir_all(dir.path().join("masks")).unwrap();
        for name in names {
            touch(&dir.path().join("images").join(format!("{name}_i.jpg")));
            touch(&dir.path().join("masks").join(format!("{name}_mask.jpg")));
        }
        dir
    }

    #[test]
    fn pairs_are_sorted_by_id() {
        let dir = train_layout(&["f883a0_2_1", "f883a0_1_1", "d41d81_0_0"]);
        let index = SampleIndex::build(&IndexConfig::train(dir.path())).unwrap();

        let ids: Vec<&str> = index.ids().collect();
        assert_eq!(ids, vec!["d41d81_0_0_i", "f883a0_1_1_i", "f883a0_2_1_i"]);
        assert!(index.samples()[0]
            .mask_path
            .as_ref()
            .unwrap()
            .ends_with("masks/d41d81_0_0_mask.jpg"));
    }

    #[test]
    fn images_without_masks_are_excluded() {
        let dir = train_layout(&["f883a0_1_1"]);
        touch(&dir.path().join("images").join("f883a0_9_9_i.jpg"));
        touch(&dir.path().join("images").join("notes.txt"));

        let index = SampleIndex::build(&IndexConfig::train(dir.path())).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn missing_mask_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images")).unwrap();

        let err = SampleIndex::build(&IndexConfig::train(dir.path())).unwrap_err();
        assert!(matches!(err, DatasetError::MaskDirectoryNotFound { .. }));
    }

    #[test]
    fn region_split_keeps_matching_tiles() {
        let dir = train_layout(&["f883a0_1_1", "d41d81_1_1", "e52478_3_3"]);
        let config = IndexConfig::train(dir.path()).with_region_split(Some(Split::Train));

        let index = SampleIndex::build(&config).unwrap();
        let ids: Vec<&str> = index.ids().collect();
        assert_eq!(ids, vec!["e52478_3_3_i", "f883a0_1_1_i"]);
    }

    #[test]
    fn region_split_rejects_malformed_names() {
        let dir = train_layout(&["f883a0_1"]);
        let config = IndexConfig::train(dir.path()).with_region_split(Some(Split::Train));

        let err = SampleIndex::build(&config).unwrap_err();
        assert!(matches!(err, DatasetError::MalformedFilename { .. }));
    }

    #[test]
    fn test_mode_reads_nested_tifs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b").join("b.tif"));
        touch(&dir.path().join("a").join("a.tif"));
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let index = SampleIndex::build(&IndexConfig::test(dir.path())).unwrap();
        let ids: Vec<&str> = index.ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(index.samples().iter().all(|s| s.mask_path.is_none()));
    }

    #[test]
    fn empty_directory_is_not_empty_index() {
        let dir = train_layout(&[]);
        let out = tempfile::tempdir().unwrap();
        let config = IndexConfig::train(dir.path()).with_out_dir(Some(out.path().to_path_buf()));

        let index = SampleIndex::build(&config).unwrap();
        assert!(index.is_empty());
    }
}
