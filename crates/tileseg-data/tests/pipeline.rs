use std::{collections::HashSet, fs, path::Path};

use burn::backend::NdArray;
use image::{GrayImage, RgbImage};
use tileseg_data::{
    load, DatasetError, IndexConfig, LoaderConfig, SampleIndex, SplitMode, TrainTransform,
    ValTransform,
};

type TestBackend = NdArray;

/// Write `n` synthetic tile pairs named `f883a0_<i>_<i>_i.jpg`.
fn write_tiles(root: &Path, n: usize) {
    let images = root.join("images");
    let masks = root.join("masks");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&masks).unwrap();

    for i in 0..n {
        let shade = (i * 10 % 255) as u8;
        RgbImage::from_pixel(24, 24, image::Rgb([shade, 128, 255 - shade]))
            .save(images.join(format!("f883a0_{i}_{i}_i.jpg")))
            .unwrap();
        GrayImage::from_fn(24, 24, |x, _| image::Luma([if x < 12 { 0 } else { 255 }]))
            .save(masks.join(format!("f883a0_{i}_{i}_mask.jpg")))
            .unwrap();
    }
}

fn small_crops(config: LoaderConfig) -> LoaderConfig {
    LoaderConfig {
        train_transform: TrainTransform {
            crop_size: 16,
            ..TrainTransform::default()
        },
        val_transform: ValTransform { crop_size: 16 },
        ..config
    }
}

#[test]
fn random_split_covers_sixteen_and_four_disjoint_samples() {
    let dir = tempfile::tempdir().unwrap();
    write_tiles(dir.path(), 20);
    let index = SampleIndex::build(&IndexConfig::train(dir.path())).unwrap();

    let config = small_crops(LoaderConfig {
        batch_size: 4,
        split: SplitMode::Random { seed: 11 },
        ..LoaderConfig::default()
    });
    let loaders = load::<TestBackend>(index, &config, &Default::default()).unwrap();
    let val = loaders.val.expect("random split has validation");

    let mut train_ids = HashSet::new();
    for batch in loaders.train.iter() {
        let batch = batch.unwrap();
        assert_eq!(batch.images.dims(), [4, 3, 16, 16]);
        assert_eq!(batch.masks.as_ref().unwrap().dims(), [4, 1, 16, 16]);
        train_ids.extend(batch.ids);
    }

    let mut val_ids = HashSet::new();
    for batch in val.iter() {
        let batch = batch.unwrap();
        assert_eq!(batch.batch_size(), 1);
        val_ids.extend(batch.ids);
    }

    assert_eq!(train_ids.len(), 16);
    assert_eq!(val_ids.len(), 4);
    assert!(train_ids.is_disjoint(&val_ids));
}

#[test]
fn unshuffled_loader_is_stable_across_passes_and_workers() {
    let dir = tempfile::tempdir().unwrap();
    write_tiles(dir.path(), 10);
    let index = SampleIndex::build(&IndexConfig::train(dir.path())).unwrap();

    let ids_of = |workers: usize| {
        let config = small_crops(LoaderConfig {
            batch_size: 8,
            num_workers: workers,
            split: SplitMode::Random { seed: 5 },
            ..LoaderConfig::default()
        });
        let loaders = load::<TestBackend>(index.clone(), &config, &Default::default()).unwrap();
        let val = loaders.val.unwrap();
        (0..2)
            .map(|_| {
                val.iter()
                    .flat_map(|batch| batch.unwrap().ids)
                    .collect::<Vec<String>>()
            })
            .collect::<Vec<_>>()
    };

    let threaded = ids_of(3);
    let inline = ids_of(0);

    assert_eq!(threaded[0].len(), 2);
    assert_eq!(threaded[0], threaded[1]);
    assert_eq!(threaded, inline);
}

#[test]
fn shuffled_loader_yields_every_sample_once_per_pass() {
    let dir = tempfile::tempdir().unwrap();
    write_tiles(dir.path(), 7);
    let index = SampleIndex::build(&IndexConfig::train(dir.path())).unwrap();

    let config = LoaderConfig {
        batch_size: 3,
        num_workers: 2,
        prefetch: 1,
        ..LoaderConfig::default()
    };
    let loaders = load::<TestBackend>(index, &config, &Default::default()).unwrap();

    for _ in 0..2 {
        let mut ids: Vec<String> = loaders
            .train
            .iter()
            .flat_map(|batch| batch.unwrap().ids)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 7);
    }
}

#[test]
fn overwrite_filter_resumes_until_nothing_is_left() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_tiles(dir.path(), 4);
    let config =
        IndexConfig::train(dir.path()).with_out_dir(Some(out.path().to_path_buf()));

    fs::write(out.path().join("f883a0_1_1_i.tif"), b"").unwrap();
    fs::write(out.path().join("f883a0_3_3_i.tif"), b"").unwrap();

    let index = SampleIndex::build(&config).unwrap();
    let ids: Vec<&str> = index.ids().collect();
    assert_eq!(ids, vec!["f883a0_0_0_i", "f883a0_2_2_i"]);

    for id in ids {
        fs::write(out.path().join(format!("{id}.tif")), b"").unwrap();
    }
    let err = SampleIndex::build(&config).unwrap_err();
    assert!(matches!(err, DatasetError::EmptyIndex { .. }));

    let everything = SampleIndex::build(&config.with_overwrite(true)).unwrap();
    assert_eq!(everything.len(), 4);
}

#[test]
fn batch_trim_keeps_whole_groups_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_tiles(dir.path(), 40);

    let trimmed =
        SampleIndex::build(&IndexConfig::train(dir.path()).with_batch_trim(Some(2))).unwrap();
    assert_eq!(trimmed.len(), 32);

    let untouched =
        SampleIndex::build(&IndexConfig::train(dir.path()).with_batch_trim(Some(3))).unwrap();
    assert_eq!(untouched.len(), 40);
}
