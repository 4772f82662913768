use std::sync::Arc;

use burn::data::dataset::Dataset;
use derive_new::new;
use image::GrayImage;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::{Mode, RunConfig};
use crate::error::{Error, Result};
use crate::imaging::ImageObject;
use crate::measurements::best_f1_threshold;
use crate::patches::{
    Window, chunk_indices, chunk_indices_by_index, crop, flip_cols, flip_rows, mirrored_crop,
};

/// How windows are placed on an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sampling {
    /// Windows centered on every `stride`-th pixel whose working intensity
    /// reaches `threshold`.
    Estimated { threshold: u8, stride: usize },
    /// Regular tiling covering the whole image.
    Grid { offset: [usize; 2] },
}

#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchIndex {
    pub image_id: usize,
    pub window: Window,
}

/// One training sample.
///
/// `input` holds `input_shape = [channels, rows, cols]` intensities in
/// `[0, 1]`; `label` and `mask` are `label_shape` sized and row-major.
#[derive(new, Clone, Debug)]
pub struct PatchItem {
    pub input: Vec<f32>,
    pub input_shape: [usize; 3],
    pub label: Vec<i64>,
    pub mask: Vec<bool>,
    pub label_shape: [usize; 2],
    pub clip: [usize; 4],
    /// Working-array level that best separates the window's truth, when
    /// threshold targets are enabled.
    pub threshold: Option<u8>,
}

/// Slices a set of images into labelled windows.
#[derive(Clone, Debug)]
pub struct PatchDataset {
    images: Arc<Vec<ImageObject>>,
    indices: Vec<PatchIndex>,
    mode: Mode,
    expand_by: [usize; 2],
    input_grid: usize,
    threshold_targets: bool,
}

impl PatchDataset {
    /// Loads and preprocesses every image in `images` and places windows on it.
    /// With `shuffle` set the window order is shuffled with that seed.
    pub fn new(
        conf: &RunConfig,
        images: &[String],
        mode: Mode,
        sampling: Sampling,
        shuffle: Option<u64>,
    ) -> Result<Self> {
        let objects = images
            .iter()
            .map(|file| load_image_object(conf, file))
            .collect::<Result<Vec<_>>>()?;

        let dataset = Self::from_objects(
            objects,
            mode,
            sampling,
            conf.patches.patch_shape,
            conf.patches.expand_by,
            conf.input_grid(),
            shuffle,
        )?;
        tracing::info!("{:?} patches: {}", mode, dataset.len());

        Ok(dataset)
    }

    /// Builds a dataset from already loaded image objects.
    pub fn from_objects(
        objects: Vec<ImageObject>,
        mode: Mode,
        sampling: Sampling,
        patch_shape: [usize; 2],
        expand_by: [usize; 2],
        input_grid: usize,
        shuffle: Option<u64>,
    ) -> Result<Self> {
        let mut indices = Vec::new();

        for (image_id, object) in objects.iter().enumerate() {
            let shape = object.shape();
            if shape[0] < patch_shape[0] || shape[1] < patch_shape[1] {
                return Err(Error::ShapeMismatch {
                    expected: patch_shape,
                    actual: shape,
                });
            }
            if object.ground_truth.is_none() {
                return Err(Error::MissingGroundTruth(object.file_name.clone()));
            }

            let windows = match sampling {
                Sampling::Estimated { threshold, stride } => {
                    let estimate = object.estimate(threshold);
                    let centers = estimate
                        .enumerate_pixels()
                        .filter(|(_, _, p)| p[0] == 255)
                        .map(|(x, y, _)| (y as usize, x as usize))
                        .step_by(stride.max(1));
                    chunk_indices_by_index(shape, patch_shape, centers)
                }
                Sampling::Grid { offset } => chunk_indices(shape, patch_shape, offset),
            };

            if windows.is_empty() {
                tracing::warn!("No patches for {}", object.file_name);
            }
            indices.extend(windows.into_iter().map(|w| PatchIndex::new(image_id, w)));
        }

        if let Some(seed) = shuffle {
            indices.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        Ok(Self {
            images: Arc::new(objects),
            indices,
            mode,
            expand_by,
            input_grid,
            threshold_targets: false,
        })
    }

    /// Attaches to every item the best-F1 threshold of its raw working window
    /// against the window's truth.
    pub fn with_threshold_targets(mut self, enabled: bool) -> Self {
        self.threshold_targets = enabled;
        self
    }

    pub fn image_objects(&self) -> &[ImageObject] {
        &self.images
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Inverse-frequency `[background, foreground]` weights averaged over the
    /// images. Only training datasets produce weights.
    pub fn class_weights(&self) -> Option<Vec<f32>> {
        if self.mode != Mode::Train || self.images.is_empty() {
            return None;
        }

        let mut weights = [0.0f32; 2];
        for object in self.images.iter() {
            let Some(truth) = &object.ground_truth else {
                continue;
            };
            let total = truth.len() as f32;
            let foreground = truth.iter().filter(|&&v| v == 255).count() as f32;
            let background = total - foreground;

            for (weight, count) in weights.iter_mut().zip([background, foreground]) {
                *weight += if count > 0.0 { total / (2.0 * count) } else { 1.0 };
            }
        }

        let n = self.images.len() as f32;
        Some(weights.iter().map(|w| w / n).collect())
    }

    fn input_tiles(&self, object: &ImageObject, window: Window) -> Vec<Vec<GrayImage>> {
        let grid = self.input_grid;
        let [rows, cols] = window.shape();
        let (tile_rows, tile_cols) = (rows / grid, cols / grid);

        (0..grid)
            .map(|r| {
                (0..grid)
                    .map(|c| {
                        let tile = Window::new(
                            window.row_from + r * tile_rows,
                            window.row_from + (r + 1) * tile_rows,
                            window.col_from + c * tile_cols,
                            window.col_from + (c + 1) * tile_cols,
                        );
                        mirrored_crop(&object.working, tile, self.expand_by)
                    })
                    .collect()
            })
            .collect()
    }
}

impl Dataset<PatchItem> for PatchDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        let PatchIndex { image_id, window } = *self.indices.get(index)?;
        let object = &self.images[image_id];

        let mut tiles = self.input_tiles(object, window);
        let mut label = crop(object.ground_truth.as_ref()?, window);
        let mut mask = object.mask.as_ref().map(|mask| crop(mask, window));
        let threshold = self.threshold_targets.then(|| {
            let levels = crop(&object.working, window);
            best_f1_threshold(levels.as_raw(), label.as_raw()).1
        });

        if self.mode == Mode::Train {
            let mut rng = rand::thread_rng();

            if rng.gen_bool(0.5) {
                tiles.reverse();
                tiles.iter_mut().flatten().for_each(|t| *t = flip_rows(t));
                label = flip_rows(&label);
                mask = mask.map(|m| flip_rows(&m));
            }
            if rng.gen_bool(0.5) {
                tiles.iter_mut().for_each(|row| row.reverse());
                tiles.iter_mut().flatten().for_each(|t| *t = flip_cols(t));
                label = flip_cols(&label);
                mask = mask.map(|m| flip_cols(&m));
            }
        }

        let tiles: Vec<GrayImage> = tiles.into_iter().flatten().collect();
        let (width, height) = tiles[0].dimensions();
        let input = tiles
            .iter()
            .flat_map(|tile| tile.iter().map(|&v| v as f32 / 255.0))
            .collect();

        let label_shape = [label.height() as usize, label.width() as usize];
        let mask = match mask {
            Some(mask) => mask.iter().map(|&v| v == 255).collect(),
            None => vec![true; label.len()],
        };

        Some(PatchItem::new(
            input,
            [tiles.len(), height as usize, width as usize],
            label.iter().map(|&v| i64::from(v == 255)).collect(),
            mask,
            label_shape,
            window.as_array(),
            threshold,
        ))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Loads an image with its mask and ground truth and applies the configured
/// preprocessing to its working array.
pub fn load_image_object(conf: &RunConfig, file: &str) -> Result<ImageObject> {
    let mut object = ImageObject::load(&conf.dirs.image, file)?;

    if let (Some(dir), Some(rule)) = (&conf.dirs.mask, &conf.mask_rule) {
        object.load_mask(dir, rule, conf.patches.erode_mask)?;
    }
    match (&conf.dirs.truth, &conf.truth_rule) {
        (Some(dir), Some(rule)) => object.load_ground_truth(dir, rule)?,
        _ => return Err(Error::MissingGroundTruth(file.to_string())),
    }

    object.apply_mask();
    if conf.patches.apply_clahe {
        object.apply_clahe(conf.patches.clahe_clip_limit, conf.patches.clahe_tiles);
    }

    Ok(object)
}

/// One unshuffled, fully tiled dataset per image, for stitched evaluation.
pub fn per_image_datasets(
    conf: &RunConfig,
    images: &[String],
    mode: Mode,
) -> Result<Vec<PatchDataset>> {
    images
        .iter()
        .map(|file| {
            let object = load_image_object(conf, file)?;
            PatchDataset::from_objects(
                vec![object],
                mode,
                Sampling::Grid {
                    offset: conf.patches.grid_offset(),
                },
                conf.patches.patch_shape,
                conf.patches.expand_by,
                conf.input_grid(),
                None,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn object(name: &str) -> ImageObject {
        let image = GrayImage::from_fn(12, 12, |x, y| Luma([if x == y { 200 } else { 10 }]));
        let truth = GrayImage::from_fn(12, 12, |x, y| Luma([if x == y { 255 } else { 0 }]));
        ImageObject::from_planes(name, image, None, Some(truth))
    }

    fn grid(mode: Mode, expand_by: [usize; 2], input_grid: usize) -> PatchDataset {
        PatchDataset::from_objects(
            vec![object("a.png")],
            mode,
            Sampling::Grid { offset: [6, 6] },
            [6, 6],
            expand_by,
            input_grid,
            None,
        )
        .unwrap()
    }

    #[test]
    fn grid_sampling_tiles_every_image() {
        let dataset = grid(Mode::Test, [0, 0], 1);

        assert_eq!(dataset.len(), 4);
        let item = dataset.get(3).unwrap();
        assert_eq!(item.clip, [6, 12, 6, 12]);
        assert_eq!(item.input_shape, [1, 6, 6]);
        assert_eq!(item.label_shape, [6, 6]);
        assert_eq!(item.label.iter().sum::<i64>(), 6);
        assert!(item.mask.iter().all(|&m| m));
    }

    #[test]
    fn expanded_inputs_carry_mirrored_context() {
        let dataset = grid(Mode::Validation, [3, 3], 1);

        let item = dataset.get(0).unwrap();

        assert_eq!(item.input_shape, [1, 12, 12]);
        assert_eq!(item.label.len(), 36);
    }

    #[test]
    fn input_grid_splits_windows_into_channels() {
        let dataset = grid(Mode::Test, [1, 1], 3);

        let item = dataset.get(0).unwrap();

        assert_eq!(item.input_shape, [9, 4, 4]);
        assert_eq!(item.input.len(), 9 * 16);
    }

    #[test]
    fn grid_channels_tile_back_onto_their_window() {
        use crate::model::tile_outputs;
        use burn::backend::NdArray;
        use burn::prelude::*;

        let ramp = GrayImage::from_fn(12, 12, |x, y| Luma([(x + 12 * y) as u8]));
        let object = ImageObject::from_planes("ramp.png", ramp.clone(), None, Some(ramp));
        let dataset = PatchDataset::from_objects(
            vec![object],
            Mode::Test,
            Sampling::Grid { offset: [6, 6] },
            [6, 6],
            [1, 1],
            3,
            None,
        )
        .unwrap();

        let item = dataset.get(3).unwrap();
        assert_eq!(item.clip, [6, 12, 6, 12]);

        // identity branches: every channel passes through unchanged
        let device = Default::default();
        let input = Tensor::<NdArray, 1>::from_floats(item.input.as_slice(), &device)
            .reshape([1, 9, 4, 4]);
        let channels = (0..9)
            .map(|k| input.clone().slice([0..1, k..k + 1, 0..4, 0..4]))
            .collect();
        let values: Vec<u32> = tile_outputs(channels, [2, 2])
            .mul_scalar(255.0)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .unwrap()
            .into_iter()
            .map(|v| v.round() as u32)
            .collect();

        let expected: Vec<u32> = (6..12).flat_map(|r| (6..12).map(move |c| c + 12 * r)).collect();
        assert_eq!(values, expected);
        assert_eq!(values[..6], [78, 79, 80, 81, 82, 83]);
    }

    #[test]
    fn threshold_targets_separate_window_truth() {
        let plain = grid(Mode::Test, [0, 0], 1);
        let targets = grid(Mode::Test, [0, 0], 1).with_threshold_targets(true);

        assert_eq!(plain.get(0).unwrap().threshold, None);
        // diagonal at 200 over a background of 10
        assert_eq!(targets.get(0).unwrap().threshold, Some(11));
        // a window without truth never reaches a positive F1
        assert_eq!(targets.get(1).unwrap().threshold, Some(0));
    }

    #[test]
    fn estimated_sampling_centers_on_bright_pixels() {
        let dataset = PatchDataset::from_objects(
            vec![object("a.png")],
            Mode::Train,
            Sampling::Estimated {
                threshold: 50,
                stride: 3,
            },
            [4, 4],
            [0, 0],
            1,
            Some(7),
        )
        .unwrap();

        // 12 diagonal pixels, every third one
        assert_eq!(dataset.len(), 4);
        for i in 0..dataset.len() {
            let item = dataset.get(i).unwrap();
            // flips keep the diagonal a diagonal of the same length
            assert_eq!(item.label.iter().sum::<i64>(), 4);
        }
    }

    #[test]
    fn flips_keep_input_and_label_aligned() {
        let dataset = grid(Mode::Train, [0, 0], 1);

        for _ in 0..8 {
            let item = dataset.get(0).unwrap();
            for (value, label) in item.input.iter().zip(&item.label) {
                assert_eq!(*value > 0.5, *label == 1);
            }
        }
    }

    #[test]
    fn class_weights_only_for_training() {
        let train = grid(Mode::Train, [0, 0], 1);
        let test = grid(Mode::Test, [0, 0], 1);

        let weights = train.class_weights().unwrap();

        assert!(test.class_weights().is_none());
        assert!((weights[0] - 144.0 / (2.0 * 132.0)).abs() < 1e-5);
        assert!((weights[1] - 144.0 / (2.0 * 12.0)).abs() < 1e-5);
    }

    #[test]
    fn images_smaller_than_a_patch_are_rejected() {
        let result = PatchDataset::from_objects(
            vec![object("a.png")],
            Mode::Train,
            Sampling::Grid { offset: [16, 16] },
            [16, 16],
            [0, 0],
            1,
            None,
        );

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
