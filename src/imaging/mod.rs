//! Loading and preprocessing of the full-size images patches are cut from.

mod clahe;
mod filters;

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};

use crate::config::FileNameRule;
use crate::error::Result;

pub use clahe::clahe;
pub use filters::slide_and_construct;

/// An image with its companion planes.
///
/// `working` starts as a copy of `image` and is what patches are cut from;
/// preprocessing steps only ever modify `working`.
#[derive(Clone, Debug)]
pub struct ImageObject {
    pub file_name: String,
    pub image: GrayImage,
    pub working: GrayImage,
    pub mask: Option<GrayImage>,
    pub ground_truth: Option<GrayImage>,
}

impl ImageObject {
    /// Loads `dir/file_name` as a single channel: the green channel of colour
    /// images, the luma of grayscale ones.
    pub fn load<P: AsRef<Path>>(dir: P, file_name: &str) -> Result<Self> {
        let path = dir.as_ref().join(file_name);
        let image = single_channel(image::open(&path)?);
        tracing::debug!(
            "Loaded {} ({}x{})",
            path.display(),
            image.height(),
            image.width()
        );

        Ok(Self {
            file_name: file_name.to_string(),
            working: image.clone(),
            image,
            mask: None,
            ground_truth: None,
        })
    }

    /// Builds an object from in-memory planes.
    pub fn from_planes(
        file_name: impl Into<String>,
        image: GrayImage,
        mask: Option<GrayImage>,
        ground_truth: Option<GrayImage>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            working: image.clone(),
            image,
            mask,
            ground_truth,
        }
    }

    pub fn load_mask<P: AsRef<Path>>(
        &mut self,
        dir: P,
        rule: &FileNameRule,
        erode: bool,
    ) -> Result<()> {
        let mask = binarize(&image::open(dir.as_ref().join(rule.apply(&self.file_name)))?.to_luma8());
        self.mask = Some(if erode { erode_3x3(&mask) } else { mask });
        Ok(())
    }

    pub fn load_ground_truth<P: AsRef<Path>>(&mut self, dir: P, rule: &FileNameRule) -> Result<()> {
        let truth = image::open(dir.as_ref().join(rule.apply(&self.file_name)))?.to_luma8();
        self.ground_truth = Some(binarize(&truth));
        Ok(())
    }

    /// `[rows, cols]` of the working array.
    pub fn shape(&self) -> [usize; 2] {
        [self.working.height() as usize, self.working.width() as usize]
    }

    /// Replaces working pixels outside the mask by the mean inside it.
    pub fn apply_mask(&mut self) {
        let Some(mask) = &self.mask else {
            return;
        };

        let (sum, count) = self
            .working
            .pixels()
            .zip(mask.pixels())
            .filter(|(_, m)| m[0] == 255)
            .fold((0u64, 0u64), |(sum, count), (p, _)| {
                (sum + p[0] as u64, count + 1)
            });

        if count == 0 {
            tracing::warn!("Mask of {} is empty, leaving image untouched", self.file_name);
            return;
        }

        let mean = (sum as f64 / count as f64) as u8;
        for (pixel, m) in self.working.pixels_mut().zip(mask.pixels()) {
            if m[0] == 0 {
                *pixel = Luma([mean]);
            }
        }
    }

    pub fn apply_clahe(&mut self, clip_limit: f32, tiles: [u32; 2]) {
        self.working = clahe(&self.working, clip_limit, tiles);
    }

    /// Binary estimate of the foreground: 255 where the working array is at
    /// or above `threshold`.
    pub fn estimate(&self, threshold: u8) -> GrayImage {
        threshold_plane(&self.working, threshold)
    }
}

fn single_channel(image: DynamicImage) -> GrayImage {
    if image.color().has_color() {
        let rgb = image.to_rgb8();
        GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| Luma([rgb.get_pixel(x, y)[1]]))
    } else {
        image.to_luma8()
    }
}

pub fn threshold_plane(plane: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
        if plane.get_pixel(x, y)[0] >= threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Maps every nonzero pixel to 255.
pub fn binarize(plane: &GrayImage) -> GrayImage {
    threshold_plane(plane, 1)
}

/// 3x3 binary erosion; pixels outside the image count as background.
pub fn erode_3x3(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();

    GrayImage::from_fn(width, height, |x, y| {
        let inside = (-1i64..=1).all(|dy| {
            (-1i64..=1).all(|dx| {
                let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                nx >= 0
                    && ny >= 0
                    && nx < width as i64
                    && ny < height as i64
                    && mask.get_pixel(nx as u32, ny as u32)[0] == 255
            })
        });
        Luma([if inside { 255 } else { 0 }])
    })
}
