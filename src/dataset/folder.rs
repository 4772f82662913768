use std::fs;
use std::path::{Path, PathBuf};

use derive_new::new;

use crate::error::{Error, Result};

pub const SUPPORTED_FILES: [&str; 7] = ["bmp", "gif", "jpg", "jpeg", "png", "tif", "tiff"];

pub fn check_extension<S: AsRef<str>>(extension: S) -> Result<String> {
    let extension = extension.as_ref();
    if SUPPORTED_FILES
        .iter()
        .any(|valid| valid.eq_ignore_ascii_case(extension))
    {
        Ok(extension.to_string())
    } else {
        Err(Error::InvalidFileExtension(extension.to_string()))
    }
}

/// Names of the supported image files directly inside `dir`, sorted.
pub fn list_images<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Images directory does not exist: {:?}", dir),
        )));
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| check_extension(ext).is_ok());
        if supported {
            if let Some(name) = path.file_name() {
                images.push(name.to_string_lossy().into_owned());
            }
        } else {
            tracing::debug!("Skipping {}", path.display());
        }
    }

    images.sort();
    Ok(images)
}

/// An image with the ground truth and optional mask sharing its stem.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct FolderTriplet {
    pub image: PathBuf,
    pub ground_truth: PathBuf,
    pub mask: Option<PathBuf>,
}

impl FolderTriplet {
    pub fn file_name(&self) -> String {
        self.image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A dataset root laid out as `images/`, `groundtruth/` and optionally
/// `masks/`, where companions share the image's file stem.
#[derive(Clone, Debug)]
pub struct FolderSource {
    pub root: PathBuf,
    pub triplets: Vec<FolderTriplet>,
}

impl FolderSource {
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let images_dir = root.join("images");
        let groundtruth_dir = root.join("groundtruth");
        let masks_dir = root.join("masks");

        if !groundtruth_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Groundtruth directory does not exist: {:?}", groundtruth_dir),
            )));
        }
        let has_masks = masks_dir.is_dir();

        let mut triplets = Vec::new();
        for file_name in list_images(&images_dir)? {
            let image = images_dir.join(&file_name);
            let Some(stem) = image.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let Some(ground_truth) = find_companion(&groundtruth_dir, &stem) else {
                tracing::warn!("No ground truth for {}, skipping", file_name);
                continue;
            };
            let mask = if has_masks {
                find_companion(&masks_dir, &stem)
            } else {
                None
            };

            triplets.push(FolderTriplet::new(image, ground_truth, mask));
        }

        if triplets.is_empty() {
            return Err(Error::Config(format!(
                "No valid image-groundtruth pairs found under {:?}",
                root
            )));
        }

        Ok(Self {
            root: root.to_path_buf(),
            triplets,
        })
    }

    pub fn file_names(&self) -> Vec<String> {
        self.triplets.iter().map(FolderTriplet::file_name).collect()
    }
}

fn find_companion(dir: &Path, stem: &str) -> Option<PathBuf> {
    SUPPORTED_FILES
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert!(check_extension("TIF").is_ok());
        assert!(check_extension("gif").is_ok());
        assert!(matches!(check_extension("txt"), Err(Error::InvalidFileExtension(_))));
    }

    #[test]
    fn lists_only_images() {
        let dir = std::env::temp_dir().join(format!("unet-bee-folder-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in ["b.png", "a.tif", "notes.txt"] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let images = list_images(&dir).unwrap();

        assert_eq!(images, vec!["a.tif", "b.png"]);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn discovers_triplets_by_stem() {
        let root = std::env::temp_dir().join(format!("unet-bee-source-{}", std::process::id()));
        for dir in ["images", "groundtruth", "masks"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        for path in [
            "images/01.tif",
            "images/02.png",
            "images/03.png",
            "groundtruth/01.gif",
            "groundtruth/02.png",
            "masks/01.gif",
        ] {
            fs::write(root.join(path), b"").unwrap();
        }

        let source = FolderSource::discover(&root).unwrap();

        assert_eq!(source.file_names(), vec!["01.tif", "02.png"]);
        assert_eq!(source.triplets[0].mask, Some(root.join("masks/01.gif")));
        assert_eq!(source.triplets[1].mask, None);
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(list_images("/definitely/not/here").is_err());
    }
}
