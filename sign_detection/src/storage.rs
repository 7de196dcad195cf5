use crate::config::OutputConfig;
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const STATIC_ROUTE: &str = "/static";
pub const SHARED_FILE_NAME: &str = "processed_image.jpg";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Writes annotated images under the statically served directory.
#[derive(Debug, Clone)]
pub struct OutputStore {
    static_dir: PathBuf,
    public_base_url: String,
    unique_names: bool,
}

impl OutputStore {
    pub fn new(output_cfg: &OutputConfig, public_base_url: &str) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&output_cfg.static_dir).map_err(|source| {
            StorageError::CreateDir {
                path: output_cfg.static_dir.clone(),
                source,
            }
        })?;

        Ok(Self {
            static_dir: output_cfg.static_dir.clone(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            unique_names: output_cfg.unique_names,
        })
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    fn next_file_name(&self) -> String {
        if self.unique_names {
            format!("processed_{}.jpg", Uuid::new_v4())
        } else {
            SHARED_FILE_NAME.to_string()
        }
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}{}/{}", self.public_base_url, STATIC_ROUTE, file_name)
    }

    /// Saves `image` as JPEG and returns its absolute URL.
    pub fn persist(&self, image: &RgbImage) -> Result<String, StorageError> {
        let file_name = self.next_file_name();
        let path = self.static_dir.join(&file_name);

        image
            .save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Annotated image written to {:?}", path);
        Ok(self.url_for(&file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn store(dir: &Path, unique_names: bool) -> OutputStore {
        let cfg = OutputConfig {
            static_dir: dir.join("static"),
            unique_names,
        };
        OutputStore::new(&cfg, "http://localhost:5000/").unwrap()
    }

    #[test]
    fn test_persist_shared_name_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), false);
        let image = RgbImage::from_pixel(8, 6, Rgb([200, 10, 10]));

        let first = store.persist(&image).unwrap();
        let second = store.persist(&image).unwrap();

        assert_eq!(first, "http://localhost:5000/static/processed_image.jpg");
        assert_eq!(first, second);
        let saved = image::open(dir.path().join("static").join(SHARED_FILE_NAME)).unwrap();
        assert_eq!((saved.width(), saved.height()), (8, 6));
    }

    #[test]
    fn test_persist_unique_names_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), true);
        let image = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));

        let first = store.persist(&image).unwrap();
        let second = store.persist(&image).unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("http://localhost:5000/static/processed_"));
        assert!(first.ends_with(".jpg"));
        assert_eq!(std::fs::read_dir(store.static_dir()).unwrap().count(), 2);
    }
}
