//! On-disk image store: one `img_<uuid>` directory per image, holding a
//! flattened layer tree, `config.json` (the runtime-relevant subset of
//! the OCI image config) and `src.txt` (`<name>:<tag>` provenance).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::PockyConfig;
use crate::error::{PockyError, PockyResult};

pub const IMG_PREFIX: &str = "img";
pub const SRC_FILE: &str = "src.txt";
pub const CONFIG_FILE: &str = "config.json";

/// The subset of the OCI image config the runtime consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfigInner {
    #[serde(rename = "Cmd", default)]
    pub cmd: Vec<String>,
    #[serde(rename = "Env", default)]
    pub env: Vec<String>,
    #[serde(rename = "WorkingDir", default)]
    pub working_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub config: ImageConfigInner,
}

/// A resolved image on disk: `img_<uuid>` under the pocky root.
#[derive(Debug, Clone)]
pub struct Image {
    pub id: String,
    pub path: PathBuf,
}

impl Image {
    pub fn rootfs(&self) -> &Path {
        &self.path
    }

    pub fn src(&self) -> PockyResult<String> {
        Ok(std::fs::read_to_string(self.path.join(SRC_FILE))?)
    }

    /// Reads and parses `config.json` lazily at run time, as spec'd:
    /// the image is immutable but config is only needed when running it.
    pub fn config(&self) -> PockyResult<ImageConfigInner> {
        let config_path = self.path.join(CONFIG_FILE);
        let raw = std::fs::read_to_string(&config_path).map_err(|err| {
            PockyError::MalformedImage(format!("{} missing or unreadable: {}", config_path.display(), err))
        })?;

        let parsed: ImageConfig = serde_json::from_str(&raw)
            .map_err(|err| PockyError::MalformedImage(format!("{}: {}", config_path.display(), err)))?;

        Ok(parsed.config)
    }
}

pub struct ImageStore {
    config: PockyConfig,
}

impl ImageStore {
    pub fn new(config: PockyConfig) -> Self {
        ImageStore { config }
    }

    fn dir_name(uuid: &str) -> String {
        format!("{}_{}", IMG_PREFIX, uuid)
    }

    /// Enumerates top-level dirs under the pocky root matching the
    /// prefix `img_<short_id>`. Zero matches -> NotFound, >1 -> Ambiguous.
    pub fn resolve(&self, short_id: &str) -> PockyResult<Image> {
        let wanted_prefix = Self::dir_name(short_id);

        let matches: Vec<PathBuf> = std::fs::read_dir(&self.config.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(&wanted_prefix))
                    .unwrap_or(false)
            })
            .collect();

        match matches.len() {
            0 => Err(PockyError::NotFound(short_id.to_string())),
            1 => {
                let path = matches.into_iter().next().unwrap();
                let id = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.strip_prefix(&format!("{}_", IMG_PREFIX)))
                    .unwrap_or(short_id)
                    .to_string();
                Ok(Image { id, path })
            }
            _ => Err(PockyError::Ambiguous(short_id.to_string())),
        }
    }

    pub fn list(&self) -> PockyResult<Vec<Image>> {
        let mut images = Vec::new();

        for entry in std::fs::read_dir(&self.config.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(id) = name.strip_prefix(&format!("{}_", IMG_PREFIX)) {
                images.push(Image {
                    id: id.to_string(),
                    path: path.clone(),
                });
            }
        }

        Ok(images)
    }

    pub fn path_for_new_image(&self, uuid: &str) -> PathBuf {
        self.config.root.join(Self::dir_name(uuid))
    }

    pub fn remove(&self, short_id: &str) -> PockyResult<()> {
        let image = self.resolve(short_id)?;
        std::fs::remove_dir_all(&image.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store_with_images(images: &[(&str, &str)]) -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        for (uuid, src) in images {
            let img_dir = dir.path().join(format!("img_{}", uuid));
            std::fs::create_dir_all(&img_dir).unwrap();
            let mut f = std::fs::File::create(img_dir.join(SRC_FILE)).unwrap();
            write!(f, "{}", src).unwrap();
        }
        let store = ImageStore::new(PockyConfig::new(dir.path().to_owned()));
        (dir, store)
    }

    #[test]
    fn resolve_unique_prefix() {
        let (_dir, store) = store_with_images(&[("abcdef12", "alpine:3.18")]);
        let image = store.resolve("abcdef").unwrap();
        assert_eq!(image.src().unwrap(), "alpine:3.18");
    }

    #[test]
    fn resolve_missing_is_not_found() {
        let (_dir, store) = store_with_images(&[("abcdef12", "alpine:3.18")]);
        assert!(matches!(store.resolve("zzzzzz"), Err(PockyError::NotFound(_))));
    }

    #[test]
    fn resolve_ambiguous_prefix() {
        let (_dir, store) = store_with_images(&[("abc11111", "alpine:3.18"), ("abc22222", "ubuntu:22.04")]);
        assert!(matches!(store.resolve("abc"), Err(PockyError::Ambiguous(_))));
    }

    #[test]
    fn config_requires_required_fields() {
        let dir = tempfile::tempdir().unwrap();
        let img_dir = dir.path().join("img_deadbeef");
        std::fs::create_dir_all(&img_dir).unwrap();
        std::fs::write(img_dir.join(CONFIG_FILE), r#"{"config":{"Cmd":["/bin/echo","hi"],"Env":[],"WorkingDir":""}}"#).unwrap();

        let store = ImageStore::new(PockyConfig::new(dir.path().to_owned()));
        let image = store.resolve("deadbeef").unwrap();
        let config = image.config().unwrap();
        assert_eq!(config.cmd, vec!["/bin/echo".to_string(), "hi".to_string()]);
    }

    #[test]
    fn missing_config_is_malformed_image() {
        let dir = tempfile::tempdir().unwrap();
        let img_dir = dir.path().join("img_deadbeef");
        std::fs::create_dir_all(&img_dir).unwrap();

        let store = ImageStore::new(PockyConfig::new(dir.path().to_owned()));
        let image = store.resolve("deadbeef").unwrap();
        assert!(matches!(image.config(), Err(PockyError::MalformedImage(_))));
    }
}
