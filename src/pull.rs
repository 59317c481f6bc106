//! Image acquisition: shells out to the registry-pulling helper script,
//! then extracts each layer tarball into the image dir, renames the
//! manifest's config blob to `config.json`, and writes `src.txt`. The
//! registry protocol itself is an external collaborator (out of scope
//! for the runtime); this only flattens what the script downloaded.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{PockyError, PockyResult};
use crate::image::{CONFIG_FILE, IMG_PREFIX, SRC_FILE};

const MANIFEST_FILE: &str = "manifest.json";
const DOWNLOAD_SCRIPT: &str = "./scripts/download-frozen-image-v2.sh";

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// Pulls `name:tag`, flattens its layers into a fresh `img_<uuid>`
/// directory under `pocky_root`, and returns the new image's uuid.
pub fn pull(pocky_root: &Path, name: &str, tag: &str) -> PockyResult<String> {
    let src = format!("{}:{}", name, tag);
    let image_uuid = Uuid::new_v4().to_string();
    let image_dir = pocky_root.join(format!("{}_{}", IMG_PREFIX, image_uuid));

    std::fs::create_dir(&image_dir)?;

    info!("pulling {}", src);
    let status = Command::new("bash")
        .arg(DOWNLOAD_SCRIPT)
        .arg(&image_dir)
        .arg(&src)
        .status()
        .map_err(|err| PockyError::CommandFailure {
            command: DOWNLOAD_SCRIPT.to_string(),
            message: err.to_string(),
        })?;

    if !status.success() {
        return Err(PockyError::CommandFailure {
            command: DOWNLOAD_SCRIPT.to_string(),
            message: format!("exited with {}", status),
        });
    }

    let manifest_path = image_dir.join(MANIFEST_FILE);
    let manifest_raw = std::fs::read_to_string(&manifest_path)
        .map_err(|err| PockyError::MalformedImage(format!("{} missing: {}", manifest_path.display(), err)))?;
    let manifest: Vec<ManifestEntry> = serde_json::from_str(&manifest_raw)
        .map_err(|err| PockyError::MalformedImage(format!("{}: {}", manifest_path.display(), err)))?;

    // exactly one manifest entry is accepted; no multi-architecture handling.
    if manifest.len() != 1 {
        return Err(PockyError::MalformedImage(format!(
            "expected exactly one manifest entry, found {}",
            manifest.len()
        )));
    }
    let entry = &manifest[0];

    for layer in &entry.layers {
        extract_layer(&image_dir, layer)?;
    }

    let config_src = image_dir.join(&entry.config);
    let config_dst = image_dir.join(CONFIG_FILE);
    std::fs::rename(&config_src, &config_dst)?;

    std::fs::write(image_dir.join(SRC_FILE), &src)?;

    info!("successfully pulled image {}", src);
    Ok(image_uuid)
}

fn extract_layer(image_dir: &Path, layer: &str) -> PockyResult<()> {
    let layer_hash = layer.split('/').next().unwrap_or(layer);
    let layer_dir: PathBuf = image_dir.join(layer_hash);
    let tar_path = image_dir.join(layer);

    let file = std::fs::File::open(&tar_path)?;
    let mut archive = tar::Archive::new(file);
    archive.unpack(image_dir)?;

    if layer_dir.is_dir() {
        std::fs::remove_dir_all(&layer_dir)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_with_multiple_entries_is_malformed() {
        let manifest: Vec<ManifestEntry> = serde_json::from_str(
            r#"[{"Config":"a.json","Layers":["a/layer.tar"]},{"Config":"b.json","Layers":["b/layer.tar"]}]"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 2);
    }
}
