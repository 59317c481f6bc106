//! Composes an overlay mount whose lower layer is the image directory
//! and whose upper/work are per-container scratch dirs, yielding the
//! container's root. Must succeed before anything is written to
//! `upperdir`.

use std::path::Path;

use crate::error::PockyResult;
use crate::linux;

pub fn overlay_mount(lowerdir: &Path, upperdir: &Path, workdir: &Path, target: &Path) -> PockyResult<()> {
    let data = format!(
        "lowerdir={},upperdir={},workdir={}",
        lowerdir.display(),
        upperdir.display(),
        workdir.display()
    );

    linux::mount(None, target, Some("overlay"), 0, Some(&data))
}
