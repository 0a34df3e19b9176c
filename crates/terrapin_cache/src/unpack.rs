//! Extraction of provider zip archives into the package directory.

use std::path::{Path, PathBuf};

use simple_spawn_blocking::tokio::run_blocking_task;

use crate::{CacheError, UnpackError};

/// Unpacks the zip archive at `archive` into `destination`, preserving the
/// file modes stored in the archive.
pub(crate) async fn extract_zip(archive: &Path, destination: &Path) -> Result<(), CacheError> {
    let archive: PathBuf = archive.to_owned();
    let destination = destination.to_owned();
    run_blocking_task(move || {
        extract_zip_sync(&archive, &destination).map_err(|source| CacheError::Unpack {
            path: archive.clone(),
            source,
        })
    })
    .await
}

fn extract_zip_sync(archive_path: &Path, destination: &Path) -> Result<(), UnpackError> {
    let file = fs_err::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    fs_err::create_dir_all(destination)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let rel_path = entry
            .enclosed_name()
            .ok_or_else(|| UnpackError::UnsafePath(entry.name().to_owned()))?;
        let target = destination.join(rel_path);

        if entry.is_dir() {
            fs_err::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut out = fs_err::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;

        // Provider binaries rely on their stored executable bits.
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs_err::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}
