use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use zip::result::ZipResult;
use zip::ZipArchive;

/// Unpack every entry of `archive_path` into `dest`, returning the number of
/// files written. Entries whose names would land outside `dest` are skipped.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> ZipResult<usize> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!("Skipping archive entry outside target: {}", entry.name());
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    debug!("Extracted {} files into {}", written, dest.display());
    Ok(written)
}
