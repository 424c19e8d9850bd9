//! Bundles run-level attachments into one zip archive.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// An archive on disk. The backing directory is removed on drop.
#[derive(Debug)]
pub struct Archive {
    _dir: TempDir,
    path: PathBuf,
}

impl Archive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Archive file name for a run.
pub fn archive_name(run_id: i32) -> String {
    format!("TestResults_{}.zip", run_id)
}

/// Writes `files` into `TestResults_<run_id>.zip` in a fresh temporary
/// directory. Entries are stored under their file names only; a later file
/// whose name is already taken is left out.
///
/// Fails if any file cannot be read; callers fall back to individual uploads.
pub fn create_archive(run_id: i32, files: &[PathBuf]) -> io::Result<Archive> {
    let dir = TempDir::new()?;
    let path = dir.path().join(archive_name(run_id));

    let mut writer = zip::ZipWriter::new(File::create(&path)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut names = HashSet::new();
    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", file.display()),
                )
            })?;
        let mut handle = File::open(file)?;
        if !names.insert(name.clone()) {
            tracing::debug!("Skipping duplicate archive entry {}", file.display());
            continue;
        }
        writer.start_file(name, options)?;
        io::copy(&mut handle, &mut writer)?;
    }
    writer.finish()?;

    Ok(Archive { _dir: dir, path })
}
