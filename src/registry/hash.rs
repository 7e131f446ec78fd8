//! Content hashing for payload directories

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Files of a payload directory and their combined content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Relative paths with `/` separators, sorted
    pub files: Vec<String>,
    /// Hex SHA-256 over every (path, file digest) pair in order
    pub hash: String,
}

/// Hash a directory tree.
///
/// The digest depends only on relative paths and file contents, so two
/// copies of the same payload hash identically wherever they live.
pub fn compute_manifest(dir: &Path) -> io::Result<Manifest> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        files.push(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
        );
    }
    files.sort();

    let hash = hash_files(dir, &files)?;
    Ok(Manifest { files, hash })
}

/// Hash the listed files below `dir` in the given order
pub fn hash_files(dir: &Path, files: &[String]) -> io::Result<String> {
    let mut combined = Sha256::new();
    for relative in files {
        let mut file_hasher = Sha256::new();
        let mut file = File::open(dir.join(relative))?;
        io::copy(&mut file, &mut file_hasher)?;

        combined.update(relative.as_bytes());
        combined.update([0u8]);
        combined.update(file_hasher.finalize());
    }
    Ok(hex::encode(combined.finalize()))
}
