//! Built-in materializers

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::{Artifact, Materializer};

pub const BYTES_ID: &str = "builtin:bytes";
pub const TEXT_ID: &str = "builtin:text";
pub const JSON_ID: &str = "builtin:json";
pub const FILES_ID: &str = "builtin:files";

const BYTES_FILE: &str = "data.bin";
const TEXT_FILE: &str = "data.txt";
const JSON_FILE: &str = "data.json";

fn read_single(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    fs::read(&path).with_context(|| format!("Failed to read payload file {:?}", path))
}

fn write_single(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, data).with_context(|| format!("Failed to write payload file {:?}", path))
}

/// Raw bytes in `data.bin`
pub struct BytesMaterializer;

impl Materializer for BytesMaterializer {
    fn id(&self) -> &str {
        BYTES_ID
    }

    fn materialize(&self, artifact: &Artifact, dir: &Path) -> Result<()> {
        match artifact {
            Artifact::Bytes(data) => write_single(dir, BYTES_FILE, data),
            Artifact::Text(text) => write_single(dir, BYTES_FILE, text.as_bytes()),
            other => bail!("{} cannot store a {} artifact", BYTES_ID, other.class()),
        }
    }

    fn load(&self, dir: &Path, _files: &[String]) -> Result<Artifact> {
        Ok(Artifact::Bytes(read_single(dir, BYTES_FILE)?))
    }
}

/// UTF-8 text in `data.txt`
pub struct TextMaterializer;

impl Materializer for TextMaterializer {
    fn id(&self) -> &str {
        TEXT_ID
    }

    fn materialize(&self, artifact: &Artifact, dir: &Path) -> Result<()> {
        match artifact {
            Artifact::Text(text) => write_single(dir, TEXT_FILE, text.as_bytes()),
            other => bail!("{} cannot store a {} artifact", TEXT_ID, other.class()),
        }
    }

    fn load(&self, dir: &Path, _files: &[String]) -> Result<Artifact> {
        let data = read_single(dir, TEXT_FILE)?;
        let text = String::from_utf8(data).context("Text payload is not valid UTF-8")?;
        Ok(Artifact::Text(text))
    }
}

/// Pretty-printed JSON in `data.json`
pub struct JsonMaterializer;

impl Materializer for JsonMaterializer {
    fn id(&self) -> &str {
        JSON_ID
    }

    fn materialize(&self, artifact: &Artifact, dir: &Path) -> Result<()> {
        match artifact {
            Artifact::Json(value) => {
                let data = serde_json::to_vec_pretty(value)?;
                write_single(dir, JSON_FILE, &data)
            }
            other => bail!("{} cannot store a {} artifact", JSON_ID, other.class()),
        }
    }

    fn load(&self, dir: &Path, _files: &[String]) -> Result<Artifact> {
        let data = read_single(dir, JSON_FILE)?;
        let value = serde_json::from_slice(&data).context("JSON payload is malformed")?;
        Ok(Artifact::Json(value))
    }
}

/// Arbitrary file tree, one payload file per entry
pub struct FilesMaterializer;

impl Materializer for FilesMaterializer {
    fn id(&self) -> &str {
        FILES_ID
    }

    fn materialize(&self, artifact: &Artifact, dir: &Path) -> Result<()> {
        let Artifact::Files(files) = artifact else {
            bail!("{} cannot store a {} artifact", FILES_ID, artifact.class());
        };
        for (relative, data) in files {
            if relative.is_empty() || relative.starts_with('/') || relative.split('/').any(|p| p == "..") {
                bail!("File entry {:?} is not a plain relative path", relative);
            }
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, data).with_context(|| format!("Failed to write payload file {:?}", path))?;
        }
        Ok(())
    }

    fn load(&self, dir: &Path, files: &[String]) -> Result<Artifact> {
        let mut loaded = BTreeMap::new();
        for relative in files {
            loaded.insert(relative.clone(), read_single(dir, relative)?);
        }
        Ok(Artifact::Files(loaded))
    }
}
