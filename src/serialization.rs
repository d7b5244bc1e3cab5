use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RecError, Result};

fn build_model_path(dir: &Path, model_name: &str) -> PathBuf {
    let file_name = format!("{model_name}.gz");
    dir.join(file_name)
}

/// Write `model` as gzip-compressed bincode to `<dir>/<model_name>.gz`.
pub fn save_model<T: Serialize>(
    model: &T,
    dir: impl AsRef<Path>,
    model_name: &str,
    class_name: &str,
) -> Result<PathBuf> {
    let model_path = build_model_path(dir.as_ref(), model_name);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(model_path.as_path())?;

    let model_bytes: Vec<u8> = bincode::serialize(model)
        .map_err(|e| RecError::Serialization(format!("failed to serialize {class_name}: {e}")))?;

    let mut encoder = GzEncoder::new(file, Compression::new(1));
    encoder.write_all(&model_bytes)?;
    encoder.finish()?;

    tracing::info!("saved `{class_name}` model to `{}`", model_path.display());
    Ok(model_path)
}

pub fn load_model<T: DeserializeOwned>(
    dir: impl AsRef<Path>,
    model_name: &str,
    class_name: &str,
) -> Result<T> {
    let model_path = build_model_path(dir.as_ref(), model_name);
    if !model_path.exists() {
        return Err(RecError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("model file not found: {}", model_path.display()),
        )));
    }

    let file = File::open(model_path.as_path())?;
    let mut decoder = GzDecoder::new(file);
    let mut model_bytes: Vec<u8> = Vec::new();
    decoder.read_to_end(&mut model_bytes)?;

    let model: T = bincode::deserialize(&model_bytes)
        .map_err(|e| RecError::Serialization(format!("failed to deserialize {class_name}: {e}")))?;

    tracing::info!("loaded `{class_name}` model from `{}`", model_path.display());
    Ok(model)
}
