use bincode::{Options, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;

use crate::error::StoreError;
use crate::store::Tables;

/// Upper bound on the decoded size of a snapshot. Length prefixes beyond it
/// are rejected before anything is allocated.
pub const SNAPSHOT_LIMIT: u64 = 64 * 1024 * 1024;

/// Same wire format as `bincode::serialize_into`, with a size cap on reads.
fn decode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(SNAPSHOT_LIMIT)
}

/// Write the tables to `path` as gzip-compressed bincode.
///
/// The data goes to a sibling temporary file first and is renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
pub fn save_snapshot(tables: &Tables, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, tables)?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.flush()?;
    }
    fs::rename(&tmp, path)?;

    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Tables, StoreError> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    Ok(decode_options().deserialize_from(&mut reader)?)
}

/// Serialize the tables into an in-memory gzip buffer for download.
pub fn snapshot_to_bytes(tables: &Tables) -> Result<Vec<u8>, StoreError> {
    let mut buffer = Vec::new();
    {
        let encoder = GzEncoder::new(&mut buffer, Compression::default());
        let mut writer = BufWriter::new(encoder);
        serialize_into(&mut writer, tables)?;
        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?;
    }

    Ok(buffer)
}

pub fn snapshot_from_bytes(buffer: &[u8]) -> Result<Tables, StoreError> {
    let decoder = GzDecoder::new(Cursor::new(buffer));
    let mut reader = BufReader::new(decoder);

    Ok(decode_options().deserialize_from(&mut reader)?)
}
