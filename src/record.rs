//! Pipe-delimited batch artifacts.
//!
//! Every batch handed to the store is also written as a headerless,
//! pipe-delimited text file: the same fixed-column format the storage
//! layer bulk-loads. Rows carrying JSON blobs are written without any
//! quoting, so they rely on the sanitizer's guarantee that no delimiter
//! survives inside a field.

use csv::{QuoteStyle, WriterBuilder};
use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;

/// Append rows to a pipe-delimited file, quoting fields as needed.
pub fn write_rows<I>(path: &Path, rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    write(path, rows, QuoteStyle::Necessary)
}

/// Append rows containing pre-serialized JSON fields. Quoting is disabled
/// to avoid re-quoting the blobs.
pub fn write_json_rows<I>(path: &Path, rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    write(path, rows, QuoteStyle::Never)
}

fn write<I>(path: &Path, rows: I, quoting: QuoteStyle) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = WriterBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .quote_style(quoting)
        .from_writer(file);

    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
