//! Statement downloads (C52/C53/C54) arrive as one zip archive holding several XML
//! documents; uploads may bundle files the same way.

use std::io::{Cursor, Read, Write};

use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EbicsError, Result};

fn zip_error(e: impl std::fmt::Display) -> EbicsError {
    EbicsError::Codec(format!("zip archive: {e}"))
}

/// Packs `(file name, content)` pairs, deflate compressed.
pub fn zip_files<N: AsRef<str>>(files: &[(N, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in files {
        writer.start_file(name.as_ref(), options).map_err(zip_error)?;
        writer.write_all(content).map_err(zip_error)?;
    }
    Ok(writer.finish().map_err(zip_error)?.into_inner())
}

/// Returns the entries in archive order.
pub fn unzip_files(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(data)).map_err(zip_error)?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_error)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(zip_error)?;
        files.push((file.name().to_string(), contents));
    }
    Ok(files)
}
