//! ZIP packaging of chunk results.

use std::io::{Cursor, Read, Write};

use certbatch_core::{CertError, Result};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn archive_err(e: zip::result::ZipError) -> CertError {
    CertError::Archive(e.to_string())
}

/// In-memory ZIP archive under construction.
pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    entries: usize,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    /// Start an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            entries: 0,
        }
    }

    /// Add a file.
    pub fn add_file(&mut self, name: &str, contents: &[u8]) -> Result<()> {
        self.writer
            .start_file(name, self.options)
            .map_err(archive_err)?;
        self.writer.write_all(contents)?;
        self.entries += 1;
        Ok(())
    }

    /// Number of files added so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries
    }

    /// Whether no file was added.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Finish the archive and return its bytes.
    pub fn finish(self) -> Result<Vec<u8>> {
        Ok(self.writer.finish().map_err(archive_err)?.into_inner())
    }
}

/// Merge chunk archives into one, namespacing every entry as
/// `{chunk_id}/{entry}`. Entries are copied without recompression.
pub fn merge_archives(parts: &[(u32, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for (chunk_id, bytes) in parts {
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).map_err(archive_err)?;
        for i in 0..archive.len() {
            let file = archive.by_index_raw(i).map_err(archive_err)?;
            let name = format!("{chunk_id}/{}", file.name());
            writer
                .raw_copy_file_rename(file, name)
                .map_err(archive_err)?;
        }
    }

    Ok(writer.finish().map_err(archive_err)?.into_inner())
}

/// Entry names in archive order.
pub fn entry_names(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_err)?;
    (0..archive.len())
        .map(|i| {
            archive
                .by_index_raw(i)
                .map(|f| f.name().to_string())
                .map_err(archive_err)
        })
        .collect()
}

/// Contents of one entry.
pub fn read_entry(bytes: &[u8], name: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_err)?;
    let mut file = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => CertError::not_found(format!("archive entry {name}")),
        other => archive_err(other),
    })?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = ArchiveBuilder::new();
        for (name, body) in files {
            builder.add_file(name, body.as_bytes()).unwrap();
        }
        assert_eq!(builder.len(), files.len());
        builder.finish().unwrap()
    }

    #[test]
    fn test_build_and_read() {
        let bytes = archive(&[("a_cert.pem", "CERT"), ("a_key.pem", "KEY")]);
        assert_eq!(entry_names(&bytes).unwrap(), vec!["a_cert.pem", "a_key.pem"]);
        assert_eq!(read_entry(&bytes, "a_key.pem").unwrap(), b"KEY");
        assert!(read_entry(&bytes, "missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_merge_namespaces_entries() {
        let one = archive(&[("x_cert.pem", "X"), ("manifest.json", "{}")]);
        let two = archive(&[("y_cert.pem", "Y"), ("manifest.json", "{\"a\":1}")]);

        let merged = merge_archives(&[(1, one), (2, two)]).unwrap();
        assert_eq!(
            entry_names(&merged).unwrap(),
            vec![
                "1/x_cert.pem",
                "1/manifest.json",
                "2/y_cert.pem",
                "2/manifest.json"
            ]
        );
        assert_eq!(read_entry(&merged, "2/manifest.json").unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_merge_rejects_garbage() {
        let err = merge_archives(&[(1, b"not a zip".to_vec())]).unwrap_err();
        assert!(matches!(err, CertError::Archive(_)));
    }

    #[test]
    fn test_empty_archive() {
        let builder = ArchiveBuilder::new();
        assert!(builder.is_empty());
        let bytes = builder.finish().unwrap();
        assert!(entry_names(&bytes).unwrap().is_empty());
    }
}
