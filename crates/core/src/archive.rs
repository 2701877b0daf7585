//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Archive container: a single `tar` stream (optionally gzip-compressed)
//! holding `manifest`, `manifest.sig`, then one entry per declared
//! attribute. Reading never requires seeking — the load pipeline consumes
//! entries in the order the writer emitted them.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;

use tar::{Builder, EntryType, Header};

const MANIFEST_NAME: &str = "manifest";
const SIGNATURE_NAME: &str = "manifest.sig";

/// Everything read back out of an archive, before any verification has
/// happened. `entries` is keyed by the archive member name, which matches
/// `EntryRecord::name` in the manifest.
pub struct ArchiveContents {
    pub manifest_bytes: Vec<u8>,
    pub signature_bytes: Vec<u8>,
    pub entries: HashMap<String, Vec<u8>>,
}

fn tar_header(name: &str, len: u64) -> io::Result<Header> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(len);
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o644);
    header.set_cksum();
    Ok(header)
}

/// Write `manifest`, `manifest.sig`, then `entries` (in the given order) as
/// tar members into `sink`. If `compress` is true the tar stream is wrapped
/// in gzip before anything is written.
pub fn write_archive<W: Write>(
    sink: W,
    manifest_bytes: &[u8],
    signature_bytes: &[u8],
    entries: &[(String, Vec<u8>)],
    compress: bool,
) -> io::Result<()> {
    if compress {
        let encoder = flate2::write::GzEncoder::new(sink, flate2::Compression::default());
        write_tar(encoder, manifest_bytes, signature_bytes, entries)?.finish()?;
    } else {
        write_tar(sink, manifest_bytes, signature_bytes, entries)?;
    }
    Ok(())
}

fn write_tar<W: Write>(
    sink: W,
    manifest_bytes: &[u8],
    signature_bytes: &[u8],
    entries: &[(String, Vec<u8>)],
) -> io::Result<W> {
    let mut builder = Builder::new(sink);
    builder.append(
        &tar_header(MANIFEST_NAME, manifest_bytes.len() as u64)?,
        manifest_bytes,
    )?;
    builder.append(
        &tar_header(SIGNATURE_NAME, signature_bytes.len() as u64)?,
        signature_bytes,
    )?;
    for (name, bytes) in entries {
        builder.append(&tar_header(name, bytes.len() as u64)?, bytes.as_slice())?;
    }
    builder.into_inner()
}

/// Read every member out of an archive, detecting gzip from its magic
/// bytes so callers don't need to track whether a given archive was
/// written compressed.
pub fn read_archive<R: Read>(mut source: R) -> io::Result<ArchiveContents> {
    let mut prefix = [0u8; 2];
    let mut buffered = Vec::new();
    let read = source.read(&mut prefix)?;
    buffered.extend_from_slice(&prefix[..read]);

    let rest = prefix_chain(buffered, source);
    if read == 2 && prefix == [0x1f, 0x8b] {
        read_tar(flate2::read::GzDecoder::new(rest))
    } else {
        read_tar(rest)
    }
}

fn prefix_chain<R: Read>(buffered: Vec<u8>, rest: R) -> impl Read {
    io::Cursor::new(buffered).chain(rest)
}

fn read_tar<R: Read>(source: R) -> io::Result<ArchiveContents> {
    let mut archive = tar::Archive::new(source);
    let mut manifest_bytes = None;
    let mut signature_bytes = None;
    let mut entries = HashMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let name = path.to_string_lossy().into_owned();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        match name.as_str() {
            MANIFEST_NAME => manifest_bytes = Some(bytes),
            SIGNATURE_NAME => signature_bytes = Some(bytes),
            _ => {
                entries.insert(name, bytes);
            }
        }
    }

    Ok(ArchiveContents {
        manifest_bytes: manifest_bytes
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "archive has no manifest"))?,
        signature_bytes: signature_bytes.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "archive has no manifest.sig")
        })?,
        entries,
    })
}

/// Convenience wrapper around `write_archive` for callers writing straight
/// to a path. Writes to a temp file beside the destination, then renames
/// into place, so a crash mid-write never leaves a truncated archive at
/// the final path.
pub fn write_archive_to_path(
    path: &Path,
    manifest_bytes: &[u8],
    signature_bytes: &[u8],
    entries: &[(String, Vec<u8>)],
    compress: bool,
) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile_in(dir)?;
    write_archive(&mut tmp, manifest_bytes, signature_bytes, entries, compress)?;
    tmp.persist(path)
}

/// Convenience wrapper around `read_archive` for callers reading straight
/// from a path.
pub fn read_archive_from_path(path: &Path) -> io::Result<ArchiveContents> {
    let file = std::fs::File::open(path)?;
    read_archive(io::BufReader::new(file))
}

/// A named temp file adjacent to `dir`, renamed into place on `persist`.
/// `tar`'s `Builder` needs a concrete writer it can finish, so this is a
/// thin seam rather than pulling in the `tempfile` crate as a runtime
/// dependency (it remains a dev-dependency for tests).
struct NamedTempFile {
    path: std::path::PathBuf,
    file: std::fs::File,
}

impl NamedTempFile {
    fn persist(self, dest: &Path) -> io::Result<()> {
        drop(self.file);
        std::fs::rename(&self.path, dest)
    }
}

impl Write for NamedTempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn tempfile_in(dir: &Path) -> io::Result<NamedTempFile> {
    std::fs::create_dir_all(dir)?;
    let pid = std::process::id();
    let thread_id = format!("{:?}", std::thread::current().id());
    let path = dir.join(format!(".vault-archive-{pid}-{thread_id}.tmp"));
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    Ok(NamedTempFile { path, file })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<(String, Vec<u8>)> {
        vec![
            ("skeleton".to_string(), b"{}".to_vec()),
            ("weights".to_string(), vec![1, 2, 3, 4]),
        ]
    }

    #[test]
    fn round_trips_uncompressed() {
        let mut buf = Vec::new();
        write_archive(&mut buf, b"manifest-bytes", b"sig-bytes", &sample_entries(), false).unwrap();
        let contents = read_archive(io::Cursor::new(buf)).unwrap();
        assert_eq!(contents.manifest_bytes, b"manifest-bytes");
        assert_eq!(contents.signature_bytes, b"sig-bytes");
        assert_eq!(contents.entries.get("weights").unwrap(), &vec![1, 2, 3, 4]);
    }

    #[test]
    fn round_trips_compressed() {
        let mut buf = Vec::new();
        write_archive(&mut buf, b"manifest-bytes", b"sig-bytes", &sample_entries(), true).unwrap();
        assert_eq!(&buf[..2], &[0x1f, 0x8b]);
        let contents = read_archive(io::Cursor::new(buf)).unwrap();
        assert_eq!(contents.manifest_bytes, b"manifest-bytes");
        assert_eq!(contents.entries.len(), 2);
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let mut buf = Vec::new();
        {
            let mut builder = Builder::new(&mut buf);
            builder
                .append(&tar_header(SIGNATURE_NAME, 3).unwrap(), &b"sig"[..])
                .unwrap();
            builder.finish().unwrap();
        }
        let err = read_archive(io::Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn path_round_trip_with_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.vault");
        write_archive_to_path(&path, b"m", b"s", &sample_entries(), false).unwrap();
        let contents = read_archive_from_path(&path).unwrap();
        assert_eq!(contents.manifest_bytes, b"m");
    }
}
