//! Archive writers
//!
//! One writer type per container format behind a uniform append/finish
//! surface, so the exporter never branches on the format. Tar variants
//! stream straight through their compressor into the sink. Zip needs a
//! seekable output for its central directory, so it spools into an
//! anonymous temp file and drains that into the sink at `finish`.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::format::ArchiveFormat;

/// Byte sink an archive is written into, typically the response body.
pub type Sink = Box<dyn Write + Send>;

/// Streaming archive writer over a [`Sink`].
///
/// Entry names are slash-separated and relative (no leading `/`).
pub enum ArchiveWriter {
    Zip {
        spool: zip::ZipWriter<fs::File>,
        out: Sink,
    },
    Tar(tar::Builder<Sink>),
    TarGz(tar::Builder<flate2::write::GzEncoder<Sink>>),
    TarBz2(tar::Builder<bzip2::write::BzEncoder<Sink>>),
    TarXz(tar::Builder<xz2::write::XzEncoder<Sink>>),
    TarLz4(tar::Builder<lz4_flex::frame::FrameEncoder<Sink>>),
    TarSz(tar::Builder<snap::write::FrameEncoder<Sink>>),
}

impl ArchiveWriter {
    pub fn new(format: ArchiveFormat, out: Sink) -> io::Result<Self> {
        Ok(match format {
            ArchiveFormat::Zip => ArchiveWriter::Zip {
                spool: zip::ZipWriter::new(tempfile::tempfile()?),
                out,
            },
            ArchiveFormat::Tar => ArchiveWriter::Tar(tar::Builder::new(out)),
            ArchiveFormat::TarGz => ArchiveWriter::TarGz(tar::Builder::new(
                flate2::write::GzEncoder::new(out, flate2::Compression::default()),
            )),
            ArchiveFormat::TarBz2 => ArchiveWriter::TarBz2(tar::Builder::new(
                bzip2::write::BzEncoder::new(out, bzip2::Compression::default()),
            )),
            ArchiveFormat::TarXz => ArchiveWriter::TarXz(tar::Builder::new(
                xz2::write::XzEncoder::new(out, 6),
            )),
            ArchiveFormat::TarLz4 => ArchiveWriter::TarLz4(tar::Builder::new(
                lz4_flex::frame::FrameEncoder::new(out),
            )),
            ArchiveFormat::TarSz => ArchiveWriter::TarSz(tar::Builder::new(
                snap::write::FrameEncoder::new(out),
            )),
        })
    }

    /// Appends one file entry, copying `reader` as its content.
    ///
    /// The entry size is taken from `meta`; named pipes stat as zero-length
    /// and are appended with an empty reader, never opened.
    pub fn append_file(
        &mut self,
        name: &str,
        meta: &fs::Metadata,
        reader: &mut dyn Read,
    ) -> io::Result<()> {
        match self {
            ArchiveWriter::Zip { spool, .. } => {
                let opts = zip_options(meta);
                spool.start_file(name, opts).map_err(into_io)?;
                io::copy(reader, spool)?;
                Ok(())
            }
            ArchiveWriter::Tar(b) => tar_file(b, name, meta, reader),
            ArchiveWriter::TarGz(b) => tar_file(b, name, meta, reader),
            ArchiveWriter::TarBz2(b) => tar_file(b, name, meta, reader),
            ArchiveWriter::TarXz(b) => tar_file(b, name, meta, reader),
            ArchiveWriter::TarLz4(b) => tar_file(b, name, meta, reader),
            ArchiveWriter::TarSz(b) => tar_file(b, name, meta, reader),
        }
    }

    /// Appends a directory entry.
    pub fn append_dir(&mut self, name: &str, meta: &fs::Metadata) -> io::Result<()> {
        match self {
            ArchiveWriter::Zip { spool, .. } => {
                let opts = zip_options(meta);
                spool.add_directory(name, opts).map_err(into_io)
            }
            ArchiveWriter::Tar(b) => tar_dir(b, name, meta),
            ArchiveWriter::TarGz(b) => tar_dir(b, name, meta),
            ArchiveWriter::TarBz2(b) => tar_dir(b, name, meta),
            ArchiveWriter::TarXz(b) => tar_dir(b, name, meta),
            ArchiveWriter::TarLz4(b) => tar_dir(b, name, meta),
            ArchiveWriter::TarSz(b) => tar_dir(b, name, meta),
        }
    }

    /// Closes the container and flushes every buffered layer into the sink.
    pub fn finish(self) -> io::Result<()> {
        match self {
            ArchiveWriter::Zip { spool, mut out } => {
                let mut file = spool.finish().map_err(into_io)?;
                file.seek(SeekFrom::Start(0))?;
                io::copy(&mut file, &mut out)?;
                out.flush()
            }
            ArchiveWriter::Tar(b) => {
                let mut out = b.into_inner()?;
                out.flush()
            }
            ArchiveWriter::TarGz(b) => {
                let mut out = b.into_inner()?.finish()?;
                out.flush()
            }
            ArchiveWriter::TarBz2(b) => {
                let mut out = b.into_inner()?.finish()?;
                out.flush()
            }
            ArchiveWriter::TarXz(b) => {
                let mut out = b.into_inner()?.finish()?;
                out.flush()
            }
            ArchiveWriter::TarLz4(b) => {
                let mut out = b.into_inner()?.finish().map_err(io::Error::other)?;
                out.flush()
            }
            ArchiveWriter::TarSz(b) => {
                // flush() drains every pending frame into the sink.
                let mut enc = b.into_inner()?;
                enc.flush()
            }
        }
    }
}

fn into_io(e: zip::result::ZipError) -> io::Error {
    match e {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::other(other),
    }
}

fn zip_options(meta: &fs::Metadata) -> zip::write::SimpleFileOptions {
    let opts = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(meta.len() > u32::MAX as u64);
    #[cfg(unix)]
    let opts = {
        use std::os::unix::fs::PermissionsExt;
        opts.unix_permissions(meta.permissions().mode())
    };
    opts
}

fn tar_file<W: Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    meta: &fs::Metadata,
    reader: &mut dyn Read,
) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(meta.len());
    header.set_mode(file_mode(meta, 0o644));
    header.set_mtime(mtime_secs(meta));
    builder.append_data(&mut header, name, reader)
}

fn tar_dir<W: Write>(builder: &mut tar::Builder<W>, name: &str, meta: &fs::Metadata) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::dir());
    header.set_size(0);
    header.set_mode(file_mode(meta, 0o755));
    header.set_mtime(mtime_secs(meta));
    builder.append_data(&mut header, format!("{}/", name), io::empty())
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata, _fallback: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata, fallback: u32) -> u32 {
    fallback
}

fn mtime_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (Sink, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        #[derive(Clone)]
        struct Shared(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (Box::new(Shared(buf.clone())), buf)
    }

    fn sample_meta(dir: &tempfile::TempDir, content: &[u8]) -> fs::Metadata {
        let path = dir.path().join("sample");
        fs::write(&path, content).unwrap();
        fs::metadata(&path).unwrap()
    }

    #[test]
    fn tar_contains_appended_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let (sink, buf) = collecting_sink();

        let mut w = ArchiveWriter::new(ArchiveFormat::Tar, sink).unwrap();
        let meta = sample_meta(&dir, b"hello");
        w.append_dir("docs", &fs::metadata(dir.path()).unwrap()).unwrap();
        w.append_file("docs/a.txt", &meta, &mut &b"hello"[..]).unwrap();
        w.finish().unwrap();

        let bytes = buf.lock().unwrap().clone();
        let mut archive = tar::Archive::new(&bytes[..]);
        let mut names = Vec::new();
        let mut content = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
            entry.read_to_end(&mut content).unwrap();
        }
        assert_eq!(names, vec!["docs/", "docs/a.txt"]);
        assert_eq!(content, b"hello");
    }

    #[test]
    fn gzip_variant_produces_gzip_magic() {
        let dir = tempfile::TempDir::new().unwrap();
        let (sink, buf) = collecting_sink();

        let mut w = ArchiveWriter::new(ArchiveFormat::TarGz, sink).unwrap();
        let meta = sample_meta(&dir, b"x");
        w.append_file("f", &meta, &mut &b"x"[..]).unwrap();
        w.finish().unwrap();

        let bytes = buf.lock().unwrap().clone();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(&bytes[..]));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["f"]);
    }

    #[test]
    fn zip_spools_then_drains_at_finish() {
        let dir = tempfile::TempDir::new().unwrap();
        let (sink, buf) = collecting_sink();

        let mut w = ArchiveWriter::new(ArchiveFormat::Zip, sink).unwrap();
        let meta = sample_meta(&dir, b"zip body");
        w.append_file("inner.txt", &meta, &mut &b"zip body"[..]).unwrap();

        // Nothing reaches the sink until finish.
        assert!(buf.lock().unwrap().is_empty());
        w.finish().unwrap();

        let bytes = buf.lock().unwrap().clone();
        let mut archive = zip::ZipArchive::new(io::Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name("inner.txt").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "zip body");
    }

    #[test]
    fn compressor_variants_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let meta = sample_meta(&dir, b"payload");

        for format in [
            ArchiveFormat::TarBz2,
            ArchiveFormat::TarXz,
            ArchiveFormat::TarLz4,
            ArchiveFormat::TarSz,
        ] {
            let (sink, buf) = collecting_sink();
            let mut w = ArchiveWriter::new(format, sink).unwrap();
            w.append_dir("d", &fs::metadata(dir.path()).unwrap()).unwrap();
            w.append_file("d/f.bin", &meta, &mut &b"payload"[..]).unwrap();
            w.finish().unwrap();

            let bytes = buf.lock().unwrap().clone();
            let reader: Box<dyn Read> = match format {
                ArchiveFormat::TarBz2 => Box::new(bzip2::read::BzDecoder::new(&bytes[..])),
                ArchiveFormat::TarXz => Box::new(xz2::read::XzDecoder::new(&bytes[..])),
                ArchiveFormat::TarLz4 => {
                    Box::new(lz4_flex::frame::FrameDecoder::new(&bytes[..]))
                }
                ArchiveFormat::TarSz => Box::new(snap::read::FrameDecoder::new(&bytes[..])),
                _ => unreachable!(),
            };

            let mut archive = tar::Archive::new(reader);
            let mut names = Vec::new();
            let mut content = Vec::new();
            for entry in archive.entries().unwrap() {
                let mut entry = entry.unwrap();
                names.push(entry.path().unwrap().to_string_lossy().into_owned());
                entry.read_to_end(&mut content).unwrap();
            }
            assert_eq!(names, vec!["d/", "d/f.bin"], "{:?}", format);
            assert_eq!(content, b"payload", "{:?}", format);
        }
    }

    #[test]
    fn empty_archive_is_still_valid() {
        for format in [ArchiveFormat::Zip, ArchiveFormat::Tar, ArchiveFormat::TarGz] {
            let (sink, buf) = collecting_sink();
            let w = ArchiveWriter::new(format, sink).unwrap();
            w.finish().unwrap();
            assert!(!buf.lock().unwrap().is_empty());
        }
    }
}
