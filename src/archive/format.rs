//! Archive format selection

use crate::error::{AppError, Result};

/// Supported archive container formats.
///
/// One is selected per export request from the `algo` query token and passed
/// opaquely to the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarLz4,
    TarSz,
}

impl ArchiveFormat {
    /// Resolves the query token. `zip` is the default; `true` is accepted as
    /// a legacy alias for it.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "zip" | "true" | "" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "targz" => Ok(ArchiveFormat::TarGz),
            "tarbz2" => Ok(ArchiveFormat::TarBz2),
            "tarxz" => Ok(ArchiveFormat::TarXz),
            "tarlz4" => Ok(ArchiveFormat::TarLz4),
            "tarsz" => Ok(ArchiveFormat::TarSz),
            other => Err(AppError::UnsupportedFormat(other.to_string())),
        }
    }

    /// File extension for the download filename, dot included.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => ".zip",
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::TarGz => ".tar.gz",
            ArchiveFormat::TarBz2 => ".tar.bz2",
            ArchiveFormat::TarXz => ".tar.xz",
            ArchiveFormat::TarLz4 => ".tar.lz4",
            ArchiveFormat::TarSz => ".tar.sz",
        }
    }
}
