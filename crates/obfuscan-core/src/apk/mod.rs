//! Static feature extraction from an Android package.
//!
//! A package is a ZIP archive. Three features are read from it:
//! - the file size in bytes (from the filesystem)
//! - the number of `classes<N>.dex` bytecode containers at the archive root
//! - the permissions requested by `uses-permission` elements of the
//!   binary `AndroidManifest.xml`

pub mod axml;

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::ParseError;

const MANIFEST_NAME: &str = "AndroidManifest.xml";
const PERMISSION_TAGS: &[&str] = &["uses-permission", "uses-permission-sdk-23"];
/// Decompressed manifests larger than this are rejected.
const MAX_MANIFEST_BYTES: u64 = 16 * 1024 * 1024;

/// Features of one package. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawFeatures {
    pub size: u64,
    pub dex_count: usize,
    pub permissions: BTreeSet<String>,
}

/// Whether an archive entry is a root-level `classes.dex`, `classes2.dex`, ...
pub fn is_dex_entry(name: &str) -> bool {
    name.strip_prefix("classes")
        .and_then(|rest| rest.strip_suffix(".dex"))
        .is_some_and(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Extract features from the package at `path`.
pub fn extract(path: &Path) -> Result<RawFeatures, ParseError> {
    let io_err = |source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    };

    let size = fs::metadata(path).map_err(io_err)?.len();
    let file = fs::File::open(path).map_err(io_err)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let dex_count = archive
        .file_names()
        .filter(|name| is_dex_entry(name))
        .collect::<BTreeSet<_>>()
        .len();

    let manifest = read_manifest(&mut archive)?;
    let doc = axml::parse(&manifest)?;
    let permissions = declared_permissions(&doc);

    debug!(
        path = %path.display(),
        size,
        dex_count,
        permissions = permissions.len(),
        "extracted package features"
    );

    Ok(RawFeatures {
        size,
        dex_count,
        permissions,
    })
}

fn read_manifest<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<u8>, ParseError> {
    let entry = match archive.by_name(MANIFEST_NAME) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(ParseError::MissingManifest),
        Err(e) => return Err(e.into()),
    };
    let declared = entry.size();
    read_bounded(entry, declared, MAX_MANIFEST_BYTES)
}

/// Read at most `limit` bytes. `declared` comes from the archive and is
/// only a capacity hint.
fn read_bounded<R: Read>(reader: R, declared: u64, limit: u64) -> Result<Vec<u8>, ParseError> {
    let mut buf = Vec::with_capacity(declared.min(limit) as usize);
    reader
        .take(limit + 1)
        .read_to_end(&mut buf)
        .map_err(|e| ParseError::Archive(ZipError::Io(e)))?;
    if buf.len() as u64 > limit {
        return Err(ParseError::manifest(0, format!("manifest exceeds {limit} bytes")));
    }
    Ok(buf)
}

fn declared_permissions(doc: &axml::BinaryXml) -> BTreeSet<String> {
    doc.elements
        .iter()
        .filter(|e| PERMISSION_TAGS.contains(&e.name.as_str()))
        .filter_map(|e| e.android_name())
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
