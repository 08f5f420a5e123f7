//! Test fixtures: binary manifests, APK archives, artifacts and a closure classifier.

use std::io::{Cursor, Write};

use ndarray::{ArrayView1, ArrayView2};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::apk::axml::{
    ANDROID_NAME_RES_ID, NO_INDEX, RES_STRING_POOL_TYPE, RES_XML_END_ELEMENT_TYPE,
    RES_XML_RESOURCE_MAP_TYPE, RES_XML_START_ELEMENT_TYPE, RES_XML_TYPE, TYPE_STRING, UTF8_FLAG,
};
use crate::classifier::{check_input_width, check_scores, Classifier};
use crate::error::ModelError;

pub(crate) fn write_temp(suffix: &str, bytes: &[u8]) -> NamedTempFile {
    let mut tmp = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    tmp.write_all(bytes).unwrap();
    tmp.flush().unwrap();
    tmp
}

pub(crate) fn write_apk(bytes: &[u8]) -> NamedTempFile {
    write_temp(".apk", bytes)
}

/// Builds a compiled `AndroidManifest.xml` with a `<manifest>` root and
/// one child element per call to [`permission`](Self::permission) / [`element`](Self::element).
pub(crate) struct ManifestBuilder {
    package: String,
    children: Vec<(String, String)>,
    utf8: bool,
    strip_attribute_names: bool,
}

impl ManifestBuilder {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            children: Vec::new(),
            utf8: false,
            strip_attribute_names: false,
        }
    }

    pub fn permission(self, name: &str) -> Self {
        self.element("uses-permission", name)
    }

    pub fn element(mut self, tag: &str, name: &str) -> Self {
        self.children.push((tag.to_string(), name.to_string()));
        self
    }

    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    /// Blank out the `name` attribute string, leaving only its resource id.
    pub fn strip_attribute_names(mut self) -> Self {
        self.strip_attribute_names = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut strings: Vec<String> = Vec::new();
        let mut intern = |s: &str| -> u32 {
            if let Some(i) = strings.iter().position(|x| x == s) {
                return i as u32;
            }
            strings.push(s.to_string());
            (strings.len() - 1) as u32
        };

        // Index 0 is covered by the resource map.
        let name_attr = intern(if self.strip_attribute_names { "" } else { "name" });
        let package_attr = intern("package");
        let manifest_tag = intern("manifest");
        let package_value = intern(&self.package);
        let children: Vec<(u32, u32)> = self
            .children
            .iter()
            .map(|(tag, value)| (intern(tag), intern(value)))
            .collect();

        let mut body = string_pool_chunk(&strings, self.utf8);
        body.extend(resource_map_chunk(&[ANDROID_NAME_RES_ID]));
        body.extend(start_element_chunk(manifest_tag, &[(package_attr, package_value)]));
        for (tag, value) in children {
            body.extend(start_element_chunk(tag, &[(name_attr, value)]));
            body.extend(end_element_chunk(tag));
        }
        body.extend(end_element_chunk(manifest_tag));

        let mut doc = Vec::new();
        put_u16(&mut doc, RES_XML_TYPE);
        put_u16(&mut doc, 8);
        put_u32(&mut doc, (8 + body.len()) as u32);
        doc.extend(body);
        doc
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn string_pool_chunk(strings: &[String], utf8: bool) -> Vec<u8> {
    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(data.len() as u32);
        if utf8 {
            data.push(s.chars().count() as u8);
            data.push(s.len() as u8);
            data.extend_from_slice(s.as_bytes());
            data.push(0);
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            put_u16(&mut data, units.len() as u16);
            for u in units {
                put_u16(&mut data, u);
            }
            put_u16(&mut data, 0);
        }
    }
    while data.len() % 4 != 0 {
        data.push(0);
    }

    let header_len = 28;
    let strings_start = header_len + 4 * strings.len();
    let mut chunk = Vec::new();
    put_u16(&mut chunk, RES_STRING_POOL_TYPE);
    put_u16(&mut chunk, header_len as u16);
    put_u32(&mut chunk, (strings_start + data.len()) as u32);
    put_u32(&mut chunk, strings.len() as u32);
    put_u32(&mut chunk, 0);
    put_u32(&mut chunk, if utf8 { UTF8_FLAG } else { 0 });
    put_u32(&mut chunk, strings_start as u32);
    put_u32(&mut chunk, 0);
    for off in offsets {
        put_u32(&mut chunk, off);
    }
    chunk.extend(data);
    chunk
}

fn resource_map_chunk(ids: &[u32]) -> Vec<u8> {
    let mut chunk = Vec::new();
    put_u16(&mut chunk, RES_XML_RESOURCE_MAP_TYPE);
    put_u16(&mut chunk, 8);
    put_u32(&mut chunk, (8 + 4 * ids.len()) as u32);
    for &id in ids {
        put_u32(&mut chunk, id);
    }
    chunk
}

fn start_element_chunk(name: u32, attributes: &[(u32, u32)]) -> Vec<u8> {
    let mut chunk = Vec::new();
    put_u16(&mut chunk, RES_XML_START_ELEMENT_TYPE);
    put_u16(&mut chunk, 16);
    put_u32(&mut chunk, (16 + 20 + 20 * attributes.len()) as u32);
    put_u32(&mut chunk, 1);
    put_u32(&mut chunk, NO_INDEX);
    // attribute extension
    put_u32(&mut chunk, NO_INDEX);
    put_u32(&mut chunk, name);
    put_u16(&mut chunk, 20);
    put_u16(&mut chunk, 20);
    put_u16(&mut chunk, attributes.len() as u16);
    put_u16(&mut chunk, 0);
    put_u16(&mut chunk, 0);
    put_u16(&mut chunk, 0);
    for &(attr_name, value) in attributes {
        put_u32(&mut chunk, NO_INDEX);
        put_u32(&mut chunk, attr_name);
        put_u32(&mut chunk, value);
        put_u16(&mut chunk, 8);
        chunk.push(0);
        chunk.push(TYPE_STRING);
        put_u32(&mut chunk, value);
    }
    chunk
}

fn end_element_chunk(name: u32) -> Vec<u8> {
    let mut chunk = Vec::new();
    put_u16(&mut chunk, RES_XML_END_ELEMENT_TYPE);
    put_u16(&mut chunk, 16);
    put_u32(&mut chunk, 24);
    put_u32(&mut chunk, 1);
    put_u32(&mut chunk, NO_INDEX);
    put_u32(&mut chunk, NO_INDEX);
    put_u32(&mut chunk, name);
    chunk
}

/// Builds an in-memory APK (ZIP) archive.
#[derive(Default)]
pub(crate) struct ApkBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ApkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manifest(self, manifest: ManifestBuilder) -> Self {
        let bytes = manifest.build();
        self.entry("AndroidManifest.xml", &bytes)
    }

    pub fn dex(self, name: &str) -> Self {
        self.entry(name, b"dex\n035\0")
    }

    pub fn entry(mut self, name: &str, bytes: &[u8]) -> Self {
        self.entries.push((name.to_string(), bytes.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in &self.entries {
            writer.start_file(name.as_str(), options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}

/// Classifier backed by a closure over one row.
pub(crate) struct FnClassifier<F> {
    width: usize,
    f: F,
}

impl<F> FnClassifier<F>
where
    F: Fn(ArrayView1<'_, f32>) -> f32 + Send + Sync,
{
    pub fn new(width: usize, f: F) -> Self {
        Self { width, f }
    }
}

impl<F> Classifier for FnClassifier<F>
where
    F: Fn(ArrayView1<'_, f32>) -> f32 + Send + Sync,
{
    fn input_width(&self) -> Option<usize> {
        Some(self.width)
    }

    fn predict_batch(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, ModelError> {
        check_input_width(self.width, &rows)?;
        let scores: Vec<f32> = rows.outer_iter().map(|row| (self.f)(row)).collect();
        check_scores(&scores, rows.nrows())?;
        Ok(scores)
    }
}
