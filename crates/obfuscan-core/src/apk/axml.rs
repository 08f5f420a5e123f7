//! Decoder for Android binary XML (the compiled form of `AndroidManifest.xml`).
//!
//! Only what feature extraction needs is kept: the string pool, the
//! resource-id map and the start-element chunks with their attributes.
//! Namespaces, end tags and CDATA are skipped.

use crate::error::ParseError;

pub(crate) const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub(crate) const RES_XML_TYPE: u16 = 0x0003;
pub(crate) const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
pub(crate) const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
pub(crate) const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

/// Resource id of the `android:name` attribute.
pub(crate) const ANDROID_NAME_RES_ID: u32 = 0x0101_0003;

pub(crate) const TYPE_STRING: u8 = 0x03;
pub(crate) const NO_INDEX: u32 = 0xFFFF_FFFF;
pub(crate) const UTF8_FLAG: u32 = 1 << 8;

const CHUNK_HEADER_LEN: usize = 8;
const ATTRIBUTE_MIN_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub resource_id: Option<u32>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

impl Element {
    /// Value of `android:name`, matched by resource id first so that
    /// manifests with stripped attribute-name strings still resolve.
    pub fn android_name(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.resource_id == Some(ANDROID_NAME_RES_ID))
            .or_else(|| self.attributes.iter().find(|a| a.name == "name"))
            .and_then(|a| a.value.as_deref())
    }
}

#[derive(Debug, Default)]
pub struct BinaryXml {
    pub elements: Vec<Element>,
}

/// Little-endian bounds-checked reads.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8_at(&self, off: usize) -> Result<u8, ParseError> {
        self.data
            .get(off)
            .copied()
            .ok_or_else(|| ParseError::manifest(off, "unexpected end of data"))
    }

    fn u16_at(&self, off: usize) -> Result<u16, ParseError> {
        let b = self
            .data
            .get(off..off + 2)
            .ok_or_else(|| ParseError::manifest(off, "unexpected end of data"))?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_at(&self, off: usize) -> Result<u32, ParseError> {
        let b = self
            .data
            .get(off..off + 4)
            .ok_or_else(|| ParseError::manifest(off, "unexpected end of data"))?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn slice(&self, off: usize, len: usize) -> Result<&'a [u8], ParseError> {
        self.data
            .get(off..off.saturating_add(len))
            .ok_or_else(|| ParseError::manifest(off, "string runs past end of data"))
    }
}

pub fn parse(data: &[u8]) -> Result<BinaryXml, ParseError> {
    let r = Reader { data };

    if r.u16_at(0)? != RES_XML_TYPE {
        return Err(ParseError::manifest(0, "not an Android binary XML document"));
    }
    let header_len = r.u16_at(2)? as usize;
    // Some packers write a bogus document size; trust the buffer instead.
    let declared = r.u32_at(4)? as usize;
    let end = if declared < CHUNK_HEADER_LEN || declared > data.len() {
        data.len()
    } else {
        declared
    };

    let mut strings: Vec<String> = Vec::new();
    let mut resource_ids: Vec<u32> = Vec::new();
    let mut doc = BinaryXml::default();

    let mut off = header_len.max(CHUNK_HEADER_LEN);
    while off + CHUNK_HEADER_LEN <= end {
        let chunk_type = r.u16_at(off)?;
        let chunk_header_len = r.u16_at(off + 2)? as usize;
        let chunk_len = r.u32_at(off + 4)? as usize;
        if chunk_len < CHUNK_HEADER_LEN || off + chunk_len > end {
            return Err(ParseError::manifest(off, format!("bad chunk size {chunk_len}")));
        }
        if chunk_header_len < CHUNK_HEADER_LEN || chunk_header_len > chunk_len {
            return Err(ParseError::manifest(
                off,
                format!("bad chunk header size {chunk_header_len} for chunk of {chunk_len} bytes"),
            ));
        }

        match chunk_type {
            RES_STRING_POOL_TYPE => {
                strings = parse_string_pool(&r, off, chunk_header_len)?;
            }
            RES_XML_RESOURCE_MAP_TYPE => {
                let count = (chunk_len - chunk_header_len) / 4;
                resource_ids = (0..count)
                    .map(|i| r.u32_at(off + chunk_header_len + i * 4))
                    .collect::<Result<_, _>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                let element =
                    parse_start_element(&r, off, chunk_header_len, &strings, &resource_ids)?;
                doc.elements.push(element);
            }
            _ => {}
        }

        off += chunk_len;
    }

    Ok(doc)
}

fn parse_string_pool(r: &Reader, off: usize, header_len: usize) -> Result<Vec<String>, ParseError> {
    let count = r.u32_at(off + 8)? as usize;
    let flags = r.u32_at(off + 16)?;
    let strings_start = r.u32_at(off + 20)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    if count > r.data.len() / 4 {
        return Err(ParseError::manifest(off, format!("string count {count} too large")));
    }

    let mut strings = Vec::with_capacity(count);
    for i in 0..count {
        let rel = r.u32_at(off + header_len + i * 4)? as usize;
        let at = off + strings_start + rel;
        let s = if utf8 { read_utf8(r, at)? } else { read_utf16(r, at)? };
        strings.push(s);
    }
    Ok(strings)
}

fn read_utf16(r: &Reader, at: usize) -> Result<String, ParseError> {
    let mut len = r.u16_at(at)? as usize;
    let mut start = at + 2;
    if len & 0x8000 != 0 {
        len = ((len & 0x7FFF) << 16) | r.u16_at(at + 2)? as usize;
        start += 2;
    }
    let bytes = r.slice(start, len * 2)?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn read_utf8(r: &Reader, at: usize) -> Result<String, ParseError> {
    // Character count (unused) followed by byte count, each 1 or 2 bytes.
    let mut pos = at;
    if r.u8_at(pos)? & 0x80 != 0 {
        pos += 1;
    }
    pos += 1;

    let first = r.u8_at(pos)? as usize;
    let len = if first & 0x80 != 0 {
        let second = r.u8_at(pos + 1)? as usize;
        pos += 2;
        ((first & 0x7F) << 8) | second
    } else {
        pos += 1;
        first
    };

    Ok(String::from_utf8_lossy(r.slice(pos, len)?).into_owned())
}

fn parse_start_element(
    r: &Reader,
    off: usize,
    header_len: usize,
    strings: &[String],
    resource_ids: &[u32],
) -> Result<Element, ParseError> {
    let ext = off + header_len;
    let name_idx = r.u32_at(ext + 4)?;
    let attr_start = r.u16_at(ext + 8)? as usize;
    let attr_size = (r.u16_at(ext + 10)? as usize).max(ATTRIBUTE_MIN_LEN);
    let attr_count = r.u16_at(ext + 12)? as usize;

    let lookup = |idx: u32| -> Option<String> {
        if idx == NO_INDEX {
            None
        } else {
            strings.get(idx as usize).cloned()
        }
    };

    let mut attributes = Vec::with_capacity(attr_count);
    for i in 0..attr_count {
        let at = ext + attr_start + i * attr_size;
        let attr_name = r.u32_at(at + 4)?;
        let raw_value = r.u32_at(at + 8)?;
        let data_type = r.u8_at(at + 15)?;
        let data = r.u32_at(at + 16)?;

        let value = lookup(raw_value).or_else(|| {
            if data_type == TYPE_STRING {
                lookup(data)
            } else {
                None
            }
        });

        attributes.push(Attribute {
            name: lookup(attr_name).unwrap_or_default(),
            resource_id: resource_ids.get(attr_name as usize).copied(),
            value,
        });
    }

    Ok(Element {
        name: lookup(name_idx).unwrap_or_default(),
        attributes,
    })
}
