//! Decoder for Android's compiled binary XML (AXML).
//!
//! `AndroidManifest.xml` inside an APK is not text: aapt compiles it into a
//! chunked format with a shared string pool. Only the chunks a manifest uses
//! are decoded; anything else is skipped by its declared size.

use crate::error::ApkParseError;

const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_TYPE: u16 = 0x0003;
const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
const RES_XML_CDATA_TYPE: u16 = 0x0104;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xFFFF_FFFF;
const CHUNK_HEADER_LEN: usize = 8;

const TYPE_REFERENCE: u8 = 0x01;
const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;
const TYPE_INT_BOOLEAN: u8 = 0x12;

/// `android.R.attr` ids whose names obfuscators like to blank out of the pool.
const KNOWN_ATTRIBUTE_IDS: &[(u32, &str)] = &[
    (0x0101_0001, "label"),
    (0x0101_0002, "icon"),
    (0x0101_0003, "name"),
    (0x0101_0006, "permission"),
    (0x0101_000e, "enabled"),
    (0x0101_0010, "exported"),
    (0x0101_0018, "authorities"),
    (0x0101_020c, "minSdkVersion"),
    (0x0101_021b, "versionCode"),
    (0x0101_021c, "versionName"),
    (0x0101_0270, "targetSdkVersion"),
];

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Reference(u32),
    Boolean(bool),
    Integer(i64),
    Other { data_type: u8, data: u32 },
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    StartElement {
        name: String,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: String,
    },
    Text(String),
}

impl XmlEvent {
    /// String value of the attribute called `name` on a start element.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self {
            Self::StartElement { attributes, .. } => attributes
                .iter()
                .find(|attr| attr.name == name)
                .and_then(|attr| attr.value.as_str()),
            _ => None,
        }
    }
}

struct Bytes<'a> {
    data: &'a [u8],
}

impl<'a> Bytes<'a> {
    fn u8_at(&self, offset: usize) -> Result<u8, ApkParseError> {
        self.data
            .get(offset)
            .copied()
            .ok_or_else(|| ApkParseError::xml(offset, "unexpected end of data"))
    }

    fn u16_at(&self, offset: usize) -> Result<u16, ApkParseError> {
        let bytes = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32_at(&self, offset: usize) -> Result<u32, ApkParseError> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], ApkParseError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| ApkParseError::xml(offset, "unexpected end of data"))
    }
}

/// Decoded string pool: entries are materialized eagerly, manifests are small.
#[derive(Debug, Default)]
struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(bytes: &Bytes<'_>, start: usize, chunk_size: usize) -> Result<Self, ApkParseError> {
        let header_size = bytes.u16_at(start + 2)? as usize;
        let string_count = bytes.u32_at(start + 8)? as usize;
        let flags = bytes.u32_at(start + 16)?;
        let strings_start = bytes.u32_at(start + 20)? as usize;
        let utf8 = flags & UTF8_FLAG != 0;

        let index_end = string_count
            .checked_mul(4)
            .and_then(|len| len.checked_add(header_size))
            .filter(|end| *end <= chunk_size);
        if index_end.is_none() || strings_start > chunk_size {
            return Err(ApkParseError::xml(
                start,
                format!("string pool of {string_count} entries does not fit in {chunk_size} bytes"),
            ));
        }

        let mut strings = Vec::with_capacity(string_count.min(1 << 16));
        for index in 0..string_count {
            let offset = bytes.u32_at(start + header_size + index * 4)? as usize;
            let at = start + strings_start + offset;
            let value = if utf8 {
                read_utf8_string(bytes, at)?
            } else {
                read_utf16_string(bytes, at)?
            };
            strings.push(value);
        }
        Ok(Self { strings })
    }

    fn get(&self, index: u32) -> Option<&str> {
        if index == NO_INDEX {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

fn read_utf8_length(bytes: &Bytes<'_>, at: usize) -> Result<(usize, usize), ApkParseError> {
    let first = bytes.u8_at(at)? as usize;
    if first & 0x80 != 0 {
        let second = bytes.u8_at(at + 1)? as usize;
        Ok((((first & 0x7f) << 8) | second, 2))
    } else {
        Ok((first, 1))
    }
}

fn read_utf8_string(bytes: &Bytes<'_>, at: usize) -> Result<String, ApkParseError> {
    // UTF-16 length first, then the encoded byte length.
    let (_, skip) = read_utf8_length(bytes, at)?;
    let (byte_len, skip2) = read_utf8_length(bytes, at + skip)?;
    let raw = bytes.slice(at + skip + skip2, byte_len)?;
    Ok(String::from_utf8_lossy(raw).into_owned())
}

fn read_utf16_string(bytes: &Bytes<'_>, at: usize) -> Result<String, ApkParseError> {
    let first = bytes.u16_at(at)? as usize;
    let (len, skip) = if first & 0x8000 != 0 {
        let second = bytes.u16_at(at + 2)? as usize;
        ((((first & 0x7fff) << 16) | second), 4)
    } else {
        (first, 2)
    };
    let raw = bytes.slice(at + skip, len * 2)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn known_attribute_name(resource_id: u32) -> Option<&'static str> {
    KNOWN_ATTRIBUTE_IDS
        .iter()
        .find(|(id, _)| *id == resource_id)
        .map(|(_, name)| *name)
}

/// Decode a binary XML document into a flat sequence of events.
pub fn parse(data: &[u8]) -> Result<Vec<XmlEvent>, ApkParseError> {
    let bytes = Bytes { data };
    let doc_type = bytes.u16_at(0)?;
    if doc_type != RES_XML_TYPE {
        return Err(ApkParseError::xml(
            0,
            format!("not a binary XML document (chunk type {doc_type:#06x})"),
        ));
    }
    let header_size = bytes.u16_at(2)? as usize;
    // Some packers lie about the document size; never read past the buffer.
    let doc_end = (bytes.u32_at(4)? as usize).min(data.len());

    let mut pool = StringPool::default();
    let mut resource_ids: Vec<u32> = Vec::new();
    let mut events = Vec::new();
    let mut offset = header_size;

    while offset + CHUNK_HEADER_LEN <= doc_end {
        let chunk_type = bytes.u16_at(offset)?;
        let chunk_header = bytes.u16_at(offset + 2)? as usize;
        let chunk_size = bytes.u32_at(offset + 4)? as usize;
        if chunk_size < CHUNK_HEADER_LEN || offset + chunk_size > doc_end {
            return Err(ApkParseError::xml(
                offset,
                format!("chunk size {chunk_size} out of bounds"),
            ));
        }
        if chunk_header < CHUNK_HEADER_LEN || chunk_header > chunk_size {
            return Err(ApkParseError::xml(
                offset,
                format!("chunk header {chunk_header} does not fit chunk of {chunk_size} bytes"),
            ));
        }

        match chunk_type {
            RES_STRING_POOL_TYPE => pool = StringPool::parse(&bytes, offset, chunk_size)?,
            RES_XML_RESOURCE_MAP_TYPE => {
                let count = (chunk_size - chunk_header) / 4;
                resource_ids = (0..count)
                    .map(|i| bytes.u32_at(offset + chunk_header + i * 4))
                    .collect::<Result<_, _>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                events.push(parse_start_element(
                    &bytes,
                    offset,
                    chunk_header,
                    chunk_size,
                    &pool,
                    &resource_ids,
                )?);
            }
            RES_XML_END_ELEMENT_TYPE => {
                let name_index = bytes.u32_at(offset + chunk_header + 4)?;
                events.push(XmlEvent::EndElement {
                    name: pool.get(name_index).unwrap_or_default().to_string(),
                });
            }
            RES_XML_CDATA_TYPE => {
                let data_index = bytes.u32_at(offset + chunk_header)?;
                if let Some(text) = pool.get(data_index) {
                    events.push(XmlEvent::Text(text.to_string()));
                }
            }
            RES_XML_START_NAMESPACE_TYPE | RES_XML_END_NAMESPACE_TYPE => {}
            other => log::debug!("skipping binary XML chunk {other:#06x} at {offset}"),
        }

        offset += chunk_size;
    }

    Ok(events)
}

fn parse_start_element(
    bytes: &Bytes<'_>,
    chunk: usize,
    chunk_header: usize,
    chunk_size: usize,
    pool: &StringPool,
    resource_ids: &[u32],
) -> Result<XmlEvent, ApkParseError> {
    let ext = chunk + chunk_header;
    let name_index = bytes.u32_at(ext + 4)?;
    let attr_start = bytes.u16_at(ext + 8)? as usize;
    let attr_size = bytes.u16_at(ext + 10)? as usize;
    let attr_count = bytes.u16_at(ext + 12)? as usize;
    if attr_count > 0 && attr_size < 20 {
        return Err(ApkParseError::xml(
            ext,
            format!("attribute record size {attr_size} too small"),
        ));
    }
    let attrs_end = chunk_header + attr_start + attr_count * attr_size;
    if attrs_end > chunk_size {
        return Err(ApkParseError::xml(
            ext,
            format!("{attr_count} attributes at {attr_start} overrun the element chunk"),
        ));
    }

    let mut attributes = Vec::with_capacity(attr_count);
    for i in 0..attr_count {
        let at = ext + attr_start + i * attr_size;
        let ns_index = bytes.u32_at(at)?;
        let attr_name_index = bytes.u32_at(at + 4)?;
        let raw_value = bytes.u32_at(at + 8)?;
        let data_type = bytes.u8_at(at + 15)?;
        let data = bytes.u32_at(at + 16)?;

        let pooled_name = pool.get(attr_name_index).unwrap_or_default();
        let name = resource_ids
            .get(attr_name_index as usize)
            .and_then(|id| known_attribute_name(*id))
            .unwrap_or(pooled_name)
            .to_string();

        let value = match data_type {
            TYPE_STRING => AttributeValue::String(
                pool.get(raw_value)
                    .or_else(|| pool.get(data))
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ if raw_value != NO_INDEX => {
                AttributeValue::String(pool.get(raw_value).unwrap_or_default().to_string())
            }
            TYPE_REFERENCE => AttributeValue::Reference(data),
            TYPE_INT_BOOLEAN => AttributeValue::Boolean(data != 0),
            TYPE_INT_DEC | TYPE_INT_HEX => AttributeValue::Integer(data as i32 as i64),
            _ => AttributeValue::Other { data_type, data },
        };

        attributes.push(Attribute {
            namespace: pool.get(ns_index).map(str::to_string),
            name,
            value,
        });
    }

    Ok(XmlEvent::StartElement {
        name: pool.get(name_index).unwrap_or_default().to_string(),
        attributes,
    })
}
