//! Shared helpers for zip-packaged XML formats (docx, xlsx, pptx, vsdx).

use quick_xml::events::BytesStart;
use std::io::{Cursor, Read};

use crate::error::ParseError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
pub(crate) const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) type Package<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

pub(crate) fn open(bytes: &[u8]) -> Result<Package<'_>, ParseError> {
    Ok(zip::ZipArchive::new(Cursor::new(bytes))?)
}

pub(crate) fn has_part(package: &Package<'_>, name: &str) -> bool {
    package.file_names().any(|n| n == name)
}

pub(crate) fn read_part(package: &mut Package<'_>, name: &str) -> Result<Vec<u8>, ParseError> {
    let entry = package
        .by_name(name)
        .map_err(|e| ParseError::corrupt(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ParseError::corrupt(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ParseError::too_large(format!(
            "zip entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Like [`read_part`], but a missing part is `None` rather than an error.
pub(crate) fn read_optional_part(
    package: &mut Package<'_>,
    name: &str,
) -> Result<Option<Vec<u8>>, ParseError> {
    if !has_part(package, name) {
        return Ok(None);
    }
    read_part(package, name).map(Some)
}

/// Part names of the form `{prefix}{N}.xml`, in numeric order of `N`.
pub(crate) fn numbered_parts(package: &Package<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = package
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .filter(|n| part_number(n, prefix).is_some())
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| part_number(name, prefix).unwrap_or(u32::MAX));
    names
}

pub(crate) fn part_number(name: &str, prefix: &str) -> Option<u32> {
    name.strip_prefix(prefix)?
        .strip_suffix(".xml")?
        .parse::<u32>()
        .ok()
}

/// Unescaped value of the attribute whose local name is `key`.
pub(crate) fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}
