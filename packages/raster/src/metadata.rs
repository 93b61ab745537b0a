//! GDAL dataset metadata stored in the `GDAL_METADATA` TIFF tag.
//!
//! The tag holds a small XML document:
//! `<GDALMetadata><Item name="key">value</Item>...</GDALMetadata>`.

use std::collections::BTreeMap;

use tiff::tags::Tag;

/// The private `GDAL_METADATA` tag.
pub const GDAL_METADATA: Tag = Tag::Unknown(42112);

/// Renders dataset-level items as a `GDAL_METADATA` document.
#[must_use]
pub fn to_xml(items: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<GDALMetadata>\n");
    for (name, value) in items {
        xml.push_str("  <Item name=\"");
        xml.push_str(&escape(name));
        xml.push_str("\">");
        xml.push_str(&escape(value));
        xml.push_str("</Item>\n");
    }
    xml.push_str("</GDALMetadata>\n");
    xml
}

/// Reads the dataset-level items of a `GDAL_METADATA` document.
///
/// Band-level items (those with a `sample` attribute) are skipped, as is
/// anything that does not parse.
#[must_use]
pub fn parse_xml(xml: &str) -> BTreeMap<String, String> {
    let mut items = BTreeMap::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Item") {
        rest = &rest[start + "<Item".len()..];
        let Some(open_end) = rest.find('>') else {
            break;
        };
        let attributes = &rest[..open_end];
        rest = &rest[open_end + 1..];
        let Some(close) = rest.find("</Item>") else {
            break;
        };
        let value = &rest[..close];
        rest = &rest[close + "</Item>".len()..];

        if attribute(attributes, "sample").is_some() {
            continue;
        }
        if let Some(name) = attribute(attributes, "name") {
            items.insert(unescape(name), unescape(value));
        }
    }
    items
}

fn attribute<'a>(attributes: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{key}=\"");
    let start = attributes.find(&needle)? + needle.len();
    let len = attributes[start..].find('"')?;
    Some(&attributes[start..start + len])
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
