//! Package descriptor (`pom.xml`) handling.
//!
//! Coordinates are taken by position: the text of the second, third and
//! fourth element directly under the document root is the group id,
//! artifact id and version. Element names are not consulted.

use std::path::Path;

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Root child positions holding group id, artifact id and version
const GROUP_ID_INDEX: usize = 1;
const ARTIFACT_ID_INDEX: usize = 2;
const VERSION_INDEX: usize = 3;

/// Package coordinates, used verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl Coordinates {
    /// Directory inside the JAR that holds the injected entries
    pub fn entry_prefix(&self) -> String {
        format!("META-INF/maven/{}/{}/", self.group_id, self.artifact_id)
    }
}

/// A parsed descriptor together with its raw bytes
#[derive(Debug, Clone)]
pub struct PomDescriptor {
    raw: Vec<u8>,
    coordinates: Coordinates,
}

impl PomDescriptor {
    /// Read and parse the descriptor at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
        Self::from_bytes(raw).with_context(|| format!("Invalid descriptor {}", path.display()))
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let text = std::str::from_utf8(&raw).context("Descriptor is not valid UTF-8")?;
        let coordinates = parse_coordinates(text)?;
        Ok(Self { raw, coordinates })
    }

    /// The descriptor exactly as read from disk
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }
}

/// Collect the text of every root child and pick the coordinate positions.
fn parse_coordinates(text: &str) -> Result<Coordinates> {
    let children = root_children_text(text.strip_prefix('\u{feff}').unwrap_or(text))?;

    let child = |index: usize| -> Result<String> {
        children.get(index).cloned().with_context(|| {
            format!(
                "Descriptor root has {} child elements, expected at least {}",
                children.len(),
                VERSION_INDEX + 1
            )
        })
    };

    Ok(Coordinates {
        group_id: child(GROUP_ID_INDEX)?,
        artifact_id: child(ARTIFACT_ID_INDEX)?,
        version: child(VERSION_INDEX)?,
    })
}

/// Text content of each element directly under the root, in document order.
///
/// The text of a child is everything before its first own sub-element;
/// comments and processing instructions are skipped and the text around
/// them joined. Whitespace is kept as is.
fn root_children_text(text: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(text);

    let mut children: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    // Still collecting text for the current root child
    let mut collecting = false;

    loop {
        let position = reader.buffer_position();
        match reader
            .read_event()
            .with_context(|| format!("Malformed XML near byte {}", position))?
        {
            Event::Start(e) => {
                check_element(&e)?;
                if depth == 0 {
                    if seen_root {
                        bail!("Malformed XML: more than one root element");
                    }
                    seen_root = true;
                } else if depth == 1 {
                    children.push(String::new());
                    collecting = true;
                } else {
                    collecting = false;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                check_element(&e)?;
                if depth == 0 {
                    if seen_root {
                        bail!("Malformed XML: more than one root element");
                    }
                    seen_root = true;
                } else if depth == 1 {
                    children.push(String::new());
                } else {
                    collecting = false;
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    bail!("Malformed XML: closing tag without an open element");
                }
                depth -= 1;
                if depth == 1 {
                    collecting = false;
                }
            }
            Event::Text(t) => {
                let value = t.unescape()?;
                if depth == 0 {
                    if !value.trim().is_empty() {
                        bail!("Malformed XML: text outside the root element");
                    }
                } else if collecting {
                    if let Some(last) = children.last_mut() {
                        last.push_str(&value);
                    }
                }
            }
            Event::CData(c) => {
                if depth == 0 {
                    bail!("Malformed XML: character data outside the root element");
                }
                if collecting {
                    let value = std::str::from_utf8(&c).context("Malformed XML: CDATA")?;
                    if let Some(last) = children.last_mut() {
                        last.push_str(value);
                    }
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if !seen_root {
        bail!("Malformed XML: no root element");
    }
    if depth != 0 {
        bail!("Malformed XML: unclosed element at end of document");
    }

    Ok(children)
}

/// Reject element and attribute syntax quick-xml lets through on its own:
/// bad names, unquoted or repeated attributes, `<` or broken entities in values.
fn check_element(element: &BytesStart<'_>) -> Result<()> {
    let qname = element.name();
    let name = std::str::from_utf8(qname.as_ref())
        .context("Malformed XML: element name is not UTF-8")?;
    check_name(name)?;

    for attribute in element.attributes().with_checks(true) {
        let attribute = attribute.with_context(|| format!("Malformed XML: attribute of <{}>", name))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .context("Malformed XML: attribute name is not UTF-8")?;
        check_name(key)?;
        if attribute.value.contains(&b'<') {
            bail!("Malformed XML: '<' in value of attribute {} of <{}>", key, name);
        }
        attribute
            .unescape_value()
            .with_context(|| format!("Malformed XML: value of attribute {} of <{}>", key, name))?;
    }
    Ok(())
}

/// XML name: starts with a letter, `_` or `:`, continues with letters,
/// digits, `-`, `.`, `_` or `:`
fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == ':');
    let valid_rest = chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | ':'));
    if !valid_start || !valid_rest {
        bail!("Malformed XML: invalid name {:?}", name);
    }
    Ok(())
}
