//! XPath-driven edits of XML configuration files.
//!
//! Expressions are evaluated with the prefix bindings declared in the document
//! itself, so `//eng:Property[...]` works against a file that declares
//! `xmlns:eng`. Each expression must select exactly one element; anything
//! else is an error because it means the installed file does not look like
//! the template the change-set was written for.
//!
//! A file is decoded with the encoding its byte order mark or `<?xml ...?>`
//! declaration names and written back in that encoding. Everything before the
//! root element (declaration, comments, DOCTYPE and the whitespace between
//! them) is copied through unchanged, and so are the root element's own
//! namespace declarations.

use crate::error::ProvisionError;
use anyhow::{anyhow, Context as _, Result};
use encoding_rs::{Encoding, UTF_8};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Document, Element};
use sxd_document::{parser, writer};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Replace the text content of the element selected by an XPath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub xpath: String,
    pub text: String,
}

/// Set (or overwrite) one attribute of the element selected by an XPath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub xpath: String,
    pub attribute: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlChangeSet {
    pub values: Vec<ValueChange>,
    pub attrib: Vec<AttributeChange>,
}

impl XmlChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, xpath: impl Into<String>, text: impl Into<String>) -> Self {
        self.values.push(ValueChange {
            xpath: xpath.into(),
            text: text.into(),
        });
        self
    }

    pub fn attribute(
        mut self,
        xpath: impl Into<String>,
        attribute: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.attrib.push(AttributeChange {
            xpath: xpath.into(),
            attribute: attribute.into(),
            text: text.into(),
        });
        self
    }

    /// Human-readable description of every change, one per line.
    pub fn instructions(&self) -> String {
        let mut out = String::new();
        for change in &self.values {
            out.push_str(&format!(
                "Change value of path <{}> to: <{}>\n",
                change.xpath, change.text
            ));
        }
        for change in &self.attrib {
            out.push_str(&format!(
                "Change attribute <{}> of path <{}> to: <{}>\n",
                change.attribute, change.xpath, change.text
            ));
        }
        out
    }
}

/// What [`apply_change_set`] did with a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlOutcome {
    Patched,
    /// The target was missing; the path of the instructions file written instead.
    InstructionsWritten(PathBuf),
}

/// `<file>.instructions.txt` next to `path`.
pub fn instructions_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".instructions.txt");
    path.with_file_name(name)
}

/// Apply `changes` to the XML document at `path`.
///
/// When `path` does not exist, nothing fails: the parent directories are
/// created and the changes are written as instructions for the administrator.
pub fn apply_change_set(path: &Path, changes: &XmlChangeSet) -> Result<XmlOutcome> {
    if !path.is_file() {
        let target = instructions_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(&target, changes.instructions())
            .with_context(|| format!("Failed to write {}", target.display()))?;
        info!(file = %path.display(), instructions = %target.display(), "XML target missing, wrote instructions");
        return Ok(XmlOutcome::InstructionsWritten(target));
    }

    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let encoding = detect_encoding(&raw);
    let (text, malformed) = encoding.decode_with_bom_removal(&raw);
    if malformed {
        return Err(anyhow!(
            "Failed to decode {}: not valid {}",
            path.display(),
            encoding.name()
        ));
    }
    let package = parser::parse(&text)
        .map_err(|e| anyhow!("Failed to parse XML {}: {:?}", path.display(), e))?;
    let doc = package.as_document();
    let context = namespace_context(&doc);

    for change in &changes.values {
        let element = select_element(&doc, &context, path, &change.xpath)?;
        element.set_text(&change.text);
        debug!(file = %path.display(), xpath = %change.xpath, "value set");
    }
    for change in &changes.attrib {
        let element = select_element(&doc, &context, path, &change.xpath)?;
        element.set_attribute_value(change.attribute.as_str(), &change.text);
        debug!(file = %path.display(), xpath = %change.xpath, attribute = %change.attribute, "attribute set");
    }

    let mut body = Vec::new();
    writer::format_document(&doc, &mut body)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    let body = String::from_utf8(body)
        .map_err(|e| anyhow!("Serialized XML for {} is not UTF-8: {}", path.display(), e))?;
    let output = restore_layout(&text, &body);
    replace_file(path, &encode_like(&raw, encoding, &output))?;
    info!(file = %path.display(), encoding = encoding.name(), "patched XML");
    Ok(XmlOutcome::Patched)
}

/// Bind every prefix declared anywhere in the document. The first
/// declaration of a prefix in document order wins.
fn namespace_context<'d>(doc: &Document<'d>) -> Context<'d> {
    let mut context = Context::new();
    let mut seen: Vec<String> = Vec::new();
    let mut pending: Vec<Element<'d>> = doc
        .root()
        .children()
        .into_iter()
        .filter_map(|child| match child {
            ChildOfRoot::Element(e) => Some(e),
            _ => None,
        })
        .collect();

    while let Some(element) = pending.pop() {
        for ns in element.namespaces_in_scope() {
            let prefix = ns.prefix();
            if prefix.is_empty() || seen.iter().any(|p| p == prefix) {
                continue;
            }
            context.set_namespace(prefix, ns.uri());
            seen.push(prefix.to_string());
        }
        let children: Vec<Element<'d>> = element
            .children()
            .into_iter()
            .filter_map(|child| match child {
                ChildOfElement::Element(e) => Some(e),
                _ => None,
            })
            .collect();
        pending.extend(children.into_iter().rev());
    }
    context
}

fn select_element<'d>(
    doc: &Document<'d>,
    context: &Context<'d>,
    path: &Path,
    xpath: &str,
) -> Result<Element<'d>> {
    let compiled = Factory::new()
        .build(xpath)
        .map_err(|e| ProvisionError::InvalidXPath {
            xpath: xpath.to_string(),
            reason: format!("{:?}", e),
        })?
        .ok_or_else(|| ProvisionError::InvalidXPath {
            xpath: xpath.to_string(),
            reason: "empty expression".to_string(),
        })?;
    let value = compiled
        .evaluate(context, doc.root())
        .map_err(|e| ProvisionError::InvalidXPath {
            xpath: xpath.to_string(),
            reason: format!("{:?}", e),
        })?;
    let Value::Nodeset(nodes) = value else {
        return Err(ProvisionError::XPathTargetNotElement {
            path: path.to_path_buf(),
            xpath: xpath.to_string(),
        }
        .into());
    };

    let mut matched = nodes.document_order();
    match matched.len() {
        0 => Err(ProvisionError::XPathNoMatch {
            path: path.to_path_buf(),
            xpath: xpath.to_string(),
        }
        .into()),
        1 => match matched.remove(0) {
            Node::Element(element) => Ok(element),
            _ => Err(ProvisionError::XPathTargetNotElement {
                path: path.to_path_buf(),
                xpath: xpath.to_string(),
            }
            .into()),
        },
        count => Err(ProvisionError::XPathAmbiguous {
            path: path.to_path_buf(),
            xpath: xpath.to_string(),
            count,
        }
        .into()),
    }
}

fn declaration(text: &str) -> Option<&str> {
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if !text.starts_with("<?xml") {
        return None;
    }
    text.find("?>").map(|end| &text[..end + 2])
}

/// The `encoding` pseudo-attribute of the XML declaration, if any.
fn declared_encoding(text: &str) -> Option<&str> {
    let decl = declaration(text)?;
    let rest = &decl[decl.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[1..];
    rest.find(quote).map(|end| &rest[..end])
}

/// BOM first, then the declared label, then UTF-8.
fn detect_encoding(raw: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(raw) {
        return encoding;
    }
    let head = String::from_utf8_lossy(&raw[..raw.len().min(256)]);
    declared_encoding(&head)
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8)
}

/// Encode `text` the way `raw` was stored. Encodings that cannot be written
/// (UTF-16) fall back to UTF-8 and the declaration is relabelled to match.
/// Characters the target encoding lacks become numeric character references.
fn encode_like(raw: &[u8], encoding: &'static Encoding, text: &str) -> Vec<u8> {
    let target = encoding.output_encoding();
    let text = if target != encoding {
        relabel_declaration(text, target.name())
    } else {
        text.to_string()
    };
    let (bytes, _, _) = target.encode(&text);
    let mut out = Vec::with_capacity(bytes.len() + 3);
    if target == UTF_8 && Encoding::for_bom(raw).is_some() {
        out.extend_from_slice(b"\xEF\xBB\xBF");
    }
    out.extend_from_slice(&bytes);
    out
}

fn relabel_declaration(text: &str, label: &str) -> String {
    let Some(decl) = declaration(text) else {
        return text.to_string();
    };
    let Some(old) = declared_encoding(decl) else {
        return text.to_string();
    };
    text.replacen(decl, &decl.replacen(old, label, 1), 1)
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Byte offset of the root element's start tag.
fn root_start(text: &str) -> Option<usize> {
    let mut pos = 0;
    loop {
        pos = skip_whitespace(text.as_bytes(), pos);
        let rest = &text[pos..];
        if rest.starts_with("<?") {
            pos += rest.find("?>")? + 2;
        } else if rest.starts_with("<!--") {
            pos += rest.find("-->")? + 3;
        } else if rest.starts_with("<!DOCTYPE") {
            pos += doctype_len(rest)?;
        } else if rest.starts_with('<') {
            return Some(pos);
        } else {
            return None;
        }
    }
}

/// Length of a `<!DOCTYPE ...>` including any internal subset.
fn doctype_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            quote @ (b'"' | b'\'') => {
                pos += 1 + bytes[pos + 1..].iter().position(|b| *b == quote)?;
            }
            b'<' if text[pos..].starts_with("<!--") => {
                pos += text[pos..].find("-->")? + 2;
            }
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            b'>' if depth == 0 => return Some(pos + 1),
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Where attributes can be appended to the start tag at the beginning of
/// `text`: just before its `>` or `/>`.
fn start_tag_insert_point(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            quote @ (b'"' | b'\'') => {
                pos += 1 + bytes[pos + 1..].iter().position(|b| *b == quote)?;
            }
            b'>' if pos > 0 && bytes[pos - 1] == b'/' => return Some(pos - 1),
            b'>' => return Some(pos),
            _ => {}
        }
        pos += 1;
    }
    None
}

/// `(name, name="value")` for each attribute of the start tag at the
/// beginning of `text`, in source form.
fn start_tag_attributes(text: &str) -> Vec<(&str, &str)> {
    let mut attributes = Vec::new();
    let Some(end) = start_tag_insert_point(text) else {
        return attributes;
    };
    let tag = &text[..end];
    let bytes = tag.as_bytes();
    let mut pos = 1;
    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    loop {
        pos = skip_whitespace(bytes, pos);
        let start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let name = &tag[start..pos];
        pos = skip_whitespace(bytes, pos);
        if name.is_empty() || bytes.get(pos) != Some(&b'=') {
            break;
        }
        pos = skip_whitespace(bytes, pos + 1);
        let Some(&quote) = bytes.get(pos).filter(|b| **b == b'"' || **b == b'\'') else {
            break;
        };
        let Some(len) = bytes[pos + 1..].iter().position(|b| *b == quote) else {
            break;
        };
        pos += len + 2;
        attributes.push((name, &tag[start..pos]));
    }
    attributes
}

/// Combine the original prolog with the serialized root element, putting
/// back prefix declarations of the original root that the serializer dropped
/// for being unused.
fn restore_layout(original: &str, serialized: &str) -> String {
    let (Some(original_root), Some(serialized_root)) =
        (root_start(original), root_start(serialized))
    else {
        return serialized.to_string();
    };
    let body = &serialized[serialized_root..];
    let present: Vec<&str> = start_tag_attributes(body)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let dropped: Vec<&str> = start_tag_attributes(&original[original_root..])
        .into_iter()
        .filter(|(name, _)| name.starts_with("xmlns:") && !present.contains(name))
        .map(|(_, source)| source)
        .collect();

    let mut out = String::with_capacity(original.len().max(serialized.len()) + 64);
    out.push_str(&original[..original_root]);
    match start_tag_insert_point(body) {
        Some(at) if !dropped.is_empty() => {
            out.push_str(&body[..at]);
            for source in dropped {
                out.push(' ');
                out.push_str(source);
            }
            out.push_str(&body[at..]);
        }
        _ => out.push_str(body),
    }
    if original.ends_with('\n') && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut replacement = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    replacement
        .write_all(contents)
        .with_context(|| format!("Failed to write replacement for {}", path.display()))?;
    fs::set_permissions(replacement.path(), fs::metadata(path)?.permissions())?;
    replacement
        .persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
