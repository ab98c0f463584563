//! Multi-file composition: merging per-section files into one combined
//! document and splitting it back apart.
//!
//! A master file references section files with include directives:
//!
//! ```xml
//! <include element="rules" href="entities.xml"/>
//! ```
//!
//! Combining replaces each directive with the referenced file's bytes,
//! bracketed by comment markers that record the element name and href.
//! Splitting reverses that exactly: section bytes are never reformatted
//! or reflowed in either direction, so combine and split are mutually
//! inverse on well-formed input.

use std::fs;
use std::path::{Path, PathBuf};

use crate::section::SectionKind;

const DIRECTIVE: &str = "<include";
const OPEN_MARKER: &str = "<!-- include_open ";
const CLOSE_MARKER: &str = "<!-- include_close ";
const MARKER_END: &str = "-->";

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed include directive at line {line}: {reason}")]
    MalformedInclude { line: usize, reason: String },
    #[error("include references unknown section element '{0}'")]
    UnknownSection(String),
    #[error("no matching marker for '{marker}'")]
    UnmatchedMarker { marker: String },
}

/// One extracted section file: which section it is, where it belongs on
/// disk relative to the master, and its exact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPart {
    pub kind: SectionKind,
    pub href: String,
    pub content: String,
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let len = tag[start..].find('"')?;
    Some(tag[start..start + len].to_string())
}

fn open_marker(element: &str, href: &str) -> String {
    format!("{OPEN_MARKER}element=\"{element}\" href=\"{href}\" {MARKER_END}")
}

fn close_marker(element: &str, href: &str) -> String {
    format!("{CLOSE_MARKER}element=\"{element}\" href=\"{href}\" {MARKER_END}")
}

/// Expands every include directive in `master`, resolving hrefs
/// relative to `base`. The master's own bytes outside the directives
/// pass through untouched.
pub fn combine_to_string(master: &str, base: &Path) -> Result<String, ComposeError> {
    let mut out = String::with_capacity(master.len());
    let mut offset = 0;
    let mut rest = master;
    while let Some(pos) = rest.find(DIRECTIVE) {
        // A commented-out directive is not a directive; pass the whole
        // comment through untouched.
        let in_comment = rest[..pos]
            .rfind("<!--")
            .is_some_and(|open| !rest[open..pos].contains(MARKER_END));
        if in_comment {
            let end = rest[pos..]
                .find(MARKER_END)
                .map(|p| pos + p + MARKER_END.len())
                .unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            offset += end;
            rest = &rest[end..];
            continue;
        }
        // Elements merely prefixed "include" (e.g. <includeList>) are
        // ordinary content.
        let next = rest[pos + DIRECTIVE.len()..].chars().next();
        if !next.is_some_and(|c| c.is_whitespace() || c == '/') {
            let end = pos + DIRECTIVE.len();
            out.push_str(&rest[..end]);
            offset += end;
            rest = &rest[end..];
            continue;
        }
        let line = line_of(master, offset + pos);
        out.push_str(&rest[..pos]);
        let tag_rest = &rest[pos..];
        let end = tag_rest
            .find("/>")
            .ok_or_else(|| ComposeError::MalformedInclude {
                line,
                reason: "directive is not self-closing".into(),
            })?;
        let tag = &tag_rest[..end + 2];
        let element = attr_value(tag, "element").ok_or_else(|| {
            ComposeError::MalformedInclude {
                line,
                reason: "missing element attribute".into(),
            }
        })?;
        let href = attr_value(tag, "href").ok_or_else(|| ComposeError::MalformedInclude {
            line,
            reason: "missing href attribute".into(),
        })?;
        SectionKind::from_xml_name(&element)
            .map_err(|_| ComposeError::UnknownSection(element.clone()))?;

        let path = base.join(&href);
        let content =
            fs::read_to_string(&path).map_err(|source| ComposeError::Io { path, source })?;
        log::debug!("inlined {href} ({} bytes) as <{element}>", content.len());

        out.push_str(&open_marker(&element, &href));
        out.push('\n');
        out.push_str(&content);
        out.push_str(&close_marker(&element, &href));

        offset += pos + end + 2;
        rest = &tag_rest[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Reads the master file at `master` and writes the combined document
/// to `output`. Hrefs resolve relative to the master's directory.
pub fn combine_sections(master: &Path, output: &Path) -> Result<(), ComposeError> {
    let text = fs::read_to_string(master).map_err(|source| ComposeError::Io {
        path: master.to_path_buf(),
        source,
    })?;
    let base = master.parent().unwrap_or_else(|| Path::new("."));
    let combined = combine_to_string(&text, base)?;
    fs::write(output, &combined).map_err(|source| ComposeError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    log::info!(
        "combined {} into {} ({} bytes)",
        master.display(),
        output.display(),
        combined.len()
    );
    Ok(())
}

/// Reverses [`combine_to_string`]: recovers the master text with its
/// include directives restored, plus the exact bytes of every inlined
/// section.
pub fn split_to_parts(combined: &str) -> Result<(String, Vec<SectionPart>), ComposeError> {
    let mut master = String::new();
    let mut parts = Vec::new();
    let mut rest = combined;
    while let Some(pos) = rest.find(OPEN_MARKER) {
        master.push_str(&rest[..pos]);
        let after = &rest[pos..];
        let head_end = after
            .find(MARKER_END)
            .ok_or_else(|| ComposeError::UnmatchedMarker {
                marker: OPEN_MARKER.trim_end().into(),
            })?;
        let head = &after[..head_end + MARKER_END.len()];
        let element = attr_value(head, "element").ok_or_else(|| ComposeError::UnmatchedMarker {
            marker: head.to_string(),
        })?;
        let href = attr_value(head, "href").ok_or_else(|| ComposeError::UnmatchedMarker {
            marker: head.to_string(),
        })?;
        let kind = SectionKind::from_xml_name(&element)
            .map_err(|_| ComposeError::UnknownSection(element.clone()))?;

        // Combining writes exactly one newline after the open marker;
        // everything past it belongs to the section file.
        let body = after[head_end + MARKER_END.len()..]
            .strip_prefix('\n')
            .ok_or_else(|| ComposeError::UnmatchedMarker {
                marker: head.to_string(),
            })?;
        let close = close_marker(&element, &href);
        let close_pos = body
            .find(&close)
            .ok_or_else(|| ComposeError::UnmatchedMarker { marker: close.clone() })?;

        parts.push(SectionPart {
            kind,
            href: href.clone(),
            content: body[..close_pos].to_string(),
        });
        master.push_str(&format!("<include element=\"{element}\" href=\"{href}\"/>"));
        rest = &body[close_pos + close.len()..];
    }
    master.push_str(rest);
    Ok((master, parts))
}

/// Reads the combined document at `combined`, writes the restored
/// master to `master_out` and each section file next to it under its
/// recorded href.
pub fn split_sections(combined: &Path, master_out: &Path) -> Result<(), ComposeError> {
    let text = fs::read_to_string(combined).map_err(|source| ComposeError::Io {
        path: combined.to_path_buf(),
        source,
    })?;
    let (master, parts) = split_to_parts(&text)?;
    let base = master_out.parent().unwrap_or_else(|| Path::new("."));
    for part in &parts {
        let path = base.join(&part.href);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ComposeError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, &part.content).map_err(|source| ComposeError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("restored {} ({} bytes)", path.display(), part.content.len());
    }
    fs::write(master_out, &master).map_err(|source| ComposeError::Io {
        path: master_out.to_path_buf(),
        source,
    })?;
    log::info!(
        "split {} into {} and {} section file(s)",
        combined.display(),
        master_out.display(),
        parts.len()
    );
    Ok(())
}
