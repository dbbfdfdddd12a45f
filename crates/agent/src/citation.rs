//! Inline citation markers.
//!
//! Grammar: `[[ref:id=<ID>|name=<NAME>|loc=<TYPE>:<VALUE>]]`, `loc` optional.
//! Free-text values escape `\`, `|` and `]` with a backslash, so `build` and
//! `parse` are inverse transforms for every input.

use quarry_core::source::{LocationType, SourceLocation, SourceReference};

const OPEN: &str = "[[ref:";

/// A parsed citation marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub id: String,
    pub name: String,
    pub location: Option<(LocationType, String)>,
}

impl Citation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, kind: LocationType, value: impl Into<String>) -> Self {
        self.location = Some((kind, value.into()));
        self
    }

    pub fn from_source(source: &SourceReference) -> Self {
        Self {
            id: source.id.clone(),
            name: source.name.clone(),
            location: source
                .location
                .as_ref()
                .map(|SourceLocation { kind, value, .. }| (*kind, value.clone())),
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '|' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render a citation marker.
pub fn build(citation: &Citation) -> String {
    let mut marker = format!(
        "{OPEN}id={}|name={}",
        escape(&citation.id),
        escape(&citation.name)
    );
    if let Some((kind, value)) = &citation.location {
        marker.push_str(&format!("|loc={kind}:{}", escape(value)));
    }
    marker.push_str("]]");
    marker
}

/// Parse exactly one marker; surrounding text is rejected.
pub fn parse(marker: &str) -> Option<Citation> {
    let (citation, consumed) = parse_prefix(marker)?;
    (consumed == marker.len()).then_some(citation)
}

/// Every well-formed marker in `text`, in order of appearance.
pub fn parse_all(text: &str) -> Vec<Citation> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let candidate = &rest[start..];
        match parse_prefix(candidate) {
            Some((citation, consumed)) => {
                found.push(citation);
                rest = &candidate[consumed..];
            }
            None => rest = &candidate[OPEN.len()..],
        }
    }
    found
}

/// Flag every source the answer cites. Markers are matched by id, then by
/// name for markers whose id matches nothing.
pub fn mark_used(sources: &mut [SourceReference], answer: &str) {
    for citation in parse_all(answer) {
        let by_id = sources.iter().position(|s| s.id == citation.id);
        let index = by_id.or_else(|| sources.iter().position(|s| s.name == citation.name));
        if let Some(i) = index {
            sources[i].used_in_response = Some(true);
        }
    }
}

/// Parse a marker at the start of `s`, returning it and its byte length.
fn parse_prefix(s: &str) -> Option<(Citation, usize)> {
    let body = s.strip_prefix(OPEN)?;
    let mut fields = vec![String::new()];
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                fields.last_mut()?.push(escaped);
            }
            '|' => fields.push(String::new()),
            ']' if body[i + 1..].starts_with(']') => {
                let citation = from_fields(fields)?;
                return Some((citation, OPEN.len() + i + 2));
            }
            ']' => return None,
            _ => fields.last_mut()?.push(c),
        }
    }
    None
}

fn from_fields(fields: Vec<String>) -> Option<Citation> {
    let mut id = None;
    let mut name = None;
    let mut location = None;

    for field in fields {
        let (key, value) = field.split_once('=')?;
        match key {
            "id" => id = Some(value.to_string()),
            "name" => name = Some(value.to_string()),
            "loc" => {
                let (kind, value) = value.split_once(':')?;
                location = Some((LocationType::parse(kind)?, value.to_string()));
            }
            _ => return None,
        }
    }

    Some(Citation {
        id: id.filter(|id| !id.is_empty())?,
        name: name?,
        location,
    })
}
