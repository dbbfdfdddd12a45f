//! Citable source references surfaced alongside a research answer.

use serde::{Deserialize, Serialize};

/// Where inside a source a cited passage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Line,
    Page,
    Paragraph,
    Chapter,
    Section,
    Timecode,
    Anchor,
    Index,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Page => "page",
            Self::Paragraph => "paragraph",
            Self::Chapter => "chapter",
            Self::Section => "section",
            Self::Timecode => "timecode",
            Self::Anchor => "anchor",
            Self::Index => "index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(Self::Line),
            "page" => Some(Self::Page),
            "paragraph" => Some(Self::Paragraph),
            "chapter" => Some(Self::Chapter),
            "section" => Some(Self::Section),
            "timecode" => Some(Self::Timecode),
            "anchor" => Some(Self::Anchor),
            "index" => Some(Self::Index),
            _ => None,
        }
    }
}

impl std::fmt::Display for LocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed pointer into a source. Exactly one type per location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(rename = "type")]
    pub kind: LocationType,

    pub value: String,

    /// Human-readable rendering, e.g. "Page 12" or "01:23:45"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SourceLocation {
    pub fn new(kind: LocationType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Broad media class of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Audio,
    Video,
    Website,
    Document,
    Text,
}

impl SourceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "audio" | "podcast" => Some(Self::Audio),
            "video" | "youtube" => Some(Self::Video),
            "website" | "web" | "url" | "link" => Some(Self::Website),
            "document" | "doc" | "docx" => Some(Self::Document),
            "text" | "txt" | "markdown" | "note" => Some(Self::Text),
            _ => None,
        }
    }
}

/// A citable unit of retrieved knowledge. Unique by `id` within one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub id: String,
    pub name: String,
    pub excerpt: String,

    /// Relevance in [0, 1]
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_in_response: Option<bool>,
}

impl SourceReference {
    pub fn new(id: impl Into<String>, name: impl Into<String>, excerpt: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            excerpt: excerpt.into(),
            score: score.clamp(0.0, 1.0),
            location: None,
            source_type: None,
            used_in_response: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }
}
