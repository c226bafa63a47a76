//! Core domain model for evcal: canonical event fields, extracted records,
//! column mapping, and webhook payload types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod clock;
mod columns;
mod webhook;

pub use clock::{current_year, Clock, FixedClock, SystemClock};
pub use columns::{resolve_columns, ColumnMapping};
pub use webhook::{EventMessage, EventSource, IncomingMessage, WebhookEvent, WebhookPayload};

pub const CRATE_NAME: &str = "evcal-core";

/// One of the eleven named attributes of an event record, recognized in the
/// table by exact header match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    StartTime,
    EndTime,
    Title,
    Location,
    LocationCategory,
    Category,
    Organizer,
    Link,
    Description,
    Nature,
    RawText,
}

impl CanonicalField {
    /// Declared order; also the order of a freshly created header row.
    pub const ALL: [CanonicalField; 11] = [
        CanonicalField::StartTime,
        CanonicalField::EndTime,
        CanonicalField::Title,
        CanonicalField::Location,
        CanonicalField::LocationCategory,
        CanonicalField::Category,
        CanonicalField::Organizer,
        CanonicalField::Link,
        CanonicalField::Description,
        CanonicalField::Nature,
        CanonicalField::RawText,
    ];

    /// Property name used in the extraction schema and in serialized records.
    pub fn key(self) -> &'static str {
        match self {
            CanonicalField::StartTime => "start_time",
            CanonicalField::EndTime => "end_time",
            CanonicalField::Title => "title",
            CanonicalField::Location => "location",
            CanonicalField::LocationCategory => "location_category",
            CanonicalField::Category => "category",
            CanonicalField::Organizer => "organizer",
            CanonicalField::Link => "link",
            CanonicalField::Description => "description",
            CanonicalField::Nature => "nature",
            CanonicalField::RawText => "raw_text",
        }
    }

    /// Header label stored in row 1 of the table.
    pub fn header(self) -> &'static str {
        match self {
            CanonicalField::StartTime => "開始時間",
            CanonicalField::EndTime => "結束時間",
            CanonicalField::Title => "活動名稱",
            CanonicalField::Location => "活動地點",
            CanonicalField::LocationCategory => "活動地點分類",
            CanonicalField::Category => "分類",
            CanonicalField::Organizer => "活動單位",
            CanonicalField::Link => "活動相關連結",
            CanonicalField::Description => "活動內容",
            CanonicalField::Nature => "活動性質",
            CanonicalField::RawText => "原始資料",
        }
    }

    pub fn canonical_headers() -> Vec<String> {
        Self::ALL.iter().map(|f| f.header().to_string()).collect()
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind} label: {value:?}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Alumni,
    OtherActivity,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Alumni, Category::OtherActivity];

    pub fn label(self) -> &'static str {
        match self {
            Category::Alumni => "校友會",
            Category::OtherActivity => "其他活動",
        }
    }

    fn id(self) -> &'static str {
        match self {
            Category::Alumni => "alumni",
            Category::OtherActivity => "other_activity",
        }
    }
}

impl FromStr for Category {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.label() == s || c.id() == s)
            .ok_or_else(|| UnknownLabel {
                kind: "category",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nature {
    Outing,
    Talk,
    Course,
    Meal,
    Other,
}

impl Nature {
    pub const ALL: [Nature; 5] = [
        Nature::Outing,
        Nature::Talk,
        Nature::Course,
        Nature::Meal,
        Nature::Other,
    ];

    /// Written when the extracted record carries no nature.
    pub const DEFAULT: Nature = Nature::Other;

    pub fn label(self) -> &'static str {
        match self {
            Nature::Outing => "遊玩",
            Nature::Talk => "演講",
            Nature::Course => "課程",
            Nature::Meal => "餐會",
            Nature::Other => "其他",
        }
    }

    fn id(self) -> &'static str {
        match self {
            Nature::Outing => "outing",
            Nature::Talk => "talk",
            Nature::Course => "course",
            Nature::Meal => "meal",
            Nature::Other => "other",
        }
    }
}

impl FromStr for Nature {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Nature::ALL
            .into_iter()
            .find(|n| n.label() == s || n.id() == s)
            .ok_or_else(|| UnknownLabel {
                kind: "nature",
                value: s.to_string(),
            })
    }
}

/// Validated extraction result. `raw_text` is attached by the caller after
/// extraction and is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExtractedEvent {
    pub start_time: String,
    pub end_time: Option<String>,
    pub title: String,
    pub location: Option<String>,
    pub location_category: Option<String>,
    pub category: Option<Category>,
    pub organizer: Option<String>,
    pub link: Option<String>,
    pub nature: Option<Nature>,
    pub description: Option<String>,
    #[serde(default)]
    pub raw_text: String,
}

impl ExtractedEvent {
    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = raw_text.into();
        self
    }

    /// Nature as shown to users and written to the table.
    pub fn nature_or_default(&self) -> Nature {
        self.nature.unwrap_or(Nature::DEFAULT)
    }

    /// Cell text written for `field`. Only `nature` has a default; every other
    /// absent field renders as an empty string.
    pub fn cell_value(&self, field: CanonicalField) -> String {
        fn opt(v: &Option<String>) -> String {
            v.clone().unwrap_or_default()
        }
        match field {
            CanonicalField::StartTime => self.start_time.clone(),
            CanonicalField::EndTime => opt(&self.end_time),
            CanonicalField::Title => self.title.clone(),
            CanonicalField::Location => opt(&self.location),
            CanonicalField::LocationCategory => opt(&self.location_category),
            CanonicalField::Category => self
                .category
                .map(|c| c.label().to_string())
                .unwrap_or_default(),
            CanonicalField::Organizer => opt(&self.organizer),
            CanonicalField::Link => opt(&self.link),
            CanonicalField::Description => opt(&self.description),
            CanonicalField::Nature => self.nature_or_default().label().to_string(),
            CanonicalField::RawText => self.raw_text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("missing required field {0}")]
    MissingField(CanonicalField),
}

/// Loosely-typed handoff from the extraction service, keyed by
/// [`CanonicalField::key`]. Every value is optional until [`EventDraft::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventDraft {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub location_category: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub nature: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Outcome of validating a draft: the event plus enum values the model produced
/// that matched no known label and were therefore dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDraft {
    pub event: ExtractedEvent,
    pub unknown_labels: Vec<UnknownLabel>,
}

impl EventDraft {
    /// Rejects drafts without `start_time` or `title`. Blank strings count as
    /// absent; present values are kept verbatim.
    pub fn validate(self) -> Result<ValidatedDraft, DraftError> {
        let start_time = non_blank(self.start_time)
            .ok_or(DraftError::MissingField(CanonicalField::StartTime))?;
        let title =
            non_blank(self.title).ok_or(DraftError::MissingField(CanonicalField::Title))?;

        let mut unknown_labels = Vec::new();
        let category = non_blank(self.category).and_then(|v| match v.parse::<Category>() {
            Ok(c) => Some(c),
            Err(err) => {
                unknown_labels.push(err);
                None
            }
        });
        let nature = non_blank(self.nature).and_then(|v| match v.parse::<Nature>() {
            Ok(n) => Some(n),
            Err(err) => {
                unknown_labels.push(err);
                None
            }
        });

        Ok(ValidatedDraft {
            event: ExtractedEvent {
                start_time,
                end_time: non_blank(self.end_time),
                title,
                location: non_blank(self.location),
                location_category: non_blank(self.location_category),
                category,
                organizer: non_blank(self.organizer),
                link: non_blank(self.link),
                nature,
                description: non_blank(self.description),
                raw_text: String::new(),
            },
            unknown_labels,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_headers_follow_declared_order() {
        assert_eq!(
            CanonicalField::canonical_headers(),
            vec![
                "開始時間",
                "結束時間",
                "活動名稱",
                "活動地點",
                "活動地點分類",
                "分類",
                "活動單位",
                "活動相關連結",
                "活動內容",
                "活動性質",
                "原始資料",
            ]
        );
    }

    #[test]
    fn enum_labels_parse_from_label_or_identifier() {
        assert_eq!("演講".parse::<Nature>(), Ok(Nature::Talk));
        assert_eq!("meal".parse::<Nature>(), Ok(Nature::Meal));
        assert_eq!("校友會".parse::<Category>(), Ok(Category::Alumni));
        assert_eq!(" other_activity ".parse::<Category>(), Ok(Category::OtherActivity));
        assert!("party".parse::<Nature>().is_err());
    }

    #[test]
    fn draft_without_title_is_rejected() {
        let draft = EventDraft {
            start_time: Some("2026/06/28 16:10".into()),
            title: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(
            draft.validate(),
            Err(DraftError::MissingField(CanonicalField::Title))
        );
    }

    #[test]
    fn draft_keeps_values_verbatim_and_drops_unknown_labels() {
        let draft: EventDraft = serde_json::from_value(serde_json::json!({
            "start_time": "2026/06/28 16:10",
            "title": "高雄愛河半日遊",
            "description": "  16:30 - 17:30｜搭乘雙層巴士\n",
            "nature": "派對",
            "category": "校友會",
            "link": ""
        }))
        .unwrap();
        let validated = draft.validate().unwrap();
        assert_eq!(
            validated.event.description.as_deref(),
            Some("  16:30 - 17:30｜搭乘雙層巴士\n")
        );
        assert_eq!(validated.event.category, Some(Category::Alumni));
        assert_eq!(validated.event.nature, None);
        assert_eq!(validated.event.link, None);
        assert_eq!(validated.unknown_labels.len(), 1);
        assert_eq!(validated.unknown_labels[0].kind, "nature");
    }

    #[test]
    fn cell_values_default_only_nature() {
        let event = ExtractedEvent {
            start_time: "2026/06/28 16:10".into(),
            title: "讀書會".into(),
            ..Default::default()
        }
        .with_raw_text("原文");
        assert_eq!(event.cell_value(CanonicalField::Nature), "其他");
        assert_eq!(event.cell_value(CanonicalField::EndTime), "");
        assert_eq!(event.cell_value(CanonicalField::Category), "");
        assert_eq!(event.cell_value(CanonicalField::RawText), "原文");
    }
}
