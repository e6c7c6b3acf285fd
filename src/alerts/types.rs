//! Alert records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Category of incident an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Unwanted physical contact between people
    InappropriateContact,
    /// A watched item disappeared
    ObjectTheft,
    /// Flagged terms heard in speech
    OffensiveLanguage,
}

impl AlertKind {
    pub const ALL: [AlertKind; 3] = [
        AlertKind::InappropriateContact,
        AlertKind::ObjectTheft,
        AlertKind::OffensiveLanguage,
    ];

    /// Identifier used on disk and in evidence file names.
    pub fn slug(&self) -> &'static str {
        match self {
            AlertKind::InappropriateContact => "inappropriate_contact",
            AlertKind::ObjectTheft => "object_theft",
            AlertKind::OffensiveLanguage => "offensive_language",
        }
    }

    /// Title for display.
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::InappropriateContact => "Inappropriate Contact",
            AlertKind::ObjectTheft => "Object Theft",
            AlertKind::OffensiveLanguage => "Offensive Language",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "inappropriate_contact" | "contact" => Ok(AlertKind::InappropriateContact),
            "object_theft" | "theft" => Ok(AlertKind::ObjectTheft),
            "offensive_language" | "speech" => Ok(AlertKind::OffensiveLanguage),
            _ => Err(format!("unknown alert kind: {s}")),
        }
    }
}

/// A persisted record of one positive detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "alert_type")]
    pub kind: AlertKind,
    pub description: String,
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    #[serde(default)]
    pub is_false_positive: bool,
    #[serde(default)]
    pub feedback: String,
}

impl Alert {
    /// Evidence files referenced by this alert.
    pub fn evidence_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.video_path.iter().chain(self.audio_path.iter())
    }
}

/// An alert as raised by a pipeline, before the store assigns id and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    /// Id obtained from `AlertStore::reserve_id`; the store picks one if unset
    pub id: Option<String>,
    pub kind: AlertKind,
    pub description: String,
    pub video_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
}

impl NewAlert {
    pub fn new(kind: AlertKind, description: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            description: description.into(),
            video_path: None,
            audio_path: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_video(mut self, path: Option<PathBuf>) -> Self {
        self.video_path = path;
        self
    }

    pub fn with_audio(mut self, path: Option<PathBuf>) -> Self {
        self.audio_path = path;
        self
    }
}

/// Review-side filter over stored alerts.
#[derive(Debug, Clone)]
pub struct AlertFilter {
    pub kind: Option<AlertKind>,
    /// Calendar day (UTC) the alert was raised on
    pub date: Option<NaiveDate>,
    pub include_false_positives: bool,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            kind: None,
            date: None,
            include_false_positives: true,
        }
    }
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        if !self.include_false_positives && alert.is_false_positive {
            return false;
        }
        if self.kind.is_some_and(|k| k != alert.kind) {
            return false;
        }
        if self.date.is_some_and(|d| d != alert.timestamp.date_naive()) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: AlertKind, day: u32, false_positive: bool) -> Alert {
        Alert {
            id: "abcd1234".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 5, day)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap()
                .and_utc(),
            kind,
            description: String::new(),
            video_path: None,
            audio_path: None,
            is_false_positive: false_positive,
            feedback: String::new(),
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("theft".parse::<AlertKind>().unwrap(), AlertKind::ObjectTheft);
        assert_eq!(
            "Offensive-Language".parse::<AlertKind>().unwrap(),
            AlertKind::OffensiveLanguage
        );
        assert!("burglary".parse::<AlertKind>().is_err());
        for kind in AlertKind::ALL {
            assert_eq!(kind.slug().parse::<AlertKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(alert(AlertKind::InappropriateContact, 1, false)).unwrap();
        assert_eq!(json["alert_type"], "inappropriate_contact");
        assert_eq!(json["is_false_positive"], false);
        assert!(json["video_path"].is_null());
    }

    #[test]
    fn test_filter() {
        let theft = alert(AlertKind::ObjectTheft, 3, false);
        let dismissed = alert(AlertKind::ObjectTheft, 3, true);

        assert!(AlertFilter::default().matches(&dismissed));

        let filter = AlertFilter {
            kind: Some(AlertKind::ObjectTheft),
            date: NaiveDate::from_ymd_opt(2024, 5, 3),
            include_false_positives: false,
        };
        assert!(filter.matches(&theft));
        assert!(!filter.matches(&dismissed));
        assert!(!filter.matches(&alert(AlertKind::ObjectTheft, 4, false)));
        assert!(!filter.matches(&alert(AlertKind::OffensiveLanguage, 3, false)));
    }

    #[test]
    fn test_new_alert_builder() {
        let new = NewAlert::new(AlertKind::ObjectTheft, "cup missing")
            .with_video(Some(PathBuf::from("/tmp/a.gif")))
            .with_audio(None);
        assert_eq!(new.video_path.as_deref(), Some(std::path::Path::new("/tmp/a.gif")));
        assert!(new.audio_path.is_none());
    }
}
