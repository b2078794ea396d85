use chrono::{DateTime, Utc};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
};
use std::fmt;

/// Lifecycle of a single bulk item.
///
/// `Ready -> Scraping -> Listing -> Listed` is the happy path. `Failed` can be
/// reached from any non-terminal state, `Cancelled` only from `Ready`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Ready,
    Scraping,
    Listing,
    Listed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Listed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn can_advance_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Ready, Scraping)
                | (Scraping, Listing)
                | (Listing, Listed)
                | (Ready | Scraping | Listing, Failed)
                | (Ready, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "Ready",
            JobStatus::Scraping => "Scraping",
            JobStatus::Listing => "Listing",
            JobStatus::Listed => "Listed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
        }
    }
}

/// Item specifics in the order they were written. Keys are case-sensitive and
/// a repeated key overwrites the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Specifics(Vec<(String, String)>);

impl Specifics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn extend(&mut self, other: Specifics) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }

    pub fn contains_key_ignore_case(&self, key: &str) -> bool {
        self.0
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Specifics {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut specifics = Specifics::new();
        for (key, value) in iter {
            specifics.insert(key, value);
        }
        specifics
    }
}

impl Serialize for Specifics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de> Deserialize<'de> for Specifics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecificsVisitor;

        impl<'de> Visitor<'de> for SpecificsVisitor {
            type Value = Specifics;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of item specifics")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Specifics, A::Error> {
                let mut specifics = Specifics::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    specifics.insert(key, value);
                }
                Ok(specifics)
            }
        }

        deserializer.deserialize_map(SpecificsVisitor)
    }
}

/// One unit of bulk work, derived from a parsed text block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub index: usize,
    pub url: String,
    pub quantity: u32,
    pub note: String,
    pub custom_specifics: Specifics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_hint: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
}

impl Job {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            quantity: 1,
            note: String::new(),
            custom_specifics: Specifics::new(),
            title_hint: None,
            status: JobStatus::Ready,
            message: String::new(),
        }
    }
}

/// Normalized product record handed from the scraper to the submitter and
/// persisted per job before submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub source_url: String,
    pub title: String,
    #[serde(default)]
    pub price: Option<f64>,
    pub currency: String,
    pub quantity: u32,
    #[serde(default)]
    pub seller_note: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub specifics: Specifics,
    #[serde(default)]
    pub custom_specifics: Specifics,
    pub scraped_at: DateTime<Utc>,
}

/// Outcome reported by a marketplace submitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResult {
    pub ok: bool,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SubmitResult {
    pub fn listed(external_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            external_id: Some(external_id.into()),
            errors: Vec::new(),
        }
    }

    pub fn rejected(errors: Vec<String>) -> Self {
        Self {
            ok: false,
            external_id: None,
            errors,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Idle,
    Working,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusLine {
    pub label: String,
    pub message: String,
    pub tone: StatusTone,
}

impl StatusLine {
    pub fn new(label: &str, message: impl Into<String>, tone: StatusTone) -> Self {
        Self {
            label: label.to_string(),
            message: message.into(),
            tone,
        }
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::new("Idle", "Ready to start.", StatusTone::Idle)
    }
}

/// Consistent copy of a session's batch, safe to hand to any poller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchView {
    pub running: bool,
    pub paused: bool,
    pub cancelled: bool,
    pub processed: usize,
    pub total: usize,
    pub items: Vec<Job>,
    pub status: StatusLine,
    /// A single-product scrape or listing is in flight.
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub product_loaded: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Text,
    Choice,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPrompt {
    pub id: u64,
    pub kind: PromptKind,
    pub question: String,
    pub default: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_only_moves_forward() {
        use JobStatus::*;
        assert!(Ready.can_advance_to(Scraping));
        assert!(Scraping.can_advance_to(Listing));
        assert!(Listing.can_advance_to(Listed));
        assert!(Scraping.can_advance_to(Failed));
        assert!(Ready.can_advance_to(Cancelled));
        assert!(!Listing.can_advance_to(Scraping));
        assert!(!Scraping.can_advance_to(Cancelled));
        for terminal in [Listed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Ready, Scraping, Listing, Listed, Failed, Cancelled] {
                assert!(!terminal.can_advance_to(next));
            }
        }
    }

    #[test]
    fn specifics_keep_order_and_last_write_wins() {
        let mut specifics = Specifics::new();
        specifics.insert("Size", "M");
        specifics.insert("Colour", "Red");
        specifics.insert("Size", "L");
        specifics.insert("size", "XL");
        let pairs: Vec<_> = specifics.iter().collect();
        assert_eq!(pairs, vec![("Size", "L"), ("Colour", "Red"), ("size", "XL")]);
        let json = serde_json::to_string(&specifics).unwrap();
        assert_eq!(json, r#"{"Size":"L","Colour":"Red","size":"XL"}"#);
        let back: Specifics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, specifics);
    }
}
