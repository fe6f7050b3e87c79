//! Record model: locomotive keys, the record kinds cached per key, and the
//! immutable snapshot that forms one cache generation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Normalized locomotive number, used as the lookup and index key.
///
/// Construct through [`LocoKey::parse`]; the inner string is always in
/// normalized form, so derived equality and ordering compare normalized keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LocoKey(String);

impl LocoKey {
    /// Normalize `raw` and validate it as a key.
    ///
    /// Returns `None` when nothing usable is left: empty input, input with no
    /// alphanumeric character, or the `NAN` placeholder spreadsheets export
    /// for blank numeric cells.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = normalize_key_text(raw);
        let usable = normalized.chars().any(|c| c.is_ascii_alphanumeric()) && normalized != "NAN";
        usable.then_some(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key matches an already-normalized partial key.
    pub fn matches(&self, partial: &str, policy: MatchPolicy) -> bool {
        match policy {
            MatchPolicy::Contains => self.0.contains(partial),
            MatchPolicy::Prefix => self.0.starts_with(partial),
        }
    }
}

impl TryFrom<String> for LocoKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("'{}' is not a loco number", raw.trim()))
    }
}

impl From<LocoKey> for String {
    fn from(key: LocoKey) -> Self {
        key.0
    }
}

impl fmt::Display for LocoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LocoKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize key text without validating it.
///
/// Trims, collapses internal whitespace runs to a single space, uppercases
/// ASCII letters and strips the `.0` suffix a numeric cell picks up when the
/// sheet stores loco numbers as floats (`27865.0` becomes `27865`).
pub fn normalize_key_text(raw: &str) -> String {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();

    match collapsed.strip_suffix(".0") {
        Some(whole) if !whole.is_empty() && whole.bytes().all(|b| b.is_ascii_digit()) => {
            whole.to_string()
        }
        _ => collapsed,
    }
}

/// How a partial key is matched against cached keys during autocomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Partial key may appear anywhere in the key
    #[default]
    Contains,
    /// Key must start with the partial key
    Prefix,
}

/// One attribute of a locomotive, taken from a column of the details sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub field: String,
    pub value: String,
}

/// One modification attribute; same shape as a detail.
pub type ModificationRecord = DetailRecord;

/// One maintenance schedule event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub incoming_date: Option<NaiveDate>,
    pub sch: Option<String>,
    pub outgoing_date: Option<NaiveDate>,
}

impl ScheduleRecord {
    /// Date used for chronological ordering
    pub fn sort_date(&self) -> Option<NaiveDate> {
        self.incoming_date.or(self.outgoing_date)
    }
}

/// One traction-failure incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub date_failed: Option<NaiveDate>,
    pub icms_message: Option<String>,
    pub loco_no: LocoKey,
    pub mu_with: Option<String>,
    pub div: Option<String>,
    pub rly: Option<String>,
    pub brief_message: Option<String>,
    pub cause_of_failure: Option<String>,
    pub component: Option<String>,
    pub system: Option<String>,
}

/// Every record cached for a single key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocoEntry {
    pub details: Vec<DetailRecord>,
    pub schedules: Vec<ScheduleRecord>,
    pub failures: Vec<FailureRecord>,
    pub modifications: Vec<ModificationRecord>,
}

impl LocoEntry {
    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
            && self.schedules.is_empty()
            && self.failures.is_empty()
            && self.modifications.is_empty()
    }
}

/// Record counts of one generation.
///
/// `details` and `modifications` count source rows (one per key), while
/// `schedules` and `failures` count individual events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionCounts {
    pub details: usize,
    pub schedules: usize,
    pub failures: usize,
    pub modifications: usize,
}

/// One complete, internally consistent generation of cached records.
///
/// Snapshots are immutable; a new generation replaces the old one as a whole.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheSnapshot {
    entries: BTreeMap<LocoKey, LocoEntry>,
    last_updated: Option<DateTime<Utc>>,
    counts: CollectionCounts,
}

impl CacheSnapshot {
    /// Generation served before the first successful sync
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn counts(&self) -> CollectionCounts {
        self.counts
    }

    pub fn entry(&self, key: &LocoKey) -> Option<&LocoEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&LocoKey, &LocoEntry)> {
        self.entries.iter()
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Distinct keys matching `partial`, ascending, at most `limit` of them.
    pub fn keys_matching(&self, partial: &str, policy: MatchPolicy, limit: usize) -> Vec<LocoKey> {
        self.entries
            .keys()
            .filter(|key| key.matches(partial, policy))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Assembles a candidate snapshot off to the side of the published one.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    entries: BTreeMap<LocoKey, LocoEntry>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_details(&mut self, key: LocoKey, details: Vec<DetailRecord>) {
        self.entries.entry(key).or_default().details.extend(details);
    }

    pub fn add_modifications(&mut self, key: LocoKey, modifications: Vec<ModificationRecord>) {
        self.entries
            .entry(key)
            .or_default()
            .modifications
            .extend(modifications);
    }

    pub fn add_schedule(&mut self, key: LocoKey, schedule: ScheduleRecord) {
        self.entries.entry(key).or_default().schedules.push(schedule);
    }

    pub fn add_failure(&mut self, key: LocoKey, failure: FailureRecord) {
        self.entries.entry(key).or_default().failures.push(failure);
    }

    /// Seal the generation.
    ///
    /// Schedules are put in chronological order per key; undated schedules
    /// follow dated ones and ties keep source row order.
    pub fn finish(mut self, last_updated: DateTime<Utc>) -> CacheSnapshot {
        // Keys that only produced empty detail rows carry nothing to serve.
        self.entries.retain(|_, entry| !entry.is_empty());

        let mut counts = CollectionCounts::default();
        for entry in self.entries.values_mut() {
            entry
                .schedules
                .sort_by_key(|s| (s.sort_date().is_none(), s.sort_date()));

            counts.details += usize::from(!entry.details.is_empty());
            counts.modifications += usize::from(!entry.modifications.is_empty());
            counts.schedules += entry.schedules.len();
            counts.failures += entry.failures.len();
        }

        CacheSnapshot {
            entries: self.entries,
            last_updated: Some(last_updated),
            counts,
        }
    }
}
