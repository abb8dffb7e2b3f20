use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{clamp, Confidence, EventCategory, EventId, ForecastError, IndicatorId, Pillar};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Indicator {
    pub id: IndicatorId,
    pub name: String,
    pub pillar: Pillar,
    pub unit: String,
    pub valid_min: f64,
    pub valid_max: f64,
}

impl Indicator {
    /// A percentage-point indicator with the default `[0, 100]` range.
    #[must_use]
    pub fn percentage(id: impl Into<String>, name: impl Into<String>, pillar: Pillar) -> Self {
        Self {
            id: IndicatorId::new(id),
            name: name.into(),
            pillar,
            unit: "pp".to_string(),
            valid_min: 0.0,
            valid_max: 100.0,
        }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.valid_min && value <= self.valid_max
    }

    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        clamp(value, self.valid_min, self.valid_max)
    }

    fn validate(&self) -> Result<(), ForecastError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ForecastError::Schema(
                "indicator id MUST be non-empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ForecastError::Schema(format!(
                "indicator {} MUST have a display name",
                self.id
            )));
        }
        if !self.valid_min.is_finite()
            || !self.valid_max.is_finite()
            || self.valid_min >= self.valid_max
        {
            return Err(ForecastError::Schema(format!(
                "indicator {} has an empty or non-finite valid range",
                self.id
            )));
        }
        Ok(())
    }
}

/// Registry of indicators. Entries are immutable once registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorCatalog {
    indicators: BTreeMap<IndicatorId, Indicator>,
}

impl IndicatorCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an indicator.
    ///
    /// # Errors
    /// Returns [`ForecastError::Schema`] when the id is already registered or
    /// the definition is malformed.
    pub fn register(&mut self, indicator: Indicator) -> Result<(), ForecastError> {
        indicator.validate()?;
        if self.indicators.contains_key(&indicator.id) {
            return Err(ForecastError::Schema(format!(
                "indicator {} is already registered",
                indicator.id
            )));
        }
        self.indicators.insert(indicator.id.clone(), indicator);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &IndicatorId) -> Option<&Indicator> {
        self.indicators.get(id)
    }

    /// Looks up a registered indicator.
    ///
    /// # Errors
    /// Returns [`ForecastError::UnknownIndicator`] when `id` is not registered.
    pub fn require(&self, id: &IndicatorId) -> Result<&Indicator, ForecastError> {
        self.indicators
            .get(id)
            .ok_or_else(|| ForecastError::UnknownIndicator(id.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Indicator> {
        self.indicators.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub event_id: EventId,
    #[serde(with = "crate::iso_date")]
    pub date: Date,
    pub category: EventCategory,
    pub label: String,
    pub confidence: Confidence,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCatalog {
    events: BTreeMap<EventId, Event>,
    signatures: BTreeSet<(Date, EventCategory, String)>,
}

impl EventCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event.
    ///
    /// # Errors
    /// Returns [`ForecastError::Schema`] for an empty id or label, a reused
    /// id, or a repeated (date, category, label) triple.
    pub fn insert(&mut self, event: Event) -> Result<(), ForecastError> {
        if event.event_id.as_str().trim().is_empty() {
            return Err(ForecastError::Schema("event_id MUST be non-empty".to_string()));
        }
        if event.label.trim().is_empty() {
            return Err(ForecastError::Schema(format!(
                "event {} MUST have a label",
                event.event_id
            )));
        }
        if self.events.contains_key(&event.event_id) {
            return Err(ForecastError::Schema(format!(
                "event {} already exists",
                event.event_id
            )));
        }

        let signature = (
            event.date,
            event.category,
            event.label.trim().to_ascii_lowercase(),
        );
        if self.signatures.contains(&signature) {
            return Err(ForecastError::Schema(format!(
                "duplicate event: {} {} {:?}",
                event.date,
                event.category.as_str(),
                event.label
            )));
        }

        self.signatures.insert(signature);
        self.events.insert(event.event_id.clone(), event);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{date, must_err, must_ok};

    fn telebirr() -> Event {
        Event {
            event_id: EventId::from("EVT_TELEBIRR"),
            date: date("2021-05-11"),
            category: EventCategory::ProductLaunch,
            label: "Telebirr Launch".to_string(),
            confidence: Confidence::High,
            source: "ethio telecom".to_string(),
        }
    }

    #[test]
    fn duplicate_indicator_is_rejected() {
        let mut catalog = IndicatorCatalog::new();
        must_ok(catalog.register(Indicator::percentage(
            "ACC_OWNERSHIP",
            "Account Ownership",
            Pillar::Access,
        )));
        let err = must_err(catalog.register(Indicator::percentage(
            "ACC_OWNERSHIP",
            "Account Ownership (again)",
            Pillar::Access,
        )));
        assert!(matches!(err, ForecastError::Schema(_)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut indicator = Indicator::percentage("X", "X", Pillar::Usage);
        indicator.valid_min = 50.0;
        indicator.valid_max = 10.0;
        assert!(IndicatorCatalog::new().register(indicator).is_err());
    }

    #[test]
    fn clamp_respects_range() {
        let indicator = Indicator::percentage("X", "X", Pillar::Usage);
        assert!((indicator.clamp(104.0) - 100.0).abs() < f64::EPSILON);
        assert!(indicator.clamp(-3.0).abs() < f64::EPSILON);
        assert!(!indicator.contains(100.5));
        assert!(!indicator.contains(f64::NAN));
    }

    #[test]
    fn duplicate_event_signature_is_rejected() {
        let mut events = EventCatalog::new();
        must_ok(events.insert(telebirr()));

        let mut same_occurrence = telebirr();
        same_occurrence.event_id = EventId::from("EVT_TELEBIRR_DUP");
        same_occurrence.label = "telebirr launch ".to_string();
        assert!(events.insert(same_occurrence).is_err());

        let mut same_id = telebirr();
        same_id.label = "Other".to_string();
        assert!(events.insert(same_id).is_err());
        assert_eq!(events.len(), 1);
    }
}
