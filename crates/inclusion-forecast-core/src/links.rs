use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    add_months, Confidence, Direction, EventCatalog, EventId, ForecastError, IndicatorCatalog,
    IndicatorId,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct LinkId(pub u32);

impl Display for LinkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Proposed,
    Validated,
    Superseded,
}

impl LinkStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Validated => "validated",
            Self::Superseded => "superseded",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "validated" => Some(Self::Validated),
            "superseded" => Some(Self::Superseded),
            _ => None,
        }
    }
}

/// Asserted effect of one event on one indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactLink {
    pub link_id: LinkId,
    pub event_id: EventId,
    pub indicator_id: IndicatorId,
    /// Copied from the (immutable) event at creation.
    #[serde(with = "crate::iso_date")]
    pub event_date: Date,
    /// `event_date + lag_months`, the first date the effect counts.
    #[serde(with = "crate::iso_date")]
    pub landing_date: Date,
    pub direction: Direction,
    pub magnitude: f64,
    pub lag_months: u32,
    pub confidence: Confidence,
    pub status: LinkStatus,
    pub supersedes: Option<LinkId>,
    pub superseded_by: Option<LinkId>,
}

impl ImpactLink {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != LinkStatus::Superseded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImpactLinkInput {
    pub event_id: EventId,
    pub indicator_id: IndicatorId,
    pub direction: Direction,
    pub magnitude: f64,
    pub lag_months: u32,
    pub confidence: Confidence,
    pub status: LinkStatus,
}

impl ImpactLinkInput {
    #[must_use]
    pub fn proposed(
        event_id: impl Into<String>,
        indicator_id: impl Into<String>,
        direction: Direction,
        magnitude: f64,
        lag_months: u32,
        confidence: Confidence,
    ) -> Self {
        Self {
            event_id: EventId::new(event_id),
            indicator_id: IndicatorId::new(indicator_id),
            direction,
            magnitude,
            lag_months,
            confidence,
            status: LinkStatus::Proposed,
        }
    }

    /// Checks the field-level invariants of a link before it is stored.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidLink`] when the magnitude is not
    /// finite or its sign contradicts the direction.
    pub fn validate(&self) -> Result<(), ForecastError> {
        if !self.magnitude.is_finite() {
            return Err(ForecastError::InvalidLink(format!(
                "{} -> {}: magnitude MUST be finite",
                self.event_id, self.indicator_id
            )));
        }

        if !self.direction.agrees_with(self.magnitude) {
            return Err(ForecastError::InvalidLink(format!(
                "{} -> {}: magnitude {} contradicts direction {}",
                self.event_id,
                self.indicator_id,
                self.magnitude,
                self.direction.as_str()
            )));
        }

        Ok(())
    }
}

/// One non-empty cell of the association matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixCell {
    pub event_id: EventId,
    pub indicator_id: IndicatorId,
    pub link_id: LinkId,
    pub effect: f64,
    pub lag_months: u32,
    pub confidence: Confidence,
    pub status: LinkStatus,
}

/// Append-only set of impact links. Links are superseded, never removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImpactLinkSet {
    links: Vec<ImpactLink>,
}

impl ImpactLinkSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends a link.
    ///
    /// Inputs with status `superseded` are archival records: they are stored
    /// as-is and do not take part in the one-active-link-per-cell check.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidLink`] when the sign contradicts the
    /// direction, the event or indicator is unknown, or the (event, indicator)
    /// cell already holds an active link.
    pub fn add_link(
        &mut self,
        events: &EventCatalog,
        indicators: &IndicatorCatalog,
        input: ImpactLinkInput,
    ) -> Result<LinkId, ForecastError> {
        input.validate()?;

        let Some(event) = events.get(&input.event_id) else {
            return Err(ForecastError::InvalidLink(format!(
                "unknown event {}",
                input.event_id
            )));
        };
        if indicators.get(&input.indicator_id).is_none() {
            return Err(ForecastError::InvalidLink(format!(
                "unknown indicator {}",
                input.indicator_id
            )));
        }

        if input.status != LinkStatus::Superseded
            && self.active_for(&input.event_id, &input.indicator_id).is_some()
        {
            return Err(ForecastError::InvalidLink(format!(
                "{} -> {} already has an active link; supersede it first",
                input.event_id, input.indicator_id
            )));
        }

        let landing_date = add_months(event.date, input.lag_months)
            .map_err(|err| ForecastError::InvalidLink(err.to_string()))?;
        let link_id = self.next_id()?;
        self.links.push(ImpactLink {
            link_id,
            event_id: input.event_id,
            indicator_id: input.indicator_id,
            event_date: event.date,
            landing_date,
            direction: input.direction,
            magnitude: input.magnitude,
            lag_months: input.lag_months,
            confidence: input.confidence,
            status: input.status,
            supersedes: None,
            superseded_by: None,
        });
        Ok(link_id)
    }

    /// Marks an active link superseded.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidLink`] when the link does not exist or
    /// is already superseded.
    pub fn supersede(&mut self, link_id: LinkId) -> Result<(), ForecastError> {
        let link = self.active_mut(link_id)?;
        link.status = LinkStatus::Superseded;
        Ok(())
    }

    /// Replaces an active link's magnitude and lag. The old link is kept as
    /// superseded and the replacement starts out proposed.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidLink`] when the link is missing or
    /// inactive, the magnitude is not finite, or the new landing date is out
    /// of range.
    pub fn revise(
        &mut self,
        link_id: LinkId,
        magnitude: f64,
        lag_months: u32,
    ) -> Result<LinkId, ForecastError> {
        let previous = self.active_mut(link_id)?.clone();
        let direction = if magnitude > 0.0 {
            Direction::Increase
        } else if magnitude < 0.0 {
            Direction::Decrease
        } else {
            Direction::Neutral
        };

        let input = ImpactLinkInput {
            event_id: previous.event_id.clone(),
            indicator_id: previous.indicator_id.clone(),
            direction,
            magnitude,
            lag_months,
            confidence: previous.confidence,
            status: LinkStatus::Proposed,
        };
        input.validate()?;
        let landing_date = add_months(previous.event_date, lag_months)
            .map_err(|err| ForecastError::InvalidLink(err.to_string()))?;
        let new_id = self.next_id()?;

        let old = self.active_mut(link_id)?;
        old.status = LinkStatus::Superseded;
        old.superseded_by = Some(new_id);

        self.links.push(ImpactLink {
            link_id: new_id,
            event_id: input.event_id,
            indicator_id: input.indicator_id,
            event_date: previous.event_date,
            landing_date,
            direction,
            magnitude,
            lag_months,
            confidence: previous.confidence,
            status: LinkStatus::Proposed,
            supersedes: Some(link_id),
            superseded_by: None,
        });
        Ok(new_id)
    }

    /// Promotes a proposed link to validated.
    ///
    /// # Errors
    /// Returns [`ForecastError::InvalidLink`] when the link does not exist or
    /// is superseded.
    pub fn mark_validated(&mut self, link_id: LinkId) -> Result<(), ForecastError> {
        let link = self.active_mut(link_id)?;
        link.status = LinkStatus::Validated;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, link_id: LinkId) -> Option<&ImpactLink> {
        usize::try_from(link_id.0)
            .ok()
            .and_then(|index| self.links.get(index))
    }

    /// Active links on an indicator, by event date then insertion order.
    #[must_use]
    pub fn get_links(&self, indicator_id: &IndicatorId) -> Vec<&ImpactLink> {
        let mut links: Vec<&ImpactLink> = self
            .links
            .iter()
            .filter(|link| link.is_active() && &link.indicator_id == indicator_id)
            .collect();
        sort_by_event_date(&mut links);
        links
    }

    /// Every link on an indicator, superseded ones included.
    #[must_use]
    pub fn history(&self, indicator_id: &IndicatorId) -> Vec<&ImpactLink> {
        let mut links: Vec<&ImpactLink> = self
            .links
            .iter()
            .filter(|link| &link.indicator_id == indicator_id)
            .collect();
        sort_by_event_date(&mut links);
        links
    }

    /// All active links, by event date then insertion order.
    #[must_use]
    pub fn active(&self) -> Vec<&ImpactLink> {
        let mut links: Vec<&ImpactLink> =
            self.links.iter().filter(|link| link.is_active()).collect();
        sort_by_event_date(&mut links);
        links
    }

    /// `None` means no asserted effect; `Some(0.0)` is an explicit no-effect.
    #[must_use]
    pub fn effect(&self, event_id: &EventId, indicator_id: &IndicatorId) -> Option<f64> {
        self.active_for(event_id, indicator_id)
            .map(|link| link.magnitude)
    }

    /// Sparse association matrix over active links.
    #[must_use]
    pub fn matrix(&self) -> BTreeMap<(EventId, IndicatorId), f64> {
        self.links
            .iter()
            .filter(|link| link.is_active())
            .map(|link| {
                (
                    (link.event_id.clone(), link.indicator_id.clone()),
                    link.magnitude,
                )
            })
            .collect()
    }

    #[must_use]
    pub fn matrix_cells(&self) -> Vec<MatrixCell> {
        let mut cells: Vec<MatrixCell> = self
            .links
            .iter()
            .filter(|link| link.is_active())
            .map(|link| MatrixCell {
                event_id: link.event_id.clone(),
                indicator_id: link.indicator_id.clone(),
                link_id: link.link_id,
                effect: link.magnitude,
                lag_months: link.lag_months,
                confidence: link.confidence,
                status: link.status,
            })
            .collect();
        cells.sort_by(|lhs, rhs| {
            (&lhs.event_id, &lhs.indicator_id).cmp(&(&rhs.event_id, &rhs.indicator_id))
        });
        cells
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImpactLink> {
        self.links.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn active_for(&self, event_id: &EventId, indicator_id: &IndicatorId) -> Option<&ImpactLink> {
        self.links.iter().find(|link| {
            link.is_active() && &link.event_id == event_id && &link.indicator_id == indicator_id
        })
    }

    fn active_mut(&mut self, link_id: LinkId) -> Result<&mut ImpactLink, ForecastError> {
        let link = usize::try_from(link_id.0)
            .ok()
            .and_then(|index| self.links.get_mut(index))
            .ok_or_else(|| ForecastError::InvalidLink(format!("unknown link {link_id}")))?;
        if !link.is_active() {
            return Err(ForecastError::InvalidLink(format!(
                "{link_id} is already superseded"
            )));
        }
        Ok(link)
    }

    fn next_id(&self) -> Result<LinkId, ForecastError> {
        u32::try_from(self.links.len())
            .map(LinkId)
            .map_err(|_| ForecastError::InvalidLink("link id space exhausted".to_string()))
    }
}

fn sort_by_event_date(links: &mut [&ImpactLink]) {
    links.sort_by(|lhs, rhs| (lhs.event_date, lhs.link_id).cmp(&(rhs.event_date, rhs.link_id)));
}
