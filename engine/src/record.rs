//! Record types for inventory entries.

use crate::{error::Result, Error, RecordId, Version};
use serde::{Deserialize, Serialize};

/// A geographic position attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Create a new location.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// An inventory record.
///
/// `id` is absent only for a record that has never been stored anywhere.
/// Records created while offline carry a provisional local id until the
/// engine remaps them to a server-assigned one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique identifier, server-authoritative once assigned
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    #[serde(alias = "provenienceCountry")]
    pub provenance_country: String,
    pub amount: f64,
    pub price_per_kg: f64,
    /// Increases by exactly one on every authoritative mutation
    pub version: Version,
    /// Exists locally but is not yet confirmed by the server
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// URI or blob reference of the attached photo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    /// Set together with `conflicted_remote`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub conflict: bool,
    /// Snapshot of the remote version that disagreed with this one
    #[serde(
        default,
        alias = "conflictedItem",
        skip_serializing_if = "Option::is_none"
    )]
    pub conflicted_remote: Option<Box<Record>>,
}

impl Record {
    /// Create a stored record at version 1, without an id.
    pub fn new(
        name: impl Into<String>,
        provenance_country: impl Into<String>,
        amount: f64,
        price_per_kg: f64,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            provenance_country: provenance_country.into(),
            amount,
            price_per_kg,
            version: 1,
            offline: false,
            location: None,
            photo: None,
            conflict: false,
            conflicted_remote: None,
        }
    }

    /// Create a record that has never been saved (version 0).
    ///
    /// Saving it yields version 1.
    pub fn draft(
        name: impl Into<String>,
        provenance_country: impl Into<String>,
        amount: f64,
        price_per_kg: f64,
    ) -> Self {
        Self {
            version: 0,
            ..Self::new(name, provenance_country, amount, price_per_kg)
        }
    }

    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_photo(mut self, photo: impl Into<String>) -> Self {
        self.photo = Some(photo.into());
        self
    }

    /// The record id, if one has been assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Check whether this record carries an unresolved conflict.
    pub fn is_conflicted(&self) -> bool {
        self.conflict
    }

    /// Flag a conflict against the given remote snapshot.
    pub fn mark_conflicted(&mut self, remote: Record) {
        self.conflict = true;
        self.conflicted_remote = Some(Box::new(remote));
    }

    /// Drop the conflict flag and the remote snapshot.
    pub fn clear_conflict(&mut self) {
        self.conflict = false;
        self.conflicted_remote = None;
    }

    /// Compare user-visible fields.
    ///
    /// Ignores `offline`, `version` and the conflict bookkeeping.
    pub fn same_fields(&self, other: &Record) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.provenance_country == other.provenance_country
            && self.amount == other.amount
            && self.price_per_kg == other.price_per_kg
            && self.location == other.location
            && self.photo == other.photo
    }

    /// Copy suitable for sending to the server.
    pub fn for_remote(&self) -> Record {
        let mut record = self.clone();
        record.offline = false;
        record.clear_conflict();
        record
    }

    /// Copy without an id, for remote creation.
    pub fn without_id(&self) -> Record {
        let mut record = self.for_remote();
        record.id = None;
        record
    }

    /// Validate the record before it is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("missing name".into()));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(Error::Validation(format!(
                "amount must be a non-negative number, got {}",
                self.amount
            )));
        }
        if !self.price_per_kg.is_finite() || self.price_per_kg < 0.0 {
            return Err(Error::Validation(format!(
                "price per kg must be a non-negative number, got {}",
                self.price_per_kg
            )));
        }
        if self.version == 0 {
            return Err(Error::Validation("version must be at least 1".into()));
        }
        if let Some(location) = &self.location {
            if !(-90.0..=90.0).contains(&location.latitude)
                || !(-180.0..=180.0).contains(&location.longitude)
            {
                return Err(Error::Validation(format!(
                    "location out of range: ({}, {})",
                    location.latitude, location.longitude
                )));
            }
        }
        if self.conflict != self.conflicted_remote.is_some() {
            return Err(Error::Validation(
                "conflict flag and conflicted remote snapshot disagree".into(),
            ));
        }
        Ok(())
    }
}
