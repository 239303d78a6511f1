//! Value objects for the order domain.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::OrderError;

/// Fields the customer fills in when posting an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub primary_street: String,
    pub destination_street: String,
    pub primary_city: Option<String>,
    pub destination_city: Option<String>,
    pub comment: Option<String>,
    pub package_size: Option<String>,
    pub package_weight: Option<String>,
}

impl OrderDetails {
    pub fn new(primary_street: impl Into<String>, destination_street: impl Into<String>) -> Self {
        Self {
            primary_street: primary_street.into(),
            destination_street: destination_street.into(),
            ..Self::default()
        }
    }

    pub fn with_cities(
        mut self,
        primary_city: impl Into<String>,
        destination_city: impl Into<String>,
    ) -> Self {
        self.primary_city = Some(primary_city.into());
        self.destination_city = Some(destination_city.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_package(mut self, size: impl Into<String>, weight: impl Into<String>) -> Self {
        self.package_size = Some(size.into());
        self.package_weight = Some(weight.into());
        self
    }

    /// Trims every field and checks the required ones.
    ///
    /// Optional fields that are blank after trimming become `None`.
    pub fn normalized(self) -> Result<Self, OrderError> {
        let primary_street = required("primaryStreet", self.primary_street)?;
        let destination_street = required("destinationStreet", self.destination_street)?;

        Ok(Self {
            primary_street,
            destination_street,
            primary_city: optional(self.primary_city),
            destination_city: optional(self.destination_city),
            comment: optional(self.comment),
            package_size: optional(self.package_size),
            package_weight: optional(self.package_weight),
        })
    }
}

fn required(field: &'static str, value: String) -> Result<String, OrderError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(OrderError::MissingField { field });
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A requested edit of an existing order. Only the comment is editable.
///
/// `comment` is `None` when the request leaves the comment alone and
/// `Some(None)` when it clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentUpdate {
    pub comment: Option<Option<String>>,
}

impl CommentUpdate {
    pub const ALLOWED_FIELDS: [&'static str; 1] = ["comment"];

    /// Sets the comment, or clears it with `None` or blank text.
    pub fn new(comment: Option<String>) -> Self {
        Self {
            comment: Some(optional(comment)),
        }
    }

    /// True if the update touches nothing.
    pub fn is_empty(&self) -> bool {
        self.comment.is_none()
    }

    /// Builds an update from a raw JSON object.
    ///
    /// Any key other than `comment`, or a non-string comment, is rejected.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, OrderError> {
        if fields
            .keys()
            .any(|key| !Self::ALLOWED_FIELDS.contains(&key.as_str()))
        {
            return Err(OrderError::InvalidUpdates);
        }

        match fields.get("comment") {
            None => Ok(Self::default()),
            Some(Value::Null) => Ok(Self::new(None)),
            Some(Value::String(text)) => Ok(Self::new(Some(text.clone()))),
            Some(_) => Err(OrderError::InvalidUpdates),
        }
    }
}

/// A rating a customer leaves for a driver, 1 to 5 stars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self, OrderError> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(OrderError::InvalidRating { value })
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
