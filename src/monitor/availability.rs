//! Availability document decoding and the "not full" date rule.

use serde_json::Value;

use super::model::DateFilter;
use crate::errors::FetchError;

/// Status token the upstream uses for a fully booked date.
pub const FULL_TOKEN: &str = "F";

const DATE_QUOTA_KEY: &str = "dateQuota";
const PROVIDER_CODE_KEY: &str = "eaiCode";

/// Response body of the availability endpoint. Object key order is preserved,
/// so iteration follows the order the upstream sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AvailabilityDocument {
    body: Value,
}

impl AvailabilityDocument {
    pub fn from_value(body: Value) -> Self {
        Self { body }
    }

    pub fn from_json(text: &str) -> Result<Self, FetchError> {
        let body: Value =
            serde_json::from_str(text).map_err(|err| FetchError::Parse(err.to_string()))?;
        if !body.is_object() {
            return Err(FetchError::Parse(
                "availability response is not a JSON object".to_string(),
            ));
        }
        Ok(Self { body })
    }

    pub fn provider_code(&self) -> Option<String> {
        match self.body.get(PROVIDER_CODE_KEY)? {
            Value::Null => None,
            Value::String(code) => Some(code.clone()),
            other => Some(other.to_string()),
        }
    }

    fn date_quota(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.body
            .get(DATE_QUOTA_KEY)
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|quota| quota.iter().map(|(key, token)| (key.as_str(), token)))
    }
}

/// Returns the number of bookable dates that pass `filter`, and the dates in
/// document order.
pub fn parse(document: &AvailabilityDocument, filter: &DateFilter) -> (usize, Vec<String>) {
    let dates: Vec<String> = document
        .date_quota()
        .filter(|(_, token)| token.as_str() != Some(FULL_TOKEN))
        .filter(|(key, _)| filter.matches(key))
        .map(|(key, _)| key.to_string())
        .collect();

    (dates.len(), dates)
}
