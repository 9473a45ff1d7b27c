use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-assigned position ticket, the natural key of a canonical trade.
///
/// The terminal sends tickets as integers; the ledger keys them as strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub String);

impl Ticket {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for Ticket {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
