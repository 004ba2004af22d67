// 👤 Owner Entity
// Exclusively owned by one Car. The purchase date is stamped by us, never by the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub id: String,

    pub name: String,

    /// When this owner bought the car (set at creation to "now")
    pub purchase_date: DateTime<Utc>,

    /// Back-reference to the owning car (empty until attached)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub car_id: String,
}

impl Owner {
    /// Create new owner purchased right now
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::purchased_at(id, name, Utc::now())
    }

    /// Create owner with an explicit purchase date (loading, tests)
    pub fn purchased_at(id: impl Into<String>, name: impl Into<String>, purchase_date: DateTime<Utc>) -> Self {
        Owner {
            id: id.into(),
            name: name.into(),
            purchase_date,
            car_id: String::new(),
        }
    }
}
