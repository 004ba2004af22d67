// 🏭 Manufacturer Entity
// Written as part of its car's aggregate; the same id may appear on several cars.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manufacturer {
    /// Stable identity, shared across every car built by this manufacturer
    pub id: String,

    pub name: String,

    pub phone: String,

    /// Company registration (SIRET) number
    pub siret: i64,
}

impl Manufacturer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phone: impl Into<String>, siret: i64) -> Self {
        Manufacturer {
            id: id.into(),
            name: name.into(),
            phone: phone.into(),
            siret,
        }
    }
}
