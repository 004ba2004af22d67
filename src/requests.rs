// 📝 Requests - validation + merge, upstream of the service
//
// The service trusts every Car it receives. Anything coming from a client
// goes through here first:
// - CreateCarRequest::into_car   validates and builds a fresh aggregate
// - UpdateCarRequest::merge_into folds a partial update into a stored car
//
// Implicit owner upsert: an update that references an owner id not present
// on the car creates that owner, purchased at the merge instant.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::entities::{Car, Manufacturer, Owner};
use crate::error::{CarError, CarResult};

// ============================================================================
// VALIDATION HELPERS
// ============================================================================

fn validate_id(id: Option<String>, what: &str) -> CarResult<String> {
    match id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(CarError::BadRequest(format!("Invalid {} id", what))),
    }
}

fn validate_price(price: Option<f64>) -> CarResult<f64> {
    match price {
        Some(price) if price.is_finite() && price >= 0.0 => Ok(price),
        Some(_) => Err(CarError::BadRequest("Invalid price".to_string())),
        None => Err(CarError::BadRequest("Missing price".to_string())),
    }
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` taken as midnight UTC
pub fn parse_registration_date(value: &str) -> CarResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CarError::BadRequest("Invalid date".to_string()))
}

fn ensure_unique_owner_ids<'a>(ids: impl Iterator<Item = &'a str>) -> CarResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(CarError::BadRequest("Invalid owner id".to_string()));
        }
        if !seen.insert(id) {
            return Err(CarError::BadRequest(format!("Duplicate owner id: {}", id)));
        }
    }
    Ok(())
}

// ============================================================================
// CREATE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateManufacturerRequest {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub siret: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOwnerRequest {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCarRequest {
    pub id: Option<String>,
    pub manufacturer: Option<CreateManufacturerRequest>,
    pub price: Option<f64>,
    pub first_registration_date: Option<String>,
    #[serde(default)]
    pub owners: Vec<CreateOwnerRequest>,
}

impl CreateCarRequest {
    /// Validate and build the aggregate; owners are purchased at `now`
    pub fn into_car(self, now: DateTime<Utc>) -> CarResult<Car> {
        let id = validate_id(self.id, "car")?;

        let manufacturer = self
            .manufacturer
            .ok_or_else(|| CarError::BadRequest("Missing manufacturer".to_string()))?;
        let manufacturer = Manufacturer {
            id: validate_id(manufacturer.id, "manufacturer")?,
            name: manufacturer.name,
            phone: manufacturer.phone,
            siret: manufacturer.siret,
        };

        let price = validate_price(self.price)?;

        let registration = self
            .first_registration_date
            .ok_or_else(|| CarError::BadRequest("Invalid date".to_string()))?;
        let first_registration_date = parse_registration_date(&registration)?;

        ensure_unique_owner_ids(self.owners.iter().map(|o| o.id.as_str()))?;

        let mut car = Car::new(id, manufacturer, price, first_registration_date);
        for owner in self.owners {
            car.add_owner(Owner::purchased_at(owner.id, owner.name, now));
        }

        Ok(car)
    }
}

// ============================================================================
// UPDATE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateManufacturerRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub siret: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOwnerRequest {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCarRequest {
    pub manufacturer: Option<UpdateManufacturerRequest>,
    /// When present, replaces the owner collection (in request order)
    pub owners: Option<Vec<UpdateOwnerRequest>>,
}

impl UpdateCarRequest {
    /// Fold this partial update into `car`. Price, registration and discount
    /// state are never touched here.
    pub fn merge_into(self, mut car: Car, now: DateTime<Utc>) -> CarResult<Car> {
        if let Some(update) = self.manufacturer {
            if let Some(name) = update.name.filter(|n| !n.is_empty()) {
                car.manufacturer.name = name;
            }
            if let Some(phone) = update.phone.filter(|p| !p.is_empty()) {
                car.manufacturer.phone = phone;
            }
            if let Some(siret) = update.siret.filter(|s| *s != 0) {
                car.manufacturer.siret = siret;
            }
        }

        if let Some(requested) = self.owners {
            ensure_unique_owner_ids(requested.iter().map(|o| o.id.as_str()))?;

            let owners = requested
                .into_iter()
                .map(|update| {
                    let mut owner = car
                        .find_owner(&update.id)
                        .cloned()
                        // implicit owner upsert
                        .unwrap_or_else(|| Owner::purchased_at(update.id.clone(), String::new(), now));

                    if let Some(name) = update.name.filter(|n| !n.is_empty()) {
                        owner.name = name;
                    }
                    owner
                })
                .collect();

            car.owners = owners;
            car.link_owners();
        }

        Ok(car)
    }
}

// ============================================================================
// TESTS
// ============================================================================
