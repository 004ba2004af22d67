// 🚗 Car Entity - root of the aggregate
//
// Identity: `id` (assigned by the client, never changes)
// Values:   price + discount state (scheduler), manufacturer + owners (CRUD)
//
// Price rules:
// - discount:   price := price * 0.8, the pre-discount price is kept in `list_price`
// - undiscount: price := list_price when known, otherwise price / 0.8

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Manufacturer, Owner};

/// Fraction of the list price charged while a car is discounted
pub const DISCOUNT_RATE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    // ========================================================================
    // IDENTITY (never changes)
    // ========================================================================
    pub id: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    pub manufacturer: Manufacturer,

    /// Current selling price
    pub price: f64,

    /// Set once at creation
    pub first_registration_date: DateTime<Utc>,

    /// Ordered collection, owned by this car
    #[serde(default)]
    pub owners: Vec<Owner>,

    // ========================================================================
    // DISCOUNT STATE (written by the reconciliation scheduler only)
    // ========================================================================
    #[serde(default)]
    pub discounted: bool,

    /// Price before the current discount was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_price: Option<f64>,
}

impl Car {
    /// Create new, not discounted car without owners
    pub fn new(
        id: impl Into<String>,
        manufacturer: Manufacturer,
        price: f64,
        first_registration_date: DateTime<Utc>,
    ) -> Self {
        Car {
            id: id.into(),
            manufacturer,
            price,
            first_registration_date,
            owners: Vec::new(),
            discounted: false,
            list_price: None,
        }
    }

    /// Builder-style owner attachment
    pub fn with_owner(mut self, owner: Owner) -> Self {
        self.add_owner(owner);
        self
    }

    /// Attach an owner, setting its back-reference to this car
    pub fn add_owner(&mut self, mut owner: Owner) {
        owner.car_id = self.id.clone();
        self.owners.push(owner);
    }

    /// Point every owner's back-reference at this car
    pub fn link_owners(&mut self) {
        for owner in &mut self.owners {
            owner.car_id = self.id.clone();
        }
    }

    pub fn has_owners(&self) -> bool {
        !self.owners.is_empty()
    }

    pub fn find_owner(&self, owner_id: &str) -> Option<&Owner> {
        self.owners.iter().find(|o| o.id == owner_id)
    }

    /// Enter the discounted state. Returns false (and changes nothing) if already discounted.
    pub fn start_discount(&mut self) -> bool {
        if self.discounted {
            return false;
        }
        self.list_price = Some(self.price);
        self.price *= DISCOUNT_RATE;
        self.discounted = true;
        true
    }

    /// Leave the discounted state. Returns false (and changes nothing) if not discounted.
    pub fn end_discount(&mut self) -> bool {
        if !self.discounted {
            return false;
        }
        self.price = match self.list_price.take() {
            Some(list_price) => list_price,
            // Discounted before list prices were recorded
            None => self.price / DISCOUNT_RATE,
        };
        self.discounted = false;
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_car(price: f64) -> Car {
        Car::new(
            "Car1",
            Manufacturer::new("m-1", "Renault", "+33 1 00 00 00 00", 12345678900012),
            price,
            Utc::now(),
        )
    }

    #[test]
    fn test_start_discount_reduces_price() {
        let mut car = test_car(1000.0);

        assert!(car.start_discount());
        assert!(car.discounted);
        assert_eq!(car.price, 800.0);
        assert_eq!(car.list_price, Some(1000.0));
    }

    #[test]
    fn test_start_discount_twice_is_refused() {
        let mut car = test_car(1000.0);
        car.start_discount();

        assert!(!car.start_discount());
        assert_eq!(car.price, 800.0);
    }

    #[test]
    fn test_end_discount_restores_exact_list_price() {
        // 0.1 * 0.8 / 0.8 != 0.1 in binary floating point
        let mut car = test_car(0.1);
        car.start_discount();

        assert!(car.end_discount());
        assert!(!car.discounted);
        assert_eq!(car.price, 0.1);
        assert_eq!(car.list_price, None);
    }

    #[test]
    fn test_end_discount_without_list_price_divides() {
        let mut car = test_car(800.0);
        car.discounted = true;

        assert!(car.end_discount());
        assert_eq!(car.price, 1000.0);
    }

    #[test]
    fn test_end_discount_on_full_price_car_is_refused() {
        let mut car = test_car(1000.0);

        assert!(!car.end_discount());
        assert_eq!(car.price, 1000.0);
    }

    #[test]
    fn test_add_owner_sets_back_reference() {
        let car = test_car(1000.0).with_owner(Owner::new("o-1", "Alice"));

        assert!(car.has_owners());
        assert_eq!(car.owners[0].car_id, "Car1");
        assert!(car.find_owner("o-1").is_some());
        assert!(car.find_owner("o-2").is_none());
    }

    #[test]
    fn test_json_shape() {
        let car = test_car(1000.0);
        let json = serde_json::to_value(&car).unwrap();

        assert_eq!(json["id"], "Car1");
        assert_eq!(json["manufacturer"]["siret"], 12345678900012i64);
        assert!(json.get("firstRegistrationDate").is_some());
        assert!(json.get("listPrice").is_none());
    }
}
