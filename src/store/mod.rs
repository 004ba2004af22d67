// 🗄️ Aggregate Store - persistence contract for the Car aggregate
//
// One `save` writes the car, its manufacturer and its owners as one unit.
// The scheduler never goes through `save`: it only touches the discount
// columns, guarded by the flag it classified against.
// Nothing in the core needs a transaction spanning two cars.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::Car;
use crate::error::StoreResult;
use crate::windows::RegistrationRange;

pub use sqlite::SqliteStore;

/// Result of a conditional delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Owners are still attached; nothing was deleted
    HasOwners,
    Missing,
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Car>>;

    /// Every car, in store (insertion) order
    async fn find_all(&self) -> StoreResult<Vec<Car>>;

    /// Cars with the given discount flag whose first registration falls in `range`
    async fn find_where_discounted(
        &self,
        discounted: bool,
        range: RegistrationRange,
    ) -> StoreResult<Vec<Car>>;

    /// Upsert the aggregate. The stored owner collection becomes exactly `car.owners`.
    /// Price and discount state are written on insert only.
    async fn save(&self, car: &Car) -> StoreResult<Car>;

    /// Write only `price`, `discounted` and `list_price`, and only while the
    /// stored flag still equals `expected_discounted`. False when no row matched.
    async fn save_discount_state(&self, car: &Car, expected_discounted: bool) -> StoreResult<bool>;

    /// Delete the car, unless owners are attached to it at the time of the write
    async fn remove(&self, id: &str) -> StoreResult<Removal>;

    /// Delete owners purchased strictly before `cutoff`, across all cars
    async fn delete_owners_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
