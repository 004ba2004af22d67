// 🚘 Car Lifecycle Service
//
// CRUD + the discount classification queries and transitions.
// Callers merge partial updates before `update`; the service never diffs.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::entities::Car;
use crate::error::{CarError, CarResult};
use crate::store::{AggregateStore, Removal};
use crate::windows::DiscountWindows;

pub struct CarService<S> {
    store: Arc<S>,
}

impl<S> Clone for CarService<S> {
    fn clone(&self) -> Self {
        CarService {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AggregateStore> CarService<S> {
    pub fn new(store: Arc<S>) -> Self {
        CarService { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Persist a new car. Fails with Conflict if the id is taken.
    pub async fn create(&self, car: Car) -> CarResult<Car> {
        if self.store.find_by_id(&car.id).await?.is_some() {
            return Err(CarError::Conflict(car.id));
        }

        self.store.save(&car).await?;
        info!(car_id = %car.id, price = car.price, "car created");
        Ok(car)
    }

    pub async fn get(&self, id: &str) -> CarResult<Car> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| CarError::NotFound(id.to_string()))
    }

    pub async fn get_all(&self) -> CarResult<Vec<Car>> {
        Ok(self.store.find_all().await?)
    }

    /// Upsert of an already merged car. Returns the stored aggregate, whose
    /// price and discount flag may have moved since `car` was read.
    pub async fn update(&self, car: Car) -> CarResult<Car> {
        self.store.save(&car).await?;
        debug!(car_id = %car.id, "car updated");
        self.get(&car.id).await
    }

    /// Remove a car that has no owners left. The store re-checks owners at
    /// write time, so owners added after `car` was read still block the delete.
    pub async fn delete(&self, car: &Car) -> CarResult<()> {
        if car.has_owners() {
            return Err(CarError::PreconditionFailed("Car has owners".to_string()));
        }

        match self.store.remove(&car.id).await? {
            Removal::Removed => {
                info!(car_id = %car.id, "car deleted");
                Ok(())
            }
            Removal::HasOwners => Err(CarError::PreconditionFailed("Car has owners".to_string())),
            Removal::Missing => Err(CarError::NotFound(car.id.clone())),
        }
    }

    // ========================================================================
    // CLASSIFICATION
    // ========================================================================

    /// Full-price cars whose registration is inside the discount window
    pub async fn classify_to_discount(&self) -> CarResult<Vec<Car>> {
        self.classify_to_discount_at(&DiscountWindows::current()).await
    }

    pub async fn classify_to_discount_at(&self, windows: &DiscountWindows) -> CarResult<Vec<Car>> {
        Ok(self
            .store
            .find_where_discounted(false, windows.discount_range())
            .await?)
    }

    /// Discounted cars registered before the end of the discount window
    pub async fn classify_to_undiscount(&self) -> CarResult<Vec<Car>> {
        self.classify_to_undiscount_at(&DiscountWindows::current()).await
    }

    pub async fn classify_to_undiscount_at(&self, windows: &DiscountWindows) -> CarResult<Vec<Car>> {
        Ok(self
            .store
            .find_where_discounted(true, windows.undiscount_range())
            .await?)
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    // Only the discount columns are written, and only if the stored flag
    // still matches the one `car` was read with. Owners and manufacturer
    // belong to CRUD.
    async fn write_discount_state(&self, car: &Car, expected_discounted: bool) -> CarResult<()> {
        if self.store.save_discount_state(car, expected_discounted).await? {
            Ok(())
        } else {
            Err(CarError::PreconditionFailed(format!(
                "Car discount state changed since it was read: {}",
                car.id
            )))
        }
    }

    /// price := price * 0.8, discounted := true
    pub async fn apply_discount(&self, mut car: Car) -> CarResult<Car> {
        let before = car.price;
        if !car.start_discount() {
            return Err(CarError::PreconditionFailed(format!(
                "Car is already discounted: {}",
                car.id
            )));
        }

        self.write_discount_state(&car, false).await?;
        info!(car_id = %car.id, before, after = car.price, "discount started");
        Ok(car)
    }

    /// price := list price (or price / 0.8), discounted := false
    pub async fn apply_undiscount(&self, mut car: Car) -> CarResult<Car> {
        let before = car.price;
        if !car.end_discount() {
            return Err(CarError::PreconditionFailed(format!(
                "Car is not discounted: {}",
                car.id
            )));
        }

        self.write_discount_state(&car, true).await?;
        info!(car_id = %car.id, before, after = car.price, "discount ended");
        Ok(car)
    }

    // ========================================================================
    // OWNER RETENTION
    // ========================================================================

    /// Delete owners purchased before the discount window start, across all cars
    pub async fn cleanup_owners(&self) -> CarResult<usize> {
        self.cleanup_owners_at(&DiscountWindows::current()).await
    }

    pub async fn cleanup_owners_at(&self, windows: &DiscountWindows) -> CarResult<usize> {
        let cutoff: DateTime<Utc> = windows.owner_retention_cutoff();
        let removed = self.store.delete_owners_older_than(cutoff).await?;

        if removed > 0 {
            info!(removed, %cutoff, "stale owners removed");
        }
        Ok(removed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
