// Entity Models - the Car aggregate
//
// A Car owns its Manufacturer record and its Owner collection.
// The three are persisted together as one unit (see store::AggregateStore).

pub mod car;
pub mod manufacturer;
pub mod owner;

pub use car::{Car, DISCOUNT_RATE};
pub use manufacturer::Manufacturer;
pub use owner::Owner;
