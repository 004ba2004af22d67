// SQLite-backed aggregate store (rusqlite + WAL)
//
// rusqlite is synchronous: every trait call runs on tokio's blocking pool
// with the connection behind a mutex, one statement batch at a time.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::{AggregateStore, Removal};
use crate::entities::{Car, Manufacturer, Owner};
use crate::error::{StoreError, StoreResult};
use crate::windows::RegistrationRange;

// ============================================================================
// TIMESTAMP ENCODING
// ============================================================================

// Fixed width + always 'Z' so text comparison in SQL matches time order
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(column: &'static str, value: String) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp { column, value })
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS manufacturers (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            siret INTEGER NOT NULL
        )",
        [],
    )?;

    // `seq` keeps insertion order stable across upserts
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cars (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            manufacturer_id TEXT NOT NULL REFERENCES manufacturers(id),
            price REAL NOT NULL,
            first_registration_date TEXT NOT NULL,
            discounted INTEGER NOT NULL DEFAULT 0,
            list_price REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS owners (
            id TEXT PRIMARY KEY NOT NULL,
            car_id TEXT NOT NULL REFERENCES cars(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            purchase_date TEXT NOT NULL,
            position INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cars_discount ON cars(discounted, first_registration_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_owners_car ON owners(car_id, position)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_owners_purchase ON owners(purchase_date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const CAR_COLUMNS: &str = "c.id, c.price, c.first_registration_date, c.discounted, c.list_price,
                           m.id, m.name, m.phone, m.siret";

struct CarRow {
    car: Car,
    registration: String,
}

fn map_car_row(row: &Row<'_>) -> rusqlite::Result<CarRow> {
    let manufacturer = Manufacturer {
        id: row.get(5)?,
        name: row.get(6)?,
        phone: row.get(7)?,
        siret: row.get(8)?,
    };

    Ok(CarRow {
        car: Car {
            id: row.get(0)?,
            manufacturer,
            price: row.get(1)?,
            // Replaced once the text column is decoded
            first_registration_date: DateTime::<Utc>::UNIX_EPOCH,
            owners: Vec::new(),
            discounted: row.get(3)?,
            list_price: row.get(4)?,
        },
        registration: row.get(2)?,
    })
}

fn load_owners(conn: &Connection, car_id: &str) -> StoreResult<Vec<Owner>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, purchase_date FROM owners
         WHERE car_id = ?1
         ORDER BY position",
    )?;

    let rows = stmt
        .query_map([car_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, name, purchase_date)| {
            let mut owner = Owner::purchased_at(id, name, decode_ts("purchase_date", purchase_date)?);
            owner.car_id = car_id.to_string();
            Ok(owner)
        })
        .collect()
}

fn hydrate(conn: &Connection, rows: Vec<CarRow>) -> StoreResult<Vec<Car>> {
    rows.into_iter()
        .map(|CarRow { mut car, registration }| {
            car.first_registration_date = decode_ts("first_registration_date", registration)?;
            car.owners = load_owners(conn, &car.id)?;
            Ok(car)
        })
        .collect()
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn get_car(conn: &Connection, id: &str) -> StoreResult<Option<Car>> {
    let sql = format!(
        "SELECT {CAR_COLUMNS} FROM cars c
         JOIN manufacturers m ON m.id = c.manufacturer_id
         WHERE c.id = ?1"
    );

    let row = conn.query_row(&sql, [id], map_car_row).optional()?;

    match row {
        Some(row) => Ok(hydrate(conn, vec![row])?.pop()),
        None => Ok(None),
    }
}

pub fn get_all_cars(conn: &Connection) -> StoreResult<Vec<Car>> {
    let sql = format!(
        "SELECT {CAR_COLUMNS} FROM cars c
         JOIN manufacturers m ON m.id = c.manufacturer_id
         ORDER BY c.seq"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], map_car_row)?
        .collect::<Result<Vec<_>, _>>()?;

    hydrate(conn, rows)
}

pub fn get_cars_by_discount(
    conn: &Connection,
    discounted: bool,
    range: RegistrationRange,
) -> StoreResult<Vec<Car>> {
    let sql = format!(
        "SELECT {CAR_COLUMNS} FROM cars c
         JOIN manufacturers m ON m.id = c.manufacturer_id
         WHERE c.discounted = ?1
           AND (?2 IS NULL OR c.first_registration_date >= ?2)
           AND c.first_registration_date < ?3
         ORDER BY c.seq"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![discounted, range.from.map(encode_ts), encode_ts(range.until)],
            map_car_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    hydrate(conn, rows)
}

pub fn count_owners(conn: &Connection) -> StoreResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM owners", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// WRITES
// ============================================================================

/// Write car + manufacturer + owners in one transaction. Price and discount
/// columns are set on insert only; afterwards `update_discount_state` owns them.
pub fn save_car(conn: &mut Connection, car: &Car) -> StoreResult<()> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO manufacturers (id, name, phone, siret) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name, phone = excluded.phone, siret = excluded.siret",
        params![
            car.manufacturer.id,
            car.manufacturer.name,
            car.manufacturer.phone,
            car.manufacturer.siret,
        ],
    )?;

    tx.execute(
        "INSERT INTO cars (id, manufacturer_id, price, first_registration_date, discounted, list_price)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            manufacturer_id = excluded.manufacturer_id,
            first_registration_date = excluded.first_registration_date",
        params![
            car.id,
            car.manufacturer.id,
            car.price,
            encode_ts(car.first_registration_date),
            car.discounted,
            car.list_price,
        ],
    )?;

    // Owners dropped from the collection are deleted with the write
    tx.execute("DELETE FROM owners WHERE car_id = ?1", [&car.id])?;

    for (position, owner) in car.owners.iter().enumerate() {
        tx.execute(
            "INSERT INTO owners (id, car_id, name, purchase_date, position)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                car_id = excluded.car_id,
                name = excluded.name,
                purchase_date = excluded.purchase_date,
                position = excluded.position",
            params![
                owner.id,
                car.id,
                owner.name,
                encode_ts(owner.purchase_date),
                position as i64,
            ],
        )?;
    }

    tx.commit()?;
    Ok(())
}

/// Compare-and-set on the discount flag; other columns and owners are left alone
pub fn update_discount_state(conn: &Connection, car: &Car, expected_discounted: bool) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE cars SET price = ?1, discounted = ?2, list_price = ?3
         WHERE id = ?4 AND discounted = ?5",
        params![car.price, car.discounted, car.list_price, car.id, expected_discounted],
    )?;

    Ok(updated == 1)
}

/// The owner check and the delete are one statement
pub fn delete_car(conn: &mut Connection, id: &str) -> StoreResult<Removal> {
    let tx = conn.transaction()?;

    let deleted = tx.execute(
        "DELETE FROM cars WHERE id = ?1
           AND NOT EXISTS (SELECT 1 FROM owners WHERE car_id = ?1)",
        [id],
    )?;

    let removal = if deleted > 0 {
        Removal::Removed
    } else {
        let exists = tx
            .query_row("SELECT 1 FROM cars WHERE id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            Removal::HasOwners
        } else {
            Removal::Missing
        }
    };

    tx.commit()?;
    Ok(removal)
}

pub fn delete_owners_before(conn: &Connection, cutoff: DateTime<Utc>) -> StoreResult<usize> {
    let removed = conn.execute(
        "DELETE FROM owners WHERE purchase_date < ?1",
        [encode_ts(cutoff)],
    )?;

    Ok(removed)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Wrap an open connection, creating the schema if needed
    pub fn new(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub async fn owner_count(&self) -> StoreResult<i64> {
        self.with_conn(|conn| count_owners(conn)).await
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Car>> {
        let id = id.to_string();
        self.with_conn(move |conn| get_car(conn, &id)).await
    }

    async fn find_all(&self) -> StoreResult<Vec<Car>> {
        self.with_conn(|conn| get_all_cars(conn)).await
    }

    async fn find_where_discounted(
        &self,
        discounted: bool,
        range: RegistrationRange,
    ) -> StoreResult<Vec<Car>> {
        debug!(discounted, from = ?range.from, until = %range.until, "querying cars by discount window");
        self.with_conn(move |conn| get_cars_by_discount(conn, discounted, range))
            .await
    }

    async fn save(&self, car: &Car) -> StoreResult<Car> {
        let mut car = car.clone();
        car.link_owners();
        debug!(car_id = %car.id, owners = car.owners.len(), "saving car aggregate");

        self.with_conn(move |conn| {
            save_car(conn, &car)?;
            Ok(car)
        })
        .await
    }

    async fn save_discount_state(&self, car: &Car, expected_discounted: bool) -> StoreResult<bool> {
        let car = car.clone();
        debug!(car_id = %car.id, discounted = car.discounted, price = car.price, "writing discount state");
        self.with_conn(move |conn| update_discount_state(conn, &car, expected_discounted))
            .await
    }

    async fn remove(&self, id: &str) -> StoreResult<Removal> {
        let id = id.to_string();
        debug!(car_id = %id, "removing car");
        self.with_conn(move |conn| delete_car(conn, &id)).await
    }

    async fn delete_owners_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.with_conn(move |conn| delete_owners_before(conn, cutoff))
            .await
    }
}

// ============================================================================
// TESTS
// ============================================================================
