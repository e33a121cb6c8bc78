//! libSQL backend — async `FraudStore` implementation.
//!
//! Supports local file and in-memory databases. The scoring and breakdown
//! queries are deterministic over stored data, so re-processing an event
//! yields the same decision.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::traits::{Contribution, FraudStore, NotificationContext};

/// Relative weight of each dimension in the overall distance.
const AMOUNT_WEIGHT: f64 = 0.6;
const HOUR_WEIGHT: f64 = 0.2;
const LOCATION_WEIGHT: f64 = 0.2;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS purchase (
        id TEXT PRIMARY KEY,
        customer_id TEXT NOT NULL,
        amount REAL NOT NULL,
        lat REAL NOT NULL DEFAULT 0,
        lon REAL NOT NULL DEFAULT 0,
        ts TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_purchase_customer ON purchase(customer_id);

    CREATE TABLE IF NOT EXISTS anomaly (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        purchase_id TEXT NOT NULL,
        customer_id TEXT NOT NULL,
        score REAL NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_anomaly_purchase ON anomaly(purchase_id);

    CREATE TABLE IF NOT EXISTS notification (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        purchase_id TEXT NOT NULL,
        customer_id TEXT NOT NULL,
        reasoning TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_notification_purchase ON notification(purchase_id);

    CREATE TABLE IF NOT EXISTS customer (
        id TEXT PRIMARY KEY,
        channel TEXT NOT NULL DEFAULT 'email',
        target TEXT NOT NULL DEFAULT ''
    );
"#;

/// Per-dimension deviations of one purchase from the customer's averages,
/// each clamped to [0, 1].
const DEVIATIONS: &str = r#"
    SELECT MIN(ABS(p.amount - c.avg_amount) / MAX(c.avg_amount, 1.0), 1.0),
           MIN(ABS(CAST(strftime('%H', p.ts) AS REAL) - c.avg_hour) / 12.0, 1.0),
           MIN((ABS(p.lat - c.avg_lat) + ABS(p.lon - c.avg_lon)) / 180.0, 1.0)
    FROM purchase p,
         (SELECT AVG(amount) AS avg_amount,
                 AVG(CAST(strftime('%H', ts) AS REAL)) AS avg_hour,
                 AVG(lat) AS avg_lat,
                 AVG(lon) AS avg_lon
            FROM purchase
           WHERE customer_id = ?2) c
    WHERE p.id = ?1 AND p.customer_id = ?2
"#;

/// libSQL `FraudStore` backend.
///
/// Holds a single connection reused for all operations; `libsql::Connection`
/// is safe for concurrent async use.
pub struct LibSqlStore {
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("failed to create connection: {e}")))?;

        let store = Self { conn };
        store.init_schema().await?;
        info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// Create an in-memory database (tests and local runs).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("failed to create connection: {e}")))?;

        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))
    }

    /// Insert a purchase row (fixtures; production rows arrive via CDC).
    pub async fn insert_purchase(
        &self,
        id: &str,
        customer_id: &str,
        amount: f64,
        lat: f64,
        lon: f64,
        ts: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO purchase (id, customer_id, amount, lat, lon, ts) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, customer_id, amount, lat, lon, ts.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_purchase: {e}")))?;
        Ok(())
    }

    /// Upsert a customer's contact details (fixtures; production rows arrive
    /// via CDC).
    pub async fn upsert_customer(
        &self,
        id: &str,
        channel: &str,
        target: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO customer (id, channel, target) VALUES (?1, ?2, ?3)",
                params![id, channel, target],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_customer: {e}")))?;
        Ok(())
    }

    /// Fetch the clamped per-dimension deviations for one purchase.
    async fn deviations(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<(f64, f64, f64), DatabaseError> {
        let mut rows = self
            .conn
            .query(DEVIATIONS, params![purchase_id, customer_id])
            .await
            .map_err(|e| DatabaseError::Query(format!("deviations: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let amount: f64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("deviations row: {e}")))?;
                let hour: f64 = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("deviations row: {e}")))?;
                let location: f64 = row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("deviations row: {e}")))?;
                Ok((amount, hour, location))
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "purchase".to_string(),
                id: purchase_id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("deviations: {e}"))),
        }
    }
}

#[async_trait]
impl FraudStore for LibSqlStore {
    async fn distance_from_average(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<f64, DatabaseError> {
        let (amount, hour, location) = self.deviations(purchase_id, customer_id).await?;
        let distance = AMOUNT_WEIGHT * amount + HOUR_WEIGHT * hour + LOCATION_WEIGHT * location;
        Ok(distance.min(1.0))
    }

    async fn distance_breakdown(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<Vec<Contribution>, DatabaseError> {
        let (amount, hour, location) = self.deviations(purchase_id, customer_id).await?;

        let weighted = [
            ("amount", AMOUNT_WEIGHT * amount),
            ("hour_of_day", HOUR_WEIGHT * hour),
            ("location", LOCATION_WEIGHT * location),
        ];
        let total: f64 = weighted.iter().map(|(_, w)| w).sum();

        Ok(weighted
            .iter()
            .map(|(dimension, w)| Contribution {
                dimension: dimension.to_string(),
                pct: if total > f64::EPSILON { w / total } else { 0.0 },
            })
            .collect())
    }

    async fn notification_context(
        &self,
        purchase_id: &str,
        customer_id: &str,
    ) -> Result<NotificationContext, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT c.channel, c.target, n.reasoning
                FROM customer c
                JOIN notification n ON n.customer_id = c.id
                WHERE n.purchase_id = ?1 AND c.id = ?2
                ORDER BY n.id DESC
                LIMIT 1
                "#,
                params![purchase_id, customer_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("notification_context: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(NotificationContext {
                channel: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("notification_context row: {e}")))?,
                target: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("notification_context row: {e}")))?,
                message: row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("notification_context row: {e}")))?,
            }),
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "notification context".to_string(),
                id: purchase_id.to_string(),
            }),
            Err(e) => Err(DatabaseError::Query(format!("notification_context: {e}"))),
        }
    }

    async fn insert_anomaly(
        &self,
        purchase_id: &str,
        customer_id: &str,
        score: f64,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO anomaly (purchase_id, customer_id, score, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![purchase_id, customer_id, score, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_anomaly: {e}")))?;
        Ok(())
    }

    async fn insert_notification(
        &self,
        purchase_id: &str,
        customer_id: &str,
        reasoning: &str,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO notification (purchase_id, customer_id, reasoning, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![purchase_id, customer_id, reasoning, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_notification: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    async fn seeded_store() -> LibSqlStore {
        let store = LibSqlStore::new_memory().await.unwrap();
        // A customer with a steady history: four 20.0 purchases at 10:00 from
        // the same spot.
        for i in 0..4 {
            let ts = Utc.with_ymd_and_hms(2026, 1, 1 + i, 10, 0, 0).unwrap();
            store
                .insert_purchase(&format!("p{i}"), "c1", 20.0, 51.5, -0.1, ts)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn typical_purchase_scores_near_zero() {
        let store = seeded_store().await;
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        store
            .insert_purchase("p_typical", "c1", 20.0, 51.5, -0.1, ts)
            .await
            .unwrap();

        let distance = store
            .distance_from_average("p_typical", "c1")
            .await
            .unwrap();
        assert!(distance < 0.05, "got {distance}");
    }

    #[tokio::test]
    async fn outlier_purchase_scores_above_threshold() {
        let store = seeded_store().await;
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        store
            .insert_purchase("p_outlier", "c1", 900.0, 40.7, -74.0, ts)
            .await
            .unwrap();

        let distance = store.distance_from_average("p_outlier", "c1").await.unwrap();
        assert!(distance > 0.3, "got {distance}");
        assert!(distance <= 1.0);
    }

    #[tokio::test]
    async fn scoring_is_idempotent() {
        let store = seeded_store().await;
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        store
            .insert_purchase("p_outlier", "c1", 900.0, 40.7, -74.0, ts)
            .await
            .unwrap();

        let first = store.distance_from_average("p_outlier", "c1").await.unwrap();
        let second = store.distance_from_average("p_outlier", "c1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn breakdown_covers_known_dimensions_and_sums_to_one() {
        let store = seeded_store().await;
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 3, 0, 0).unwrap();
        store
            .insert_purchase("p_outlier", "c1", 900.0, 40.7, -74.0, ts)
            .await
            .unwrap();

        let breakdown = store.distance_breakdown("p_outlier", "c1").await.unwrap();
        let dims: Vec<&str> = breakdown.iter().map(|c| c.dimension.as_str()).collect();
        assert_eq!(dims, vec!["amount", "hour_of_day", "location"]);

        let total: f64 = breakdown.iter().map(|c| c.pct).sum();
        assert!((total - 1.0).abs() < 1e-9, "got {total}");
    }

    #[tokio::test]
    async fn missing_purchase_is_not_found() {
        let store = seeded_store().await;
        let err = store
            .distance_from_average("nope", "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn notification_context_joins_customer_and_reasoning() {
        let store = seeded_store().await;
        store
            .upsert_customer("c1", "email", "c1@example.com")
            .await
            .unwrap();
        store
            .insert_notification("p0", "c1", "Your purchase looked unusual.")
            .await
            .unwrap();

        let ctx = store.notification_context("p0", "c1").await.unwrap();
        assert_eq!(ctx.channel, "email");
        assert_eq!(ctx.target, "c1@example.com");
        assert_eq!(ctx.message, "Your purchase looked unusual.");

        let err = store.notification_context("p9", "c1").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
