//! PostgreSQL persistence for listings, boundaries, and subscribers.
//!
//! Appends carry `ON CONFLICT DO NOTHING` on the listing url: the crawl
//! boundary is the primary dedup mechanism and the unique index is
//! defense-in-depth for the at-least-once queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use turnstile::Watermark;

use adscout::types::ListingId;
use adscout::{
    ListingFilter, ListingRecord, ListingStore, SellerKind, Subscriber, SubscriberId,
    SubscriberStore, WorkKey,
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn seller_to_str(seller: SellerKind) -> &'static str {
    match seller {
        SellerKind::Private => "private",
        SellerKind::Dealer => "dealer",
    }
}

fn seller_from_str(raw: &str) -> Option<SellerKind> {
    match raw {
        "private" => Some(SellerKind::Private),
        "dealer" => Some(SellerKind::Dealer),
        _ => None,
    }
}

fn row_to_listing(row: &PgRow) -> anyhow::Result<ListingRecord> {
    Ok(ListingRecord {
        id: ListingId(row.try_get("id")?),
        source: adscout::SourceId(row.try_get("source")?),
        region: adscout::RegionId(row.try_get("region")?),
        external_url: row.try_get("external_url")?,
        title: row.try_get("title")?,
        price: row.try_get("price")?,
        posted_at: row.try_get("posted_at")?,
        image_url: row.try_get("image_url")?,
        seller: row
            .try_get::<Option<String>, _>("seller")?
            .as_deref()
            .and_then(seller_from_str),
        attributes: row.try_get("attributes")?,
    })
}

#[async_trait]
impl ListingStore for PostgresStore {
    async fn append_records(&self, records: &[ListingRecord]) -> anyhow::Result<usize> {
        let mut inserted = 0usize;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO listings
                    (id, source, region, external_url, title, price, posted_at, image_url, seller, attributes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (external_url) DO NOTHING
                "#,
            )
            .bind(record.id.0)
            .bind(record.source.as_str())
            .bind(record.region.as_str())
            .bind(&record.external_url)
            .bind(&record.title)
            .bind(record.price)
            .bind(record.posted_at)
            .bind(&record.image_url)
            .bind(record.seller.map(seller_to_str))
            .bind(&record.attributes)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    async fn read_boundary(&self, key: &WorkKey) -> anyhow::Result<Option<Watermark>> {
        let row = sqlx::query(
            r#"
            SELECT last_seen_at, ids_at_last_seen
            FROM crawl_boundaries
            WHERE source = $1 AND region = $2
            "#,
        )
        .bind(key.source.as_str())
        .bind(key.region.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> anyhow::Result<Watermark> {
            Ok(Watermark {
                last_seen_at: row.try_get("last_seen_at")?,
                ids_at_last_seen: row.try_get("ids_at_last_seen")?,
            })
        })
        .transpose()
    }

    async fn write_boundary(&self, key: &WorkKey, mark: &Watermark) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_boundaries (source, region, last_seen_at, ids_at_last_seen, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (source, region) DO UPDATE
            SET last_seen_at = EXCLUDED.last_seen_at,
                ids_at_last_seen = EXCLUDED.ids_at_last_seen,
                updated_at = NOW()
            "#,
        )
        .bind(key.source.as_str())
        .bind(key.region.as_str())
        .bind(mark.last_seen_at)
        .bind(&mark.ids_at_last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_matching(
        &self,
        filter: &ListingFilter,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ListingRecord>> {
        let mut query = QueryBuilder::<sqlx::Postgres>::new(
            "SELECT id, source, region, external_url, title, price, posted_at, image_url, seller, attributes \
             FROM listings WHERE posted_at >= ",
        );
        query.push_bind(since);

        if !filter.sources.is_empty() {
            query.push(" AND source = ANY(");
            query.push_bind(
                filter
                    .sources
                    .iter()
                    .map(|source| source.0.clone())
                    .collect::<Vec<String>>(),
            );
            query.push(")");
        }
        if !filter.regions.is_empty() {
            query.push(" AND region = ANY(");
            query.push_bind(
                filter
                    .regions
                    .iter()
                    .map(|region| region.0.clone())
                    .collect::<Vec<String>>(),
            );
            query.push(")");
        }
        if let Some(min) = filter.price_min {
            query.push(" AND price >= ");
            query.push_bind(min);
        }
        if let Some(max) = filter.price_max {
            query.push(" AND price <= ");
            query.push_bind(max);
        }
        if !filter.keywords.is_empty() {
            query.push(" AND (");
            for (index, keyword) in filter.keywords.iter().enumerate() {
                if index > 0 {
                    query.push(" OR ");
                }
                query.push("title ILIKE ");
                query.push_bind(format!("%{keyword}%"));
            }
            query.push(")");
        }
        query.push(" ORDER BY posted_at ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_listing).collect()
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM listings WHERE posted_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SubscriberStore for PostgresStore {
    async fn find(&self, id: &SubscriberId) -> anyhow::Result<Option<Subscriber>> {
        let row = sqlx::query("SELECT id, active, filter FROM subscribers WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row_to_subscriber(&row)).transpose()
    }

    async fn active_subscribers(&self) -> anyhow::Result<Vec<Subscriber>> {
        let rows = sqlx::query("SELECT id, active, filter FROM subscribers WHERE active ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_subscriber).collect()
    }

    async fn read_watch_state(&self, id: &SubscriberId) -> anyhow::Result<Option<Watermark>> {
        let row = sqlx::query(
            "SELECT last_notified_at, last_notified_ids FROM subscribers WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let last_notified_at: Option<DateTime<Utc>> = row.try_get("last_notified_at")?;
        if last_notified_at.is_none() {
            return Ok(None);
        }
        Ok(Some(Watermark {
            last_seen_at: last_notified_at,
            ids_at_last_seen: row.try_get("last_notified_ids")?,
        }))
    }

    async fn write_watch_state(&self, id: &SubscriberId, mark: &Watermark) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE subscribers SET last_notified_at = $2, last_notified_ids = $3 WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(mark.last_seen_at)
        .bind(&mark.ids_at_last_seen)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("subscriber {id} does not exist");
        }
        Ok(())
    }
}

fn row_to_subscriber(row: &PgRow) -> anyhow::Result<Subscriber> {
    let filter: serde_json::Value = row.try_get("filter")?;
    Ok(Subscriber {
        id: SubscriberId(row.try_get("id")?),
        active: row.try_get("active")?,
        filter: serde_json::from_value(filter)?,
    })
}
