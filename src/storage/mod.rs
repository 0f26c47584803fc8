use crate::models::{PriceObservation, Product, ScrapedStyle, Style, Target, TargetStatus};
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A target already exists for this style.
    #[error("style {style_id} is already tracked")]
    AlreadyTracked { style_id: i64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Db(#[from] duckdb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_products START 1;
CREATE SEQUENCE IF NOT EXISTS seq_styles START 1;
CREATE SEQUENCE IF NOT EXISTS seq_observations START 1;
CREATE SEQUENCE IF NOT EXISTS seq_targets START 1;
CREATE SEQUENCE IF NOT EXISTS seq_scrape_runs START 1;

CREATE TABLE IF NOT EXISTS products (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_products'),
    code        VARCHAR NOT NULL UNIQUE,
    name        VARCHAR NOT NULL DEFAULT '',
    created_at  TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS styles (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_styles'),
    product_id  BIGINT  NOT NULL,
    style_code  VARCHAR NOT NULL DEFAULT '',
    colour      VARCHAR NOT NULL,
    size        VARCHAR NOT NULL,
    image_url   VARCHAR NOT NULL DEFAULT '',
    UNIQUE (product_id, colour, size)
);

-- Append-only; the current value of a style is its newest row
CREATE TABLE IF NOT EXISTS price_observations (
    id          BIGINT PRIMARY KEY DEFAULT nextval('seq_observations'),
    style_id    BIGINT    NOT NULL,
    price       BIGINT    NOT NULL,
    stock       BIGINT    NOT NULL,
    observed_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS targets (
    id           BIGINT PRIMARY KEY DEFAULT nextval('seq_targets'),
    product_code VARCHAR NOT NULL,
    product_id   BIGINT  NOT NULL,
    style_id     BIGINT  NOT NULL UNIQUE,
    target_price BIGINT  NOT NULL,
    created_at   TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_scrape_runs'),
    started_at      TIMESTAMP NOT NULL,
    finished_at     TIMESTAMP,
    status          VARCHAR NOT NULL DEFAULT 'running',
    codes_processed BIGINT DEFAULT 0,
    retries_queued  BIGINT DEFAULT 0,
    error_msg       VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_styles_product ON styles (product_id);
CREATE INDEX IF NOT EXISTS idx_obs_style      ON price_observations (style_id);
"#;

/// Target → style → newest observation → product.
const TARGET_STATUS_SQL: &str = r#"
WITH latest AS (
    SELECT style_id, price, stock,
           ROW_NUMBER() OVER (
               PARTITION BY style_id ORDER BY observed_at DESC, id DESC
           ) AS rn
    FROM price_observations
)
SELECT t.id, t.product_code, COALESCE(p.name, ''), s.colour, s.size, s.image_url,
       t.target_price, l.price, l.stock
FROM targets t
JOIN styles s        ON s.id = t.style_id
LEFT JOIN products p ON p.id = s.product_id
LEFT JOIN latest l   ON l.style_id = s.id AND l.rn = 1
ORDER BY t.id DESC
"#;

// ── Row mappers ───────────────────────────────────────────────────────────────

fn product_row(r: &Row) -> duckdb::Result<Product> {
    Ok(Product {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
    })
}

fn style_row(r: &Row) -> duckdb::Result<Style> {
    Ok(Style {
        id: r.get(0)?,
        product_id: r.get(1)?,
        style_code: r.get(2)?,
        colour: r.get(3)?,
        size: r.get(4)?,
        image_url: r.get(5)?,
    })
}

fn observation_row(r: &Row) -> duckdb::Result<PriceObservation> {
    Ok(PriceObservation {
        id: r.get(0)?,
        style_id: r.get(1)?,
        price: r.get(2)?,
        stock: r.get(3)?,
        observed_at: r.get(4)?,
    })
}

fn target_row(r: &Row) -> duckdb::Result<Target> {
    Ok(Target {
        id: r.get(0)?,
        product_code: r.get(1)?,
        product_id: r.get(2)?,
        style_id: r.get(3)?,
        target_price: r.get(4)?,
    })
}

fn status_row(r: &Row) -> duckdb::Result<TargetStatus> {
    Ok(TargetStatus {
        target_id: r.get(0)?,
        product_code: r.get(1)?,
        name: r.get(2)?,
        colour: r.get(3)?,
        size: r.get(4)?,
        image_url: r.get(5)?,
        target_price: r.get(6)?,
        price: r.get(7)?,
        stock: r.get(8)?,
    })
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run_migrations(&self) -> StoreResult<()> {
        info!("Running migrations…");
        let conn = self.conn();
        conn.execute_batch(DDL)?;
        conn.execute_batch(INDEXES)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Products ──────────────────────────────────────────────────────────────

    pub fn find_product_by_code(&self, code: &str) -> StoreResult<Option<Product>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, code, name FROM products WHERE code = ?")?;
        let mut rows = stmt.query_map(params![code], product_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn create_product(&self, code: &str, name: &str) -> StoreResult<Product> {
        let id: i64 = self.conn().query_row(
            "INSERT INTO products (code, name, created_at) VALUES (?, ?, ?) RETURNING id",
            params![code, name, Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        debug!("created product {} ({})", code, id);
        Ok(Product {
            id,
            code: code.to_string(),
            name: name.to_string(),
        })
    }

    pub fn rename_product(&self, product_id: i64, name: &str) -> StoreResult<()> {
        let n = self.conn().execute(
            "UPDATE products SET name = ? WHERE id = ?",
            params![name, product_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("product {product_id}")));
        }
        Ok(())
    }

    /// Delete a product with its styles, their history and any targets on
    /// them, in one transaction. Returns false when the code is unknown.
    pub fn delete_product(&self, code: &str) -> StoreResult<bool> {
        let Some(product) = self.find_product_by_code(code)? else {
            return Ok(false);
        };
        let styles = self.styles_for_product(product.id)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for style in &styles {
            tx.execute(
                "DELETE FROM price_observations WHERE style_id = ?",
                params![style.id],
            )?;
            tx.execute("DELETE FROM targets WHERE style_id = ?", params![style.id])?;
            tx.execute("DELETE FROM styles WHERE id = ?", params![style.id])?;
        }
        tx.execute("DELETE FROM products WHERE id = ?", params![product.id])?;
        tx.commit()?;

        info!("deleted product {} with {} styles", code, styles.len());
        Ok(true)
    }

    pub fn product_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM products", [], |r| r.get(0))?)
    }

    // ── Styles ────────────────────────────────────────────────────────────────

    pub fn styles_for_product(&self, product_id: i64) -> StoreResult<Vec<Style>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, product_id, style_code, colour, size, image_url
             FROM styles WHERE product_id = ? ORDER BY id",
        )?;
        let styles = stmt
            .query_map(params![product_id], style_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(styles)
    }

    pub fn find_style(&self, product_id: i64, colour: &str, size: &str) -> StoreResult<Option<Style>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, product_id, style_code, colour, size, image_url
             FROM styles WHERE product_id = ? AND colour = ? AND size = ?",
        )?;
        let mut rows = stmt.query_map(params![product_id, colour, size], style_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn create_style(&self, product_id: i64, style: &ScrapedStyle) -> StoreResult<Style> {
        let id: i64 = self.conn().query_row(
            "INSERT INTO styles (product_id, style_code, colour, size, image_url)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
            params![
                product_id,
                style.style_code,
                style.colour,
                style.size,
                style.image_url
            ],
            |r| r.get(0),
        )?;
        Ok(Style {
            id,
            product_id,
            style_code: style.style_code.clone(),
            colour: style.colour.clone(),
            size: style.size.clone(),
            image_url: style.image_url.clone(),
        })
    }

    pub fn style_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM styles", [], |r| r.get(0))?)
    }

    // ── Price history ─────────────────────────────────────────────────────────

    pub fn append_observation(
        &self,
        style_id: i64,
        price: i64,
        stock: i64,
        observed_at: NaiveDateTime,
    ) -> StoreResult<PriceObservation> {
        let id: i64 = self.conn().query_row(
            "INSERT INTO price_observations (style_id, price, stock, observed_at)
             VALUES (?, ?, ?, ?) RETURNING id",
            params![style_id, price, stock, observed_at],
            |r| r.get(0),
        )?;
        Ok(PriceObservation {
            id,
            style_id,
            price,
            stock,
            observed_at,
        })
    }

    /// Newest observation; ties on `observed_at` go to the later insert.
    pub fn latest_observation(&self, style_id: i64) -> StoreResult<Option<PriceObservation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, style_id, price, stock, observed_at FROM price_observations
             WHERE style_id = ? ORDER BY observed_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![style_id], observation_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn price_history(&self, style_id: i64) -> StoreResult<Vec<PriceObservation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, style_id, price, stock, observed_at FROM price_observations
             WHERE style_id = ? ORDER BY observed_at, id",
        )?;
        let history = stmt
            .query_map(params![style_id], observation_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(history)
    }

    pub fn observation_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM price_observations", [], |r| r.get(0))?)
    }

    // ── Targets ───────────────────────────────────────────────────────────────

    pub fn create_target(
        &self,
        product_code: &str,
        product_id: i64,
        style_id: i64,
        target_price: i64,
    ) -> StoreResult<Target> {
        let conn = self.conn();
        let existing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM targets WHERE style_id = ?",
            params![style_id],
            |r| r.get(0),
        )?;
        if existing > 0 {
            return Err(StoreError::AlreadyTracked { style_id });
        }

        let id: i64 = conn.query_row(
            "INSERT INTO targets (product_code, product_id, style_id, target_price, created_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
            params![
                product_code,
                product_id,
                style_id,
                target_price,
                Utc::now().naive_utc()
            ],
            |r| r.get(0),
        )?;
        Ok(Target {
            id,
            product_code: product_code.to_string(),
            product_id,
            style_id,
            target_price,
        })
    }

    pub fn get_target(&self, id: i64) -> StoreResult<Option<Target>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, product_code, product_id, style_id, target_price FROM targets WHERE id = ?",
        )?;
        let mut rows = stmt.query_map(params![id], target_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn delete_target(&self, id: i64) -> StoreResult<()> {
        let n = self
            .conn()
            .execute("DELETE FROM targets WHERE id = ?", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("target {id}")));
        }
        Ok(())
    }

    /// Distinct product codes with at least one target.
    pub fn tracked_codes(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT product_code FROM targets GROUP BY product_code ORDER BY MIN(id)",
        )?;
        let codes = stmt
            .query_map([], |r| r.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(codes)
    }

    pub fn target_statuses(&self) -> StoreResult<Vec<TargetStatus>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(TARGET_STATUS_SQL)?;
        let statuses = stmt
            .query_map([], status_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(statuses)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self) -> StoreResult<i64> {
        Ok(self.conn().query_row(
            "INSERT INTO scrape_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        codes: usize,
        retries: usize,
        error: Option<&str>,
    ) -> StoreResult<()> {
        self.conn().execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               codes_processed = ?, retries_queued = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                codes as i64,
                retries as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn scrape_run_count(&self) -> StoreResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM scrape_runs", [], |r| r.get(0))?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
