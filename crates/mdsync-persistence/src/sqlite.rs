//! SQLite backing store.
//!
//! Decimals are stored as TEXT to keep exact provider values; dates as
//! `YYYY-MM-DD` so lexical order equals date order and `MAX(date)` works.

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{ExclusionSource, MarketStore};
use chrono::{DateTime, NaiveDate, Utc};
use mdsync_core::{DividendEvent, PricePoint, SecurityKind, SymbolRecord, ValidationOutcome};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Bound on bound parameters per `IN (...)` query.
const MAX_IN_PARAMS: usize = 500;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS symbols (
    symbol TEXT PRIMARY KEY,
    venue TEXT,
    kind TEXT NOT NULL,
    name TEXT,
    description TEXT,
    sector TEXT,
    industry TEXT,
    website TEXT,
    provenance TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    profile_refreshed_at TEXT
);
CREATE TABLE IF NOT EXISTS daily_prices (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open TEXT,
    high TEXT,
    low TEXT,
    close TEXT NOT NULL,
    adj_close TEXT,
    volume INTEGER,
    aum TEXT,
    implied_volatility TEXT,
    source TEXT NOT NULL,
    PRIMARY KEY (symbol, date)
);
CREATE TABLE IF NOT EXISTS dividends (
    symbol TEXT NOT NULL,
    ex_date TEXT NOT NULL,
    amount TEXT NOT NULL,
    record_date TEXT,
    pay_date TEXT,
    declaration_date TEXT,
    source TEXT NOT NULL,
    PRIMARY KEY (symbol, ex_date)
);
CREATE TABLE IF NOT EXISTS exclusions (
    symbol TEXT PRIMARY KEY,
    reason TEXT NOT NULL,
    source TEXT NOT NULL,
    excluded_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS admissions (
    symbol TEXT PRIMARY KEY,
    has_recent_price INTEGER NOT NULL,
    has_dividend_history INTEGER NOT NULL,
    via_portfolio INTEGER NOT NULL,
    validated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_daily_prices_date ON daily_prices(date);
CREATE INDEX IF NOT EXISTS idx_dividends_ex_date ON dividends(ex_date);
";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: &Path, pool_size: u32) -> PersistenceResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        let store = Self { pool };
        store.initialize_schema()?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(store)
    }

    /// Single-connection in-memory database.
    pub fn in_memory() -> PersistenceResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> PersistenceResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn initialize_schema(&self) -> PersistenceResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn latest_dates(
        &self,
        table: &str,
        date_column: &str,
        symbols: &[String],
    ) -> PersistenceResult<HashMap<String, NaiveDate>> {
        let conn = self.conn()?;
        let mut latest = HashMap::with_capacity(symbols.len());

        for chunk in symbols.chunks(MAX_IN_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT symbol, MAX({date_column}) FROM {table}
                 WHERE symbol IN ({placeholders}) GROUP BY symbol"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (symbol, date) = row?;
                latest.insert(symbol, parse_date(&date)?);
            }
        }

        debug!(table, requested = symbols.len(), found = latest.len(), "Loaded latest dates");
        Ok(latest)
    }
}

fn decimal_text(value: &Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn date_text(value: &Option<NaiveDate>) -> Option<String> {
    value.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date(raw: &str) -> PersistenceResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| PersistenceError::Corrupt(format!("date '{raw}': {e}")))
}

fn parse_decimal(raw: &str) -> PersistenceResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| PersistenceError::Corrupt(format!("decimal '{raw}': {e}")))
}

fn parse_timestamp(raw: &str) -> PersistenceResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("timestamp '{raw}': {e}")))
}

fn opt<T>(
    raw: Option<String>,
    parse: impl Fn(&str) -> PersistenceResult<T>,
) -> PersistenceResult<Option<T>> {
    raw.as_deref().map(parse).transpose()
}

struct RawSymbol {
    symbol: String,
    venue: Option<String>,
    kind: String,
    name: Option<String>,
    description: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    website: Option<String>,
    provenance: String,
    created_at: String,
    updated_at: String,
    profile_refreshed_at: Option<String>,
}

impl RawSymbol {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            symbol: row.get(0)?,
            venue: row.get(1)?,
            kind: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            sector: row.get(5)?,
            industry: row.get(6)?,
            website: row.get(7)?,
            provenance: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            profile_refreshed_at: row.get(11)?,
        })
    }

    fn into_record(self) -> PersistenceResult<SymbolRecord> {
        Ok(SymbolRecord {
            kind: SecurityKind::from_str(&self.kind)
                .map_err(|e| PersistenceError::Corrupt(e.to_string()))?,
            provenance: serde_json::from_str(&self.provenance)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            profile_refreshed_at: opt(self.profile_refreshed_at, parse_timestamp)?,
            symbol: self.symbol,
            venue: self.venue,
            name: self.name,
            description: self.description,
            sector: self.sector,
            industry: self.industry,
            website: self.website,
        })
    }
}

impl MarketStore for SqliteStore {
    fn upsert_prices(&self, prices: &[PricePoint]) -> PersistenceResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO daily_prices
                 (symbol, date, open, high, low, close, adj_close, volume, aum, implied_volatility, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for p in prices {
                stmt.execute(params![
                    p.symbol,
                    p.date.format("%Y-%m-%d").to_string(),
                    decimal_text(&p.open),
                    decimal_text(&p.high),
                    decimal_text(&p.low),
                    p.close.to_string(),
                    decimal_text(&p.adj_close),
                    p.volume,
                    decimal_text(&p.aum),
                    decimal_text(&p.implied_volatility),
                    p.source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(prices.len())
    }

    fn upsert_dividends(&self, dividends: &[DividendEvent]) -> PersistenceResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO dividends
                 (symbol, ex_date, amount, record_date, pay_date, declaration_date, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for d in dividends {
                stmt.execute(params![
                    d.symbol,
                    d.ex_date.format("%Y-%m-%d").to_string(),
                    d.amount.to_string(),
                    date_text(&d.record_date),
                    date_text(&d.pay_date),
                    date_text(&d.declaration_date),
                    d.source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(dividends.len())
    }

    fn upsert_symbol(&self, record: &SymbolRecord) -> PersistenceResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO symbols
             (symbol, venue, kind, name, description, sector, industry, website,
              provenance, created_at, updated_at, profile_refreshed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(symbol) DO UPDATE SET
                venue = excluded.venue,
                kind = excluded.kind,
                name = excluded.name,
                description = excluded.description,
                sector = excluded.sector,
                industry = excluded.industry,
                website = excluded.website,
                provenance = excluded.provenance,
                updated_at = excluded.updated_at,
                profile_refreshed_at = excluded.profile_refreshed_at",
            params![
                record.symbol,
                record.venue,
                record.kind.as_str(),
                record.name,
                record.description,
                record.sector,
                record.industry,
                record.website,
                serde_json::to_string(&record.provenance)?,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.profile_refreshed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn symbols(&self, symbols: &[String]) -> PersistenceResult<Vec<SymbolRecord>> {
        let conn = self.conn()?;
        let mut records = Vec::with_capacity(symbols.len());
        for chunk in symbols.chunks(MAX_IN_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT symbol, venue, kind, name, description, sector, industry, website,
                        provenance, created_at, updated_at, profile_refreshed_at
                 FROM symbols WHERE symbol IN ({placeholders}) ORDER BY symbol"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), RawSymbol::from_row)?;
            for row in rows {
                records.push(row?.into_record()?);
            }
        }
        Ok(records)
    }

    fn tracked_symbols(&self) -> PersistenceResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.symbol FROM symbols s
             LEFT JOIN exclusions e ON e.symbol = s.symbol
             WHERE e.symbol IS NULL ORDER BY s.symbol",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn latest_price_dates(&self, symbols: &[String]) -> PersistenceResult<HashMap<String, NaiveDate>> {
        self.latest_dates("daily_prices", "date", symbols)
    }

    fn latest_dividend_dates(
        &self,
        symbols: &[String],
    ) -> PersistenceResult<HashMap<String, NaiveDate>> {
        self.latest_dates("dividends", "ex_date", symbols)
    }

    fn prices_for(&self, symbol: &str) -> PersistenceResult<Vec<PricePoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol, date, open, high, low, close, adj_close, volume, aum, implied_volatility, source
             FROM daily_prices WHERE symbol = ?1 ORDER BY date",
        )?;
        let rows = stmt.query_map(params![symbol], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                [
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ],
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, String>(10)?,
            ))
        })?;

        let mut prices = Vec::new();
        for row in rows {
            let (symbol, date, [open, high, low], close, adj_close, volume, aum, iv, source) = row?;
            prices.push(PricePoint {
                symbol,
                date: parse_date(&date)?,
                open: opt(open, parse_decimal)?,
                high: opt(high, parse_decimal)?,
                low: opt(low, parse_decimal)?,
                close: parse_decimal(&close)?,
                adj_close: opt(adj_close, parse_decimal)?,
                volume,
                aum: opt(aum, parse_decimal)?,
                implied_volatility: opt(iv, parse_decimal)?,
                source,
            });
        }
        Ok(prices)
    }

    fn dividends_for(&self, symbol: &str) -> PersistenceResult<Vec<DividendEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol, ex_date, amount, record_date, pay_date, declaration_date, source
             FROM dividends WHERE symbol = ?1 ORDER BY ex_date",
        )?;
        let rows = stmt.query_map(params![symbol], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut dividends = Vec::new();
        for row in rows {
            let (symbol, ex_date, amount, record_date, pay_date, declaration_date, source) = row?;
            dividends.push(DividendEvent {
                symbol,
                ex_date: parse_date(&ex_date)?,
                amount: parse_decimal(&amount)?,
                record_date: opt(record_date, parse_date)?,
                pay_date: opt(pay_date, parse_date)?,
                declaration_date: opt(declaration_date, parse_date)?,
                source,
            });
        }
        Ok(dividends)
    }

    fn excluded_symbols(&self) -> PersistenceResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT symbol FROM exclusions")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    fn exclusion_reason(&self, symbol: &str) -> PersistenceResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT reason FROM exclusions WHERE symbol = ?1",
                params![symbol],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    fn record_exclusion(
        &self,
        symbol: &str,
        reason: &str,
        source: ExclusionSource,
    ) -> PersistenceResult<()> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO exclusions (symbol, reason, source, excluded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![symbol, reason, source.as_str(), Utc::now().to_rfc3339()],
        )?;
        if inserted > 0 {
            debug!(symbol, reason, source = %source, "Recorded exclusion");
        }
        Ok(())
    }

    fn validated_symbols(&self) -> PersistenceResult<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT symbol FROM admissions
             UNION SELECT symbol FROM exclusions WHERE source = ?1",
        )?;
        let rows = stmt.query_map(params![ExclusionSource::Validation.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    fn record_validation(
        &self,
        outcome: &ValidationOutcome,
        record: &SymbolRecord,
    ) -> PersistenceResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM admissions WHERE symbol = ?1)
                 OR EXISTS(SELECT 1 FROM exclusions WHERE symbol = ?1)",
            params![outcome.symbol],
            |row| row.get(0),
        )?;
        if existing {
            debug!(symbol = %outcome.symbol, "Earlier validation outcome kept");
            return Ok(false);
        }

        if outcome.admitted {
            tx.execute(
                "INSERT OR IGNORE INTO symbols
                 (symbol, venue, kind, provenance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.symbol,
                    record.venue,
                    record.kind.as_str(),
                    serde_json::to_string(&record.provenance)?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            tx.execute(
                "INSERT INTO admissions
                 (symbol, has_recent_price, has_dividend_history, via_portfolio, validated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    outcome.symbol,
                    outcome.has_recent_price,
                    outcome.has_dividend_history,
                    outcome.via_portfolio,
                    outcome.validated_at.to_rfc3339(),
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO exclusions (symbol, reason, source, excluded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    outcome.symbol,
                    outcome.reason.as_deref().unwrap_or("rejected"),
                    ExclusionSource::Validation.as_str(),
                    outcome.validated_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }
}
