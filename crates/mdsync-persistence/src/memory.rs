//! In-process store used for `--dry-run` and tests.

use crate::error::{PersistenceError, PersistenceResult};
use crate::store::{ExclusionSource, MarketStore};
use chrono::NaiveDate;
use mdsync_core::{DividendEvent, PricePoint, SymbolRecord, ValidationOutcome};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct ExclusionRow {
    reason: String,
    source: ExclusionSource,
}

#[derive(Default)]
struct Tables {
    symbols: BTreeMap<String, SymbolRecord>,
    prices: BTreeMap<(String, NaiveDate), PricePoint>,
    dividends: BTreeMap<(String, NaiveDate), DividendEvent>,
    exclusions: BTreeMap<String, ExclusionRow>,
    admissions: BTreeMap<String, ValidationOutcome>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// When set every write fails, simulating an unreachable store.
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> PersistenceResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(PersistenceError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn price_count(&self) -> usize {
        self.tables.read().prices.len()
    }

    pub fn dividend_count(&self) -> usize {
        self.tables.read().dividends.len()
    }

    pub fn exclusion_count(&self) -> usize {
        self.tables.read().exclusions.len()
    }
}

fn latest_by_symbol<T>(
    rows: &BTreeMap<(String, NaiveDate), T>,
    symbols: &[String],
) -> HashMap<String, NaiveDate> {
    let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
    let mut latest = HashMap::new();
    // Keys are ordered by (symbol, date), so the last write per symbol wins.
    for (symbol, date) in rows.keys() {
        if wanted.contains(symbol.as_str()) {
            latest.insert(symbol.clone(), *date);
        }
    }
    latest
}

impl MarketStore for MemoryStore {
    fn upsert_prices(&self, prices: &[PricePoint]) -> PersistenceResult<usize> {
        self.check_online()?;
        let mut tables = self.tables.write();
        for p in prices {
            tables.prices.insert((p.symbol.clone(), p.date), p.clone());
        }
        Ok(prices.len())
    }

    fn upsert_dividends(&self, dividends: &[DividendEvent]) -> PersistenceResult<usize> {
        self.check_online()?;
        let mut tables = self.tables.write();
        for d in dividends {
            tables.dividends.insert((d.symbol.clone(), d.ex_date), d.clone());
        }
        Ok(dividends.len())
    }

    fn upsert_symbol(&self, record: &SymbolRecord) -> PersistenceResult<()> {
        self.check_online()?;
        let mut tables = self.tables.write();
        let mut record = record.clone();
        if let Some(existing) = tables.symbols.get(&record.symbol) {
            record.created_at = existing.created_at;
        }
        tables.symbols.insert(record.symbol.clone(), record);
        Ok(())
    }

    fn symbols(&self, symbols: &[String]) -> PersistenceResult<Vec<SymbolRecord>> {
        let tables = self.tables.read();
        Ok(symbols
            .iter()
            .filter_map(|s| tables.symbols.get(s).cloned())
            .collect())
    }

    fn tracked_symbols(&self) -> PersistenceResult<Vec<String>> {
        let tables = self.tables.read();
        Ok(tables
            .symbols
            .keys()
            .filter(|s| !tables.exclusions.contains_key(*s))
            .cloned()
            .collect())
    }

    fn latest_price_dates(&self, symbols: &[String]) -> PersistenceResult<HashMap<String, NaiveDate>> {
        Ok(latest_by_symbol(&self.tables.read().prices, symbols))
    }

    fn latest_dividend_dates(
        &self,
        symbols: &[String],
    ) -> PersistenceResult<HashMap<String, NaiveDate>> {
        Ok(latest_by_symbol(&self.tables.read().dividends, symbols))
    }

    fn prices_for(&self, symbol: &str) -> PersistenceResult<Vec<PricePoint>> {
        let tables = self.tables.read();
        Ok(tables
            .prices
            .values()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    fn dividends_for(&self, symbol: &str) -> PersistenceResult<Vec<DividendEvent>> {
        let tables = self.tables.read();
        Ok(tables
            .dividends
            .values()
            .filter(|d| d.symbol == symbol)
            .cloned()
            .collect())
    }

    fn excluded_symbols(&self) -> PersistenceResult<HashSet<String>> {
        Ok(self.tables.read().exclusions.keys().cloned().collect())
    }

    fn exclusion_reason(&self, symbol: &str) -> PersistenceResult<Option<String>> {
        Ok(self
            .tables
            .read()
            .exclusions
            .get(symbol)
            .map(|row| row.reason.clone()))
    }

    fn record_exclusion(
        &self,
        symbol: &str,
        reason: &str,
        source: ExclusionSource,
    ) -> PersistenceResult<()> {
        self.check_online()?;
        self.tables
            .write()
            .exclusions
            .entry(symbol.to_string())
            .or_insert_with(|| ExclusionRow {
                reason: reason.to_string(),
                source,
            });
        Ok(())
    }

    fn validated_symbols(&self) -> PersistenceResult<HashSet<String>> {
        let tables = self.tables.read();
        let mut validated: HashSet<String> = tables.admissions.keys().cloned().collect();
        validated.extend(
            tables
                .exclusions
                .iter()
                .filter(|(_, row)| row.source == ExclusionSource::Validation)
                .map(|(s, _)| s.clone()),
        );
        Ok(validated)
    }

    fn record_validation(
        &self,
        outcome: &ValidationOutcome,
        record: &SymbolRecord,
    ) -> PersistenceResult<bool> {
        self.check_online()?;
        let mut tables = self.tables.write();
        if tables.admissions.contains_key(&outcome.symbol)
            || tables.exclusions.contains_key(&outcome.symbol)
        {
            return Ok(false);
        }

        if outcome.admitted {
            tables
                .symbols
                .entry(record.symbol.clone())
                .or_insert_with(|| record.clone());
            tables
                .admissions
                .insert(outcome.symbol.clone(), outcome.clone());
        } else {
            tables.exclusions.insert(
                outcome.symbol.clone(),
                ExclusionRow {
                    reason: outcome.reason.clone().unwrap_or_else(|| "rejected".to_string()),
                    source: ExclusionSource::Validation,
                },
            );
        }
        Ok(true)
    }
}
