//! Candidate symbol discovery across providers.

use crate::blocking::with_store;
use crate::error::PipelineResult;
use futures_util::future::join_all;
use mdsync_core::{normalize_symbol, ProviderId, SecurityKind, SymbolRecord};
use mdsync_persistence::MarketStore;
use mdsync_provider::parse::venue_allowed;
use mdsync_provider::HybridFetcher;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// One de-duplicated candidate with every provider that reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredCandidate {
    pub symbol: String,
    pub venue: Option<String>,
    pub kind: SecurityKind,
    pub provenance: Vec<ProviderId>,
}

impl DiscoveredCandidate {
    /// Symbol row written when the candidate is admitted.
    pub fn to_record(&self) -> SymbolRecord {
        let mut record = SymbolRecord::new(self.symbol.clone(), self.venue.clone(), self.kind);
        record.provenance = self.provenance.iter().map(|p| p.as_str().to_string()).collect();
        record
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Candidates still needing validation, sorted by symbol.
    pub candidates: Vec<DiscoveredCandidate>,
    /// Listings returned across all providers before de-duplication.
    pub listed: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub outside_venues: usize,
    /// Candidates dropped because a validation outcome already exists.
    pub already_validated: usize,
    pub providers: Vec<ProviderId>,
}

pub struct SymbolDiscovery {
    fetcher: Arc<HybridFetcher>,
    store: Arc<dyn MarketStore>,
    allowed_venues: Vec<String>,
}

impl SymbolDiscovery {
    pub fn new(
        fetcher: Arc<HybridFetcher>,
        store: Arc<dyn MarketStore>,
        allowed_venues: Vec<String>,
    ) -> Self {
        Self {
            fetcher,
            store,
            allowed_venues,
        }
    }

    /// List candidates from every available discovery provider.
    ///
    /// `limit` bounds each provider's listing and the final candidate set.
    /// Unless `fresh`, symbols with a persisted validation outcome or an
    /// exclusion are dropped.
    pub async fn discover(&self, limit: usize, fresh: bool) -> PipelineResult<DiscoveryReport> {
        let clients = self.fetcher.available(&self.fetcher.order().discovery);
        let listings = join_all(clients.iter().map(|c| c.discover_symbols(limit))).await;

        let mut report = DiscoveryReport {
            providers: clients.iter().map(|c| c.id()).collect(),
            ..Default::default()
        };
        let mut merged: BTreeMap<String, DiscoveredCandidate> = BTreeMap::new();

        // Listings arrive in discovery priority order; the first provider's
        // venue and kind win.
        for (client, listing) in clients.iter().zip(listings) {
            debug!(provider = %client.id(), count = listing.len(), "Discovery listing");
            report.listed += listing.len();
            for found in listing {
                let Some(symbol) = normalize_symbol(&found.symbol) else {
                    report.invalid += 1;
                    continue;
                };
                if !venue_allowed(found.venue.as_deref(), &self.allowed_venues) {
                    report.outside_venues += 1;
                    continue;
                }
                match merged.get_mut(&symbol) {
                    Some(existing) => {
                        report.duplicates += 1;
                        if !existing.provenance.contains(&found.provider) {
                            existing.provenance.push(found.provider);
                        }
                        if existing.venue.is_none() {
                            existing.venue = found.venue;
                        }
                    }
                    None => {
                        merged.insert(
                            symbol.clone(),
                            DiscoveredCandidate {
                                symbol,
                                venue: found.venue,
                                kind: found.kind,
                                provenance: vec![found.provider],
                            },
                        );
                    }
                }
            }
        }

        if !fresh {
            let (validated, excluded) = with_store(&self.store, |s| {
                Ok((s.validated_symbols()?, s.excluded_symbols()?))
            })
            .await?;
            let known: HashSet<String> = validated.into_iter().chain(excluded).collect();
            let before = merged.len();
            merged.retain(|symbol, _| !known.contains(symbol));
            report.already_validated = before - merged.len();
        }

        report.candidates = merged.into_values().take(limit).collect();
        info!(
            providers = report.providers.len(),
            listed = report.listed,
            candidates = report.candidates.len(),
            duplicates = report.duplicates,
            already_validated = report.already_validated,
            "Discovery finished"
        );
        Ok(report)
    }
}
