//! Composable session queries.
//!
//! A [`Query`] holds two ordered chains: filters that select records and
//! extractors that consume the selected ones. Executing the query drives a
//! single scan of a [`SessionStorage`]; every record that passes all filters
//! is handed to every extractor in registration order.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::QueryError;
use crate::store::SessionStorage;
use crate::types::{Direction, Identity, SessionHistory, Stats};

/// A predicate over a single session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    DirectionEquals(Direction),
    ConsumerEquals(Identity),
    ProviderEquals(Identity),
    /// Inclusive lower bound on the start timestamp.
    StartedAfter(DateTime<Utc>),
    /// Inclusive upper bound on the start timestamp.
    StartedBefore(DateTime<Utc>),
    /// Exclusive upper bound on the start timestamp.
    StartedUntil(DateTime<Utc>),
}

impl Filter {
    pub fn matches(&self, session: &SessionHistory) -> bool {
        match self {
            Filter::DirectionEquals(direction) => session.direction == *direction,
            Filter::ConsumerEquals(consumer) => session.consumer_id == *consumer,
            Filter::ProviderEquals(provider) => session.provider_id == *provider,
            Filter::StartedAfter(after) => session.started >= *after,
            Filter::StartedBefore(before) => session.started <= *before,
            Filter::StartedUntil(until) => session.started < *until,
        }
    }
}

/// A visitor that consumes selected records into its own destination.
#[derive(Debug)]
enum Extractor {
    SessionCollector(Vec<SessionHistory>),
    StatsAggregator(Stats),
}

impl Extractor {
    fn visit(&mut self, session: &SessionHistory) {
        match self {
            Extractor::SessionCollector(sessions) => sessions.push(session.clone()),
            Extractor::StatsAggregator(stats) => stats.add(session),
        }
    }

    fn reset(&mut self) {
        match self {
            Extractor::SessionCollector(sessions) => *sessions = Vec::new(),
            Extractor::StatsAggregator(stats) => *stats = Stats::default(),
        }
    }
}

/// Owned outputs of an executed query.
#[derive(Debug, Default)]
pub struct QueryResults {
    pub sessions: Option<Vec<SessionHistory>>,
    pub stats: Option<Stats>,
}

/// Builder for a single-pass session query.
///
/// ```ignore
/// let mut query = Query::new();
/// query
///     .filter_direction(Direction::Export)
///     .collect_sessions()
///     .collect_stats();
/// query.execute(&db)?;
/// ```
#[derive(Debug, Default)]
pub struct Query {
    filters: Vec<Filter>,
    extractors: Vec<Extractor>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate to the filter chain.
    pub fn filter(&mut self, filter: Filter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_direction(&mut self, direction: Direction) -> &mut Self {
        self.filter(Filter::DirectionEquals(direction))
    }

    pub fn filter_consumer(&mut self, consumer: Identity) -> &mut Self {
        self.filter(Filter::ConsumerEquals(consumer))
    }

    pub fn filter_provider(&mut self, provider: Identity) -> &mut Self {
        self.filter(Filter::ProviderEquals(provider))
    }

    pub fn filter_started_after(&mut self, after: DateTime<Utc>) -> &mut Self {
        self.filter(Filter::StartedAfter(after))
    }

    pub fn filter_started_before(&mut self, before: DateTime<Utc>) -> &mut Self {
        self.filter(Filter::StartedBefore(before))
    }

    pub fn filter_started_until(&mut self, until: DateTime<Utc>) -> &mut Self {
        self.filter(Filter::StartedUntil(until))
    }

    /// Collect matching sessions, in scan order, into a fresh list.
    ///
    /// Registering again replaces the previous list.
    pub fn collect_sessions(&mut self) -> &mut Self {
        self.register(Extractor::SessionCollector(Vec::new()))
    }

    /// Aggregate matching sessions into a fresh, zeroed [`Stats`].
    ///
    /// Registering again replaces the previous destination; the replaced one
    /// is dropped and never receives updates.
    pub fn collect_stats(&mut self) -> &mut Self {
        self.register(Extractor::StatsAggregator(Stats::default()))
    }

    /// True when every filter accepts the session. An empty chain accepts all.
    pub fn matches_all(&self, session: &SessionHistory) -> bool {
        self.filters.iter().all(|f| f.matches(session))
    }

    /// Collected sessions, if a collector was registered.
    pub fn sessions(&self) -> Option<&[SessionHistory]> {
        self.extractors.iter().find_map(|e| match e {
            Extractor::SessionCollector(sessions) => Some(sessions.as_slice()),
            _ => None,
        })
    }

    /// Aggregated stats, if an aggregator was registered.
    pub fn stats(&self) -> Option<&Stats> {
        self.extractors.iter().find_map(|e| match e {
            Extractor::StatsAggregator(stats) => Some(stats),
            _ => None,
        })
    }

    /// Consume the query, handing back its outputs.
    pub fn into_results(self) -> QueryResults {
        let mut results = QueryResults::default();
        for extractor in self.extractors {
            match extractor {
                Extractor::SessionCollector(sessions) => results.sessions = Some(sessions),
                Extractor::StatsAggregator(stats) => results.stats = Some(stats),
            }
        }
        results
    }

    /// Run the query with one full scan of `store`.
    ///
    /// Each execution starts from empty destinations. If the scan fails the
    /// destinations are reset again, so a failed execution never exposes
    /// partial results.
    pub fn execute(&mut self, store: &dyn SessionStorage) -> Result<(), QueryError> {
        self.run(store, None)
    }

    /// Like [`Query::execute`], but aborts with [`QueryError::Cancelled`]
    /// once `cancel` is set. The flag is checked before each record.
    pub fn execute_until(
        &mut self,
        store: &dyn SessionStorage,
        cancel: &AtomicBool,
    ) -> Result<(), QueryError> {
        self.run(store, Some(cancel))
    }

    fn register(&mut self, extractor: Extractor) -> &mut Self {
        let slot = self
            .extractors
            .iter_mut()
            .find(|e| std::mem::discriminant(&**e) == std::mem::discriminant(&extractor));

        match slot {
            Some(existing) => *existing = extractor,
            None => self.extractors.push(extractor),
        }
        self
    }

    fn run(
        &mut self,
        store: &dyn SessionStorage,
        cancel: Option<&AtomicBool>,
    ) -> Result<(), QueryError> {
        self.reset_outputs();

        let filters = &self.filters;
        let extractors = &mut self.extractors;
        let mut scanned = 0usize;
        let mut matched = 0usize;
        let mut cancelled = false;

        let scan = store.scan(&mut |session: SessionHistory| {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                cancelled = true;
                return ControlFlow::Break(());
            }

            scanned += 1;
            if filters.iter().all(|f| f.matches(&session)) {
                matched += 1;
                for extractor in extractors.iter_mut() {
                    extractor.visit(&session);
                }
            }
            ControlFlow::Continue(())
        });

        let outcome = match scan {
            Err(e) => Err(QueryError::from(e)),
            Ok(()) if cancelled => Err(QueryError::Cancelled),
            Ok(()) => Ok(()),
        };

        match &outcome {
            Ok(()) => debug!(
                scanned,
                matched,
                filters = self.filters.len(),
                "Session query executed"
            ),
            Err(e) => {
                debug!(scanned, error = %e, "Session query aborted, discarding outputs");
                self.reset_outputs();
            }
        }

        outcome
    }

    fn reset_outputs(&mut self) {
        for extractor in &mut self.extractors {
            extractor.reset();
        }
    }
}
