use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::store::StoreSession;
use crate::types::{GeoType, Result, StoreError, TimeType};

const LIST_PAIRS: &str = "
SELECT source, signal FROM signal_latest_v
GROUP BY source, signal
ORDER BY source ASC, signal ASC";

// SQLite has no STD(); population variance is the mean squared deviation
// from the group mean.
const SUMMARIZE_PAIR: &str = "
WITH pair AS (
    SELECT * FROM signal_latest_v WHERE source = ?1 AND signal = ?2
),
means AS (
    SELECT time_type, geo_type, AVG(value) AS mean FROM pair GROUP BY time_type, geo_type
)
SELECT
    p.time_type,
    p.geo_type,
    MIN(p.time_value),
    MAX(p.time_value),
    COUNT(DISTINCT p.geo_value),
    MIN(p.value),
    MAX(p.value),
    MAX(m.mean),
    AVG((p.value - m.mean) * (p.value - m.mean)),
    MAX(p.value_updated_timestamp),
    MAX(p.issue),
    MIN(p.lag),
    MAX(p.lag)
FROM pair p
    JOIN means m ON m.time_type = p.time_type AND m.geo_type = p.geo_type
GROUP BY p.time_type, p.geo_type
ORDER BY p.time_type ASC, p.geo_type ASC";

/// Statistics for one `(source, signal, time_type, geo_type)` group of the
/// latest projection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataSummary {
    /// Data source id.
    #[serde(rename = "data_source")]
    pub source: String,
    /// Signal id.
    pub signal: String,
    /// Time resolution of the group.
    pub time_type: TimeType,
    /// Geography kind of the group.
    pub geo_type: GeoType,
    /// Earliest `time_value`.
    pub min_time: i64,
    /// Latest `time_value`.
    pub max_time: i64,
    /// Distinct `geo_value`s.
    pub num_locations: u64,
    /// Smallest non-null value.
    pub min_value: Option<f64>,
    /// Largest non-null value.
    pub max_value: Option<f64>,
    /// Mean of non-null values, 7 decimals.
    pub mean_value: Option<f64>,
    /// Population standard deviation of non-null values, 7 decimals.
    pub stdev_value: Option<f64>,
    /// Newest `value_updated_timestamp`.
    pub last_update: i64,
    /// Newest issue.
    pub max_issue: i64,
    /// Smallest lag.
    pub min_lag: i64,
    /// Largest lag.
    pub max_lag: i64,
}

impl MetadataSummary {
    /// Lookup key of this summary.
    pub fn meta_key(&self) -> MetaKey {
        MetaKey {
            source: self.source.clone(),
            signal: self.signal.clone(),
            time_type: self.time_type,
            geo_type: self.geo_type,
        }
    }

    fn sort_key(&self) -> (&str, &str, &'static str, &'static str) {
        (
            &self.source,
            &self.signal,
            self.time_type.as_str(),
            self.geo_type.as_str(),
        )
    }
}

/// Identifies one metadata group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaKey {
    /// Data source id.
    pub source: String,
    /// Signal id.
    pub signal: String,
    /// Time resolution.
    pub time_type: TimeType,
    /// Geography kind.
    pub geo_type: GeoType,
}

/// Tuning for [`aggregate`].
#[derive(Clone, Debug, Default)]
pub struct AggregateOptions {
    /// Worker threads; `None` or zero uses [`default_worker_count`].
    pub workers: Option<usize>,
}

impl AggregateOptions {
    /// Worker count this run will use before capping at the pair count.
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(default_worker_count)
    }
}

/// Nine tenths of the available cores, at least one.
pub fn default_worker_count() -> usize {
    let cores = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 9 / 10).max(1)
}

struct WorkQueue {
    pairs: Mutex<VecDeque<(String, String)>>,
    results: Mutex<Vec<MetadataSummary>>,
    abort: AtomicBool,
}

/// Summarizes the latest projection per `(source, signal, time_type, geo_type)`.
///
/// Pairs are enumerated once and pulled by a pool of workers, each reading
/// through its own [`fork`](StoreSession::fork) of `session`. The output is sorted by source, signal, time
/// type and geo type, so it does not depend on the worker count.
///
/// # Errors
///
/// The first failing pair stops the run: workers stop taking new pairs and
/// [`StoreError::Aggregation`] names the pair. A worker panic surfaces as
/// [`StoreError::WorkerPanicked`].
pub fn aggregate(session: &StoreSession, opts: &AggregateOptions) -> Result<Vec<MetadataSummary>> {
    let start = Instant::now();
    let pairs = list_pairs(session.conn())?;
    if pairs.is_empty() {
        info!("meta.aggregate.empty");
        return Ok(Vec::new());
    }
    let pair_count = pairs.len();
    let workers = opts.worker_count().min(pair_count);
    let sessions = (0..workers)
        .map(|_| session.fork())
        .collect::<Result<Vec<_>>>()
        .inspect_err(|err| error!(error = %err, "meta.worker.open_failed"))?;
    let queue = WorkQueue {
        pairs: Mutex::new(VecDeque::from(pairs)),
        results: Mutex::new(Vec::new()),
        abort: AtomicBool::new(false),
    };
    info!(workers, pairs = pair_count, "meta.aggregate.started");

    thread::scope(|scope| -> Result<()> {
        let queue = &queue;
        let mut handles = Vec::with_capacity(workers);
        for (n, worker_session) in sessions.into_iter().enumerate() {
            let name = format!("meta-worker-{n}");
            let worker_name = name.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn_scoped(scope, move || run_worker(queue, worker_session, &worker_name))?;
            handles.push((name, handle));
        }
        let mut first_error = None;
        for (name, handle) in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(StoreError::WorkerPanicked(name)));
            if let Err(err) = outcome {
                queue.abort.store(true, Ordering::Release);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    })?;

    let mut summaries = queue.results.into_inner();
    summaries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    info!(
        workers,
        pairs = pair_count,
        groups = summaries.len(),
        duration_ms = start.elapsed().as_secs_f64() * 1_000.0,
        "meta.aggregate.completed"
    );
    Ok(summaries)
}

fn run_worker(queue: &WorkQueue, session: StoreSession, name: &str) -> Result<()> {
    debug!(worker = name, "meta.worker.started");
    let mut handled = 0usize;
    while !queue.abort.load(Ordering::Acquire) {
        let Some((source, signal)) = queue.pairs.lock().pop_front() else {
            break;
        };
        debug!(worker = name, source = %source, signal = %signal, "meta.worker.pair");
        match summarize_pair(session.conn(), &source, &signal) {
            Ok(rows) => queue.results.lock().extend(rows),
            Err(err) => {
                queue.abort.store(true, Ordering::Release);
                error!(
                    worker = name,
                    source = %source,
                    signal = %signal,
                    error = %err,
                    "meta.worker.pair_failed"
                );
                return Err(StoreError::Aggregation {
                    source_name: source,
                    signal,
                    error: Box::new(err),
                });
            }
        }
        handled += 1;
    }
    debug!(worker = name, pairs = handled, "meta.worker.finished");
    Ok(())
}

fn list_pairs(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(LIST_PAIRS)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn summarize_pair(conn: &Connection, source: &str, signal: &str) -> Result<Vec<MetadataSummary>> {
    let mut stmt = conn.prepare_cached(SUMMARIZE_PAIR)?;
    let rows = stmt.query_map(params![source, signal], |row| {
        let variance: Option<f64> = row.get(8)?;
        Ok(MetadataSummary {
            source: source.to_string(),
            signal: signal.to_string(),
            time_type: row.get(0)?,
            geo_type: row.get(1)?,
            min_time: row.get(2)?,
            max_time: row.get(3)?,
            num_locations: row.get::<_, i64>(4)? as u64,
            min_value: row.get(5)?,
            max_value: row.get(6)?,
            mean_value: row.get::<_, Option<f64>>(7)?.map(round7),
            stdev_value: variance.map(|v| round7(v.max(0.0).sqrt())),
            last_update: row.get(9)?,
            max_issue: row.get(10)?,
            min_lag: row.get(11)?,
            max_lag: row.get(12)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn round7(x: f64) -> f64 {
    (x * 1e7).round() / 1e7
}
