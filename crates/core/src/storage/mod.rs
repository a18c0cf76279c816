pub mod lock;

use crate::config::env_parse;
use crate::domain::universe::{normalize_symbol, Universe};
use anyhow::{ensure, Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const CURRENT_RECORD: &str = "current";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Stocks,
    Reports,
    Summaries,
    Universe,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Stocks,
        RecordKind::Reports,
        RecordKind::Summaries,
        RecordKind::Universe,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            RecordKind::Stocks => "stocks",
            RecordKind::Reports => "reports",
            RecordKind::Summaries => "summaries",
            RecordKind::Universe => "universe",
        }
    }

    fn keyed_by_symbol(&self) -> bool {
        matches!(self, RecordKind::Stocks)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A date, plus a symbol for per-stock records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    pub date: NaiveDate,
    pub symbol: Option<String>,
}

impl StoreKey {
    pub fn date(date: NaiveDate) -> Self {
        Self { date, symbol: None }
    }

    pub fn stock(date: NaiveDate, symbol: impl Into<String>) -> Self {
        Self {
            date,
            symbol: Some(symbol.into()),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(s) => write!(f, "{}/{s}", self.date),
            None => write!(f, "{}", self.date),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub retention_days: i64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { retention_days: 365 }
    }
}

impl StoreOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(v) = env_parse::<i64>("RETENTION_DAYS").filter(|v| *v > 0) {
            out.retention_days = v;
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub records: BTreeMap<String, usize>,
    pub total_bytes: u64,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    pub unique_symbols: usize,
}

/// Date-partitioned JSON files under one root directory. Every write goes to a
/// temp file in the target directory and is renamed into place, so readers see
/// either the previous or the new complete record.
#[derive(Debug)]
pub struct TimeSeriesStore {
    root: PathBuf,
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl TimeSeriesStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in RecordKind::ALL {
            let dir = root.join(kind.dir_name());
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create store directory {}", dir.display()))?;
        }
        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, kind: RecordKind, key: &StoreKey) -> Result<PathBuf> {
        let dir = self.root.join(kind.dir_name());
        let date = key.date.format(DATE_FORMAT).to_string();
        match (&key.symbol, kind.keyed_by_symbol()) {
            (Some(symbol), true) => {
                ensure!(
                    normalize_symbol(symbol).as_deref() == Some(symbol.as_str()),
                    "invalid symbol in store key: {symbol:?}"
                );
                Ok(dir.join(date).join(format!("{symbol}.json")))
            }
            (None, false) => Ok(dir.join(format!("{date}.json"))),
            (None, true) => anyhow::bail!("{kind} records are keyed by date and symbol"),
            (Some(_), false) => anyhow::bail!("{kind} records are keyed by date only"),
        }
    }

    async fn write_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the path's entry once no other writer holds or waits on it. Clones
    /// are only handed out under the map lock, so the count cannot race.
    async fn release_write_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.write_locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }

    async fn locked_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let lock = self.write_lock(path).await;
        let result = {
            let _guard = lock.lock().await;
            write_atomic(path, bytes).await
        };
        self.release_write_lock(path, lock).await;
        result
    }

    pub async fn put<T: Serialize + ?Sized>(
        &self,
        kind: RecordKind,
        key: &StoreKey,
        value: &T,
    ) -> Result<()> {
        let path = self.path_for(kind, key)?;
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("failed to serialize {kind} record {key}"))?;

        self.locked_write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write {kind} record {key}"))
    }

    /// `Ok(None)` when the record does not exist.
    pub async fn get<T: DeserializeOwned>(&self, kind: RecordKind, key: &StoreKey) -> Result<Option<T>> {
        let path = self.path_for(kind, key)?;
        read_json(&path)
            .await
            .with_context(|| format!("failed to read {kind} record {key}"))
    }

    /// All keys of a kind, in date order (symbol order within a date).
    pub async fn keys(&self, kind: RecordKind) -> Result<Vec<StoreKey>> {
        let dir = self.root.join(kind.dir_name());
        let mut out = Vec::new();
        for (name, is_dir) in list_dir(&dir).await? {
            if kind.keyed_by_symbol() {
                let Some(date) = is_dir.then(|| parse_date(&name)).flatten() else {
                    continue;
                };
                for (file, is_dir) in list_dir(&dir.join(&name)).await? {
                    if is_dir {
                        continue;
                    }
                    if let Some(symbol) = record_stem(&file).filter(|s| normalize_symbol(s).as_deref() == Some(*s)) {
                        out.push(StoreKey::stock(date, symbol));
                    }
                }
            } else if !is_dir {
                if let Some(date) = record_stem(&name).and_then(parse_date) {
                    out.push(StoreKey::date(date));
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub async fn keys_in_range(
        &self,
        kind: RecordKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<StoreKey>> {
        let keys = self.keys(kind).await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.date >= start && k.date <= end)
            .collect())
    }

    pub async fn latest(&self, kind: RecordKind) -> Result<Option<StoreKey>> {
        Ok(self.keys(kind).await?.pop())
    }

    /// Records with `start <= date <= end`, in key order.
    pub async fn range<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for key in self.keys_in_range(kind, start, end).await? {
            // A key can vanish between listing and reading under a concurrent prune.
            if let Some(v) = self.get(kind, &key).await? {
                out.push(v);
            }
        }
        Ok(out)
    }

    pub async fn put_current_universe(&self, universe: &Universe) -> Result<()> {
        let path = self.current_universe_path();
        let bytes = serde_json::to_vec_pretty(universe).context("failed to serialize universe")?;
        self.locked_write(&path, &bytes)
            .await
            .context("failed to write current universe")
    }

    pub async fn current_universe(&self) -> Result<Option<Universe>> {
        read_json(&self.current_universe_path())
            .await
            .context("failed to read current universe")
    }

    fn current_universe_path(&self) -> PathBuf {
        self.root
            .join(RecordKind::Universe.dir_name())
            .join(format!("{CURRENT_RECORD}.json"))
    }

    /// Deletes records dated strictly before `cutoff`. Returns how many were removed.
    pub async fn prune_older_than(&self, kind: RecordKind, cutoff: NaiveDate) -> Result<usize> {
        let mut removed = 0;
        for key in self.keys(kind).await?.into_iter().filter(|k| k.date < cutoff) {
            let path = self.path_for(kind, &key)?;
            let lock = self.write_lock(&path).await;
            let result = {
                let _guard = lock.lock().await;
                tokio::fs::remove_file(&path).await
            };
            self.release_write_lock(&path, lock).await;
            match result {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to remove {}", path.display()))
                }
            }
        }

        if kind.keyed_by_symbol() {
            // Drop date directories that are now empty.
            let dir = self.root.join(kind.dir_name());
            for (name, is_dir) in list_dir(&dir).await? {
                if is_dir && parse_date(&name).is_some_and(|d| d < cutoff) {
                    let _ = tokio::fs::remove_dir(dir.join(&name)).await;
                }
            }
        }

        tracing::info!(%kind, %cutoff, removed, "pruned old records");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        let mut dates = BTreeSet::new();
        let mut symbols = BTreeSet::new();

        for kind in RecordKind::ALL {
            let keys = self.keys(kind).await?;
            for key in &keys {
                if let Ok(meta) = tokio::fs::metadata(self.path_for(kind, key)?).await {
                    stats.total_bytes += meta.len();
                }
                dates.insert(key.date);
                if let Some(s) = &key.symbol {
                    symbols.insert(s.clone());
                }
            }
            stats.records.insert(kind.dir_name().to_string(), keys.len());
        }

        stats.earliest_date = dates.first().copied();
        stats.latest_date = dates.last().copied();
        stats.unique_symbols = symbols.len();
        Ok(stats)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().context("record path has no parent directory")?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("record path has no file name")?;
    // Leading dot keeps in-flight temp files out of key listings.
    let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let result = async {
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(bytes).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    sync_dir(dir).await
}

/// Persists the rename itself. Directories cannot be opened for sync on Windows.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    tokio::fs::File::open(dir)
        .await?
        .sync_all()
        .await
        .with_context(|| format!("failed to sync directory {}", dir.display()))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice::<T>(&bytes)
        .with_context(|| format!("corrupt record at {}", path.display()))?;
    Ok(Some(value))
}

/// `(name, is_dir)` for each entry; a missing directory lists as empty.
async fn list_dir(dir: &Path) -> Result<Vec<(String, bool)>> {
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("failed to list {}", dir.display())),
    };
    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await?.is_dir();
        out.push((name, is_dir));
    }
    Ok(out)
}

fn record_stem(file_name: &str) -> Option<&str> {
    if file_name.starts_with('.') {
        return None;
    }
    file_name.strip_suffix(".json")
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Category;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        v: u32,
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    #[tokio::test]
    async fn write_locks_are_released_after_each_write() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(TimeSeriesStore::open(tmp.path()).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for v in 0..16u32 {
            let store = store.clone();
            tasks.spawn(async move {
                let key = StoreKey::stock(d(1 + v % 4), "AAPL");
                store.put(RecordKind::Stocks, &key, &Rec { v }).await
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }

        assert!(store.write_locks.lock().await.is_empty());
        assert_eq!(store.keys(RecordKind::Stocks).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn put_then_put_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(tmp.path()).await.unwrap();
        let key = StoreKey::date(d(29));

        store.put(RecordKind::Reports, &key, &Rec { v: 1 }).await.unwrap();
        store.put(RecordKind::Reports, &key, &Rec { v: 2 }).await.unwrap();
        let got: Option<Rec> = store.get(RecordKind::Reports, &key).await.unwrap();
        assert_eq!(got, Some(Rec { v: 2 }));

        // No temp files left behind.
        let names: Vec<_> = std::fs::read_dir(tmp.path().join("reports"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["2025-07-29.json".to_string()]);
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(tmp.path()).await.unwrap();
        let got: Option<Rec> = store.get(RecordKind::Reports, &StoreKey::date(d(1))).await.unwrap();
        assert!(got.is_none());
        assert!(store.latest(RecordKind::Reports).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn range_and_latest_follow_date_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(tmp.path()).await.unwrap();
        for (day, sym, v) in [(29, "MSFT", 3), (28, "AAPL", 1), (29, "AAPL", 2)] {
            store
                .put(RecordKind::Stocks, &StoreKey::stock(d(day), sym), &Rec { v })
                .await
                .unwrap();
        }
        // Stray temp and foreign files are ignored.
        std::fs::write(tmp.path().join("stocks/2025-07-29/.MSFT.json.abc.tmp"), b"{").unwrap();
        std::fs::write(tmp.path().join("stocks/2025-07-29/notes.txt"), b"x").unwrap();

        let all: Vec<Rec> = store.range(RecordKind::Stocks, d(1), d(31)).await.unwrap();
        assert_eq!(all, vec![Rec { v: 1 }, Rec { v: 2 }, Rec { v: 3 }]);
        let only_29: Vec<Rec> = store.range(RecordKind::Stocks, d(29), d(29)).await.unwrap();
        assert_eq!(only_29.len(), 2);
        assert_eq!(
            store.latest(RecordKind::Stocks).await.unwrap(),
            Some(StoreKey::stock(d(29), "MSFT"))
        );
    }

    #[tokio::test]
    async fn rejects_malformed_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(tmp.path()).await.unwrap();
        let r = Rec { v: 1 };
        assert!(store.put(RecordKind::Stocks, &StoreKey::date(d(1)), &r).await.is_err());
        assert!(store
            .put(RecordKind::Reports, &StoreKey::stock(d(1), "AAPL"), &r)
            .await
            .is_err());
        assert!(store
            .put(RecordKind::Stocks, &StoreKey::stock(d(1), "../x"), &r)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(tmp.path()).await.unwrap();
        std::fs::write(tmp.path().join("reports/2025-07-29.json"), b"{not json").unwrap();
        let got = store.get::<Rec>(RecordKind::Reports, &StoreKey::date(d(29))).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_complete_record() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(TimeSeriesStore::open(tmp.path()).await.unwrap());
        let key = StoreKey::date(d(29));

        let mut set = tokio::task::JoinSet::new();
        for v in 0..16 {
            let store = store.clone();
            let key = key.clone();
            set.spawn(async move { store.put(RecordKind::Reports, &key, &Rec { v }).await });
        }
        while let Some(res) = set.join_next().await {
            res.unwrap().unwrap();
        }
        let got: Rec = store.get(RecordKind::Reports, &key).await.unwrap().unwrap();
        assert!(got.v < 16);
    }

    #[tokio::test]
    async fn prune_and_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(tmp.path()).await.unwrap();
        for day in [1, 15, 29] {
            store
                .put(RecordKind::Stocks, &StoreKey::stock(d(day), "AAPL"), &Rec { v: day })
                .await
                .unwrap();
            store
                .put(RecordKind::Reports, &StoreKey::date(d(day)), &Rec { v: day })
                .await
                .unwrap();
        }
        store
            .put_current_universe(&Universe {
                date: d(29),
                stable: vec!["AAPL".into()],
                risky: vec![],
                sources: vec![],
            })
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.records["stocks"], 3);
        assert_eq!(stats.records["universe"], 0);
        assert_eq!(stats.earliest_date, Some(d(1)));
        assert_eq!(stats.unique_symbols, 1);

        assert_eq!(store.prune_older_than(RecordKind::Stocks, d(15)).await.unwrap(), 1);
        assert!(!tmp.path().join("stocks/2025-07-01").exists());
        assert_eq!(store.keys(RecordKind::Stocks).await.unwrap().len(), 2);
        assert_eq!(store.keys(RecordKind::Reports).await.unwrap().len(), 3);

        let current = store.current_universe().await.unwrap().unwrap();
        assert_eq!(current.category_of("AAPL"), Some(Category::Stable));
    }
}
