//! Lookup tables used by the `MAP` directive.
//!
//! A table file has two columns, `id,key`, and no header row. Keys are
//! indexed lower-cased so resolution is case-insensitive. The
//! [`LookupCache`] loads each distinct path once per run; concurrent first
//! loads of the same path wait on a per-path slot instead of reading the
//! file twice.

use std::{
    collections::HashMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::debug;

use crate::{
    error::{RemapError, Result},
    io_utils,
};

#[derive(Debug, Default)]
pub struct LookupTable {
    index: HashMap<String, String>,
}

impl LookupTable {
    pub fn load(path: &Path) -> Result<Self> {
        let table_error = |reason: String| RemapError::TableLoad {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|err| table_error(err.to_string()))?;
        let mut reader = io_utils::open_csv_reader(BufReader::new(file), b',', false);
        let mut pairs = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|err| table_error(err.to_string()))?;
            match (record.get(0), record.get(1)) {
                (Some(id), Some(key)) => pairs.push((id.to_string(), key.to_string())),
                _ => {
                    return Err(table_error(format!(
                        "line {} has fewer than two columns",
                        line + 1
                    )));
                }
            }
        }
        Ok(Self::from_pairs(pairs))
    }

    /// Builds an index from `(id, key)` pairs. A repeated key keeps the last id.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let index = pairs
            .into_iter()
            .map(|(id, key)| (key.into().to_lowercase(), id.into()))
            .collect();
        LookupTable { index }
    }

    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.index.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

type Slot = Arc<Mutex<Option<Arc<LookupTable>>>>;

#[derive(Debug, Default)]
pub struct LookupCache {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    loads: AtomicUsize,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, path: &Path) -> Result<Arc<LookupTable>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(path.to_path_buf()).or_default())
        };
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = entry.as_ref() {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(LookupTable::load(path)?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!("Loaded lookup table {:?} with {} key(s)", path, table.len());
        *entry = Some(Arc::clone(&table));
        Ok(table)
    }

    pub fn preload<'a, I>(&self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut count = 0;
        for path in paths {
            self.get_or_load(path)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of table files actually read from disk.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}
