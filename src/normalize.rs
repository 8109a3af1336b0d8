//! Worker module-resolution normalization
//!
//! A package directory inside the installation prefix can shadow a standard
//! library module of the same name. Every worker is affected the same way, so
//! the fix is a pure path transformation applied locally and then broadcast.
//!
//! Layout the fix relies on:
//!
//! ```text
//! <prefix>/lib/lang3.x/          <- standard library modules
//! <prefix>/lib/lang3.x/site-packages/   <- third-party packages
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Conventional name of the third-party package directory
pub const PACKAGE_DIR_NAME: &str = "site-packages";

/// Variable that caps native math-library thread pools
pub const NATIVE_THREADS_VAR: &str = "OMP_NUM_THREADS";

/// Move the standard-library directory ahead of the first package directory
///
/// Finds the first segment under `exec_prefix` named [`PACKAGE_DIR_NAME`] and
/// inserts its parent directly in front of it. A segment immediately followed
/// by its own package directory is a previously inserted parent, even when
/// its name is also [`PACKAGE_DIR_NAME`], and is not a match. If the parent
/// already appears anywhere earlier, the path is returned unchanged, so
/// `normalize(normalize(p)) == normalize(p)` for every `p`.
#[must_use]
pub fn normalize(search_path: &[PathBuf], exec_prefix: &Path) -> Vec<PathBuf> {
    let mut normalized = search_path.to_vec();

    let Some(index) = (0..search_path.len()).find(|&i| {
        is_package_dir(&search_path[i], exec_prefix) && !is_inserted_parent(search_path, i, exec_prefix)
    }) else {
        return normalized;
    };
    let Some(stdlib) = search_path[index].parent() else {
        return normalized;
    };

    if search_path[..index].iter().any(|segment| segment == stdlib) {
        return normalized;
    }
    normalized.insert(index, stdlib.to_path_buf());
    normalized
}

/// Whether `search_path[index]` sits directly in front of its own package dir
fn is_inserted_parent(search_path: &[PathBuf], index: usize, exec_prefix: &Path) -> bool {
    search_path.get(index + 1).is_some_and(|next| {
        is_package_dir(next, exec_prefix) && next.parent() == Some(search_path[index].as_path())
    })
}

fn is_package_dir(segment: &Path, exec_prefix: &Path) -> bool {
    segment.starts_with(exec_prefix)
        && segment.file_name().is_some_and(|name| name == PACKAGE_DIR_NAME)
}

/// Module environment of one worker process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEnv {
    /// Ordered module search segments
    pub search_path: Vec<PathBuf>,
    /// Installation prefix of the worker's interpreter
    pub exec_prefix: Option<PathBuf>,
    /// Environment variables set for the worker
    pub vars: BTreeMap<String, String>,
}

impl WorkerEnv {
    /// Create a worker environment
    #[must_use]
    pub fn new(search_path: Vec<PathBuf>, exec_prefix: Option<PathBuf>) -> Self {
        Self {
            search_path,
            exec_prefix,
            vars: BTreeMap::new(),
        }
    }

    /// Apply [`normalize`] in place; no-op without an exec prefix
    pub fn normalize(&mut self) {
        if let Some(prefix) = &self.exec_prefix {
            self.search_path = normalize(&self.search_path, prefix);
        }
    }

    /// Keep native math libraries single-threaded; the cluster owns parallelism
    pub fn pin_native_threads(&mut self) {
        self.vars.insert(NATIVE_THREADS_VAR.to_string(), "1".to_string());
    }
}
