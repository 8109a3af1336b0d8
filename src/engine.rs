//! Execution engine registry
//!
//! Resolves the configured engine name into an [`EngineIdentity`]. Names are
//! matched case-sensitively; anything else is a fatal configuration error so
//! that no bootstrap work starts with a misspelled engine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which backend runs the runtime's parallel work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineIdentity {
    /// Single-process execution, no cluster (`Python`)
    NoCluster,
    /// Ray-style cluster with a shared object store (`Ray`)
    RayLikeCluster,
    /// Dask-style cluster (`Dask`, experimental)
    DaskLikeCluster,
}

impl EngineIdentity {
    /// All recognized identities, in registry order
    pub const ALL: [Self; 3] = [Self::NoCluster, Self::RayLikeCluster, Self::DaskLikeCluster];

    /// Resolve a raw configuration value
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] naming the value if it is not one of
    /// `Python`, `Ray` or `Dask`.
    pub fn resolve(raw: &str) -> Result<Self> {
        match raw {
            "Python" => Ok(Self::NoCluster),
            "Ray" => Ok(Self::RayLikeCluster),
            "Dask" => Ok(Self::DaskLikeCluster),
            other => Err(Error::Configuration(format!(
                "Unrecognized execution engine: {other:?} (expected one of \"Python\", \"Ray\", \"Dask\")"
            ))),
        }
    }

    /// Configuration name of this engine
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoCluster => "Python",
            Self::RayLikeCluster => "Ray",
            Self::DaskLikeCluster => "Dask",
        }
    }

    /// Whether this engine needs a worker pool brought online
    #[must_use]
    pub const fn requires_cluster(self) -> bool {
        !matches!(self, Self::NoCluster)
    }
}

impl fmt::Display for EngineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}
