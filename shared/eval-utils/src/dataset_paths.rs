use std::{
    collections::BTreeMap,
    error::Error as StdError,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{get_cluster, CLUSTER};

/// Points at a TOML file that replaces the built-in dataset table.
pub const DATASET_PATHS_ENV: &str = "INTPHYS_DATASET_PATHS";

const VALIDATION_SUFFIX: &str = "_val";

// placeholders until the release locations are known
const BUILTIN_DATASETS: [(&str, &str); 3] = [
    ("IntPhys2-debug", "PATH_TO_DEBUG"),
    ("IntPhys2-main", "PATH_TO_MAIN"),
    ("IntPhys2-heldout", "PATH_TO_HELDOUT"),
];

/// Why the process-wide registry failed to load. Shared, since the failure is cached.
pub type RegistryLoadError = Arc<dyn StdError + Send + Sync>;

#[derive(Error, Debug)]
pub enum DatasetPathError {
    #[error("No data paths for environment {0}!")]
    NoPathsForCluster(String),

    #[error("Could not find dataset {dataset} for cluster {cluster}")]
    DatasetNotFound { dataset: String, cluster: String },

    #[error("failed to load dataset registry: {0}")]
    Registry(#[source] RegistryLoadError),
}

/// Dataset locations, keyed by cluster and then by dataset name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRegistry {
    #[serde(default)]
    clusters: BTreeMap<String, BTreeMap<String, String>>,
}

impl DatasetRegistry {
    pub fn builtin() -> Self {
        let datasets = BUILTIN_DATASETS
            .iter()
            .map(|(name, path)| (name.to_string(), path.to_string()))
            .collect();
        Self {
            clusters: BTreeMap::from([(CLUSTER.to_owned(), datasets)]),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dataset paths file {path:?}"))?;
        let registry = Self::from_toml_str(&contents)
            .with_context(|| format!("failed to parse dataset paths file {path:?}"))?;
        debug!(path = ?path, clusters = registry.clusters.len(), "loaded dataset paths");
        Ok(registry)
    }

    /// The table named by [`DATASET_PATHS_ENV`], or the built-in one if it isn't set.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var_os(DATASET_PATHS_ENV) {
            Some(path) => Self::from_file(&PathBuf::from(path)),
            None => Ok(Self::builtin()),
        }
    }

    pub fn has_cluster(&self, cluster: &str) -> bool {
        self.clusters.contains_key(cluster)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    pub fn dataset_path(&self, dataset: &str, cluster: &str) -> Result<&str, DatasetPathError> {
        let datasets = self
            .clusters
            .get(cluster)
            .ok_or_else(|| DatasetPathError::NoPathsForCluster(cluster.to_owned()))?;
        datasets
            .get(dataset)
            .map(String::as_str)
            .ok_or_else(|| DatasetPathError::DatasetNotFound {
                dataset: dataset.to_owned(),
                cluster: cluster.to_owned(),
            })
    }

    /// Paths for `datasets` on `cluster`, in order.
    ///
    /// Validation splits live under the dataset name suffixed with `_val`.
    pub fn dataset_paths<S: AsRef<str>>(
        &self,
        datasets: &[S],
        is_train: bool,
        cluster: &str,
    ) -> Result<Vec<String>, DatasetPathError> {
        if !self.has_cluster(cluster) {
            return Err(DatasetPathError::NoPathsForCluster(cluster.to_owned()));
        }
        let paths = datasets
            .iter()
            .map(|dataset| {
                let dataset = match is_train {
                    true => dataset.as_ref().to_owned(),
                    false => format!("{}{VALIDATION_SUFFIX}", dataset.as_ref()),
                };
                self.dataset_path(&dataset, cluster)
                    .map(str::to_owned)
                    .map_err(|_| DatasetPathError::DatasetNotFound {
                        dataset,
                        cluster: cluster.to_owned(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("Datapaths {paths:?}");
        Ok(paths)
    }
}

fn registry() -> Result<&'static DatasetRegistry, DatasetPathError> {
    static REGISTRY: OnceLock<Result<DatasetRegistry, RegistryLoadError>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| {
            DatasetRegistry::from_env()
                .map_err(|err| Box::<dyn StdError + Send + Sync>::from(err).into())
        })
        .as_ref()
        .map_err(|err| DatasetPathError::Registry(err.clone()))
}

/// Path of `dataset` on `cluster`, or on the current cluster if none is given.
pub fn get_dataset_path(dataset: &str, cluster: Option<&str>) -> Result<String, DatasetPathError> {
    let cluster = match cluster {
        Some(cluster) => cluster,
        None => get_cluster(),
    };
    registry()?
        .dataset_path(dataset, cluster)
        .map(str::to_owned)
}

pub fn get_dataset_paths<S: AsRef<str>>(
    datasets: &[S],
    is_train: bool,
) -> Result<Vec<String>, DatasetPathError> {
    registry()?.dataset_paths(datasets, is_train, get_cluster())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_paths() {
        let registry = DatasetRegistry::builtin();
        assert!(registry.has_cluster(CLUSTER));
        assert_eq!(
            registry.dataset_path("IntPhys2-main", CLUSTER).unwrap(),
            "PATH_TO_MAIN"
        );
        assert_eq!(
            registry
                .dataset_paths(&["IntPhys2-debug", "IntPhys2-heldout"], true, CLUSTER)
                .unwrap(),
            vec!["PATH_TO_DEBUG", "PATH_TO_HELDOUT"]
        );
    }

    #[test]
    fn test_unknown_cluster() {
        let registry = DatasetRegistry::builtin();
        let err = registry
            .dataset_paths(&["IntPhys2-main"], true, "elsewhere")
            .unwrap_err();
        assert!(matches!(err, DatasetPathError::NoPathsForCluster(ref c) if c == "elsewhere"));
        assert_eq!(err.to_string(), "No data paths for environment elsewhere!");
    }

    #[test]
    fn test_validation_split_uses_suffixed_name() {
        let registry = DatasetRegistry::builtin();
        let err = registry
            .dataset_paths(&["IntPhys2-main"], false, CLUSTER)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find dataset IntPhys2-main_val for cluster cluster"
        );
    }

    #[test]
    fn test_missing_dataset() {
        let registry = DatasetRegistry::builtin();
        assert!(matches!(
            registry.dataset_path("IntPhys3", CLUSTER),
            Err(DatasetPathError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn test_parse_toml() {
        let registry = DatasetRegistry::from_toml_str(
            r#"
            [clusters.cluster]
            "IntPhys2-main" = "/data/main"
            "IntPhys2-main_val" = "/data/main_val"
            "#,
        )
        .unwrap();
        assert_eq!(
            registry
                .dataset_paths(&["IntPhys2-main"], false, CLUSTER)
                .unwrap(),
            vec!["/data/main_val"]
        );
        assert_eq!(registry.clusters().collect::<Vec<_>>(), vec![CLUSTER]);
    }

    #[test]
    fn test_empty_dataset_list() {
        let registry = DatasetRegistry::builtin();
        let empty: [&str; 0] = [];
        assert!(registry.dataset_paths(&empty, true, CLUSTER).unwrap().is_empty());
    }
}
