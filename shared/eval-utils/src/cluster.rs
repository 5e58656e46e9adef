use std::sync::OnceLock;

use tracing::{debug, warn};

/// Cluster name used when we aren't running under slurm.
pub const CLUSTER: &str = "cluster";

pub const SLURM_CLUSTER_NAME: &str = "SLURM_CLUSTER_NAME";

/// Slurm cluster names we have dataset paths for, and the cluster they map to.
pub const SUPPORTED_CLUSTERS: [(&str, &str); 1] = [("cluster", CLUSTER)];

/// Resolve the cluster from the value of `SLURM_CLUSTER_NAME`.
///
/// Unknown slurm clusters are returned as-is, so the caller sees where it is running
/// and support for it can be added.
pub fn cluster_from_slurm_name(slurm_name: Option<&str>) -> String {
    let Some(slurm_name) = slurm_name else {
        return CLUSTER.to_owned();
    };
    match SUPPORTED_CLUSTERS
        .iter()
        .find(|(supported, _)| *supported == slurm_name)
    {
        Some((_, cluster)) => (*cluster).to_owned(),
        None => {
            warn!(cluster = slurm_name, "slurm cluster is not a supported cluster");
            slurm_name.to_owned()
        }
    }
}

/// The cluster this process runs on. Read from the environment once per process.
pub fn get_cluster() -> &'static str {
    static CLUSTER_NAME: OnceLock<String> = OnceLock::new();
    CLUSTER_NAME.get_or_init(|| {
        let slurm_name = std::env::var(SLURM_CLUSTER_NAME).ok();
        let cluster = cluster_from_slurm_name(slurm_name.as_deref());
        debug!(%cluster, "resolved cluster");
        cluster
    })
}
