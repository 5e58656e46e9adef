mod clips;
mod cluster;
mod dataset_paths;
mod masks;
mod padding;
mod parallelism;
mod slurm;

pub use clips::{get_action_timestep, ClipError};
pub use cluster::{
    cluster_from_slurm_name, get_cluster, CLUSTER, SLURM_CLUSTER_NAME, SUPPORTED_CLUSTERS,
};
pub use dataset_paths::{
    get_dataset_path, get_dataset_paths, DatasetPathError, DatasetRegistry, RegistryLoadError,
    DATASET_PATHS_ENV,
};
pub use masks::{get_time_masks, MaskError, PatchGeometry, TimeMasks};
pub use padding::{pad_tensors, pad_tensors_to, PadError, PadSide};
pub use parallelism::{
    batch_all_gather, Communicator, FullGather, GatherError, GatheredBatch, LocalCommunicator,
    ReduceType,
};
pub use slurm::{slurm_account_partition_and_qos, SlurmError, SlurmJobVars, LOW_PRIORITY_QOS};
