use std::fmt;

use thiserror::Error;

pub const SLURM_JOB_ACCOUNT: &str = "SLURM_JOB_ACCOUNT";
pub const SLURM_JOB_PARTITION: &str = "SLURM_JOB_PARTITION";
pub const SLURM_JOB_QOS: &str = "SLURM_JOB_QOS";

/// QOS used when relaunching at low priority.
pub const LOW_PRIORITY_QOS: &str = "lowest";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlurmError {
    #[error("This function should only be called by a job scheduled by slurm (missing {})", .0.join(", "))]
    NotInSlurmJob(Vec<&'static str>),
}

/// The scheduling variables of the current slurm job, for launching another job with the same ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmJobVars {
    pub account: String,
    pub partition: String,
    pub qos: String,
}

impl SlurmJobVars {
    pub fn from_lookup<F>(lookup: F, low_pri: bool) -> Result<Self, SlurmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut read = |name: &'static str| {
            let value = lookup(name);
            if value.is_none() {
                missing.push(name);
            }
            value
        };
        let account = read(SLURM_JOB_ACCOUNT);
        let partition = read(SLURM_JOB_PARTITION);
        let qos = read(SLURM_JOB_QOS);

        match (account, partition, qos) {
            (Some(account), Some(partition), Some(qos)) => Ok(Self {
                account,
                partition,
                qos: if low_pri {
                    LOW_PRIORITY_QOS.to_owned()
                } else {
                    qos
                },
            }),
            _ => Err(SlurmError::NotInSlurmJob(missing)),
        }
    }

    pub fn sbatch_args(&self) -> Vec<String> {
        vec![
            format!("--account={}", self.account),
            format!("--partition={}", self.partition),
            format!("--qos={}", self.qos),
        ]
    }
}

impl fmt::Display for SlurmJobVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sbatch_args().join(" "))
    }
}

/// Account, partition and QOS of the slurm job this process runs in.
pub fn slurm_account_partition_and_qos(low_pri: bool) -> Result<SlurmJobVars, SlurmError> {
    SlurmJobVars::from_lookup(|name| std::env::var(name).ok(), low_pri)
}
