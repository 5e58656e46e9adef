use std::sync::{Arc, Barrier, Mutex};

use tch::{TchError, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatherError {
    #[error("rank {rank} contributed a tensor of shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        rank: usize,
        expected: Vec<i64>,
        got: Vec<i64>,
    },

    #[error("expected one gradient per rank ({expected}), got {got}")]
    GradientCount { expected: usize, got: usize },

    #[error("cannot gather a scalar tensor along dim 0")]
    ScalarInput,

    #[error("torch error: {0}")]
    Torch(#[from] TchError),
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ReduceType {
    Sum,
    Max,
    Mean,
}

#[derive(Debug)]
struct LocalGroup {
    world_size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Option<Tensor>>>,
}

/// One rank of a group of ranks living in the same process, usually one thread per device.
#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    group: Arc<LocalGroup>,
    rank: usize,
}

impl LocalCommunicator {
    /// Handles for every rank of a new group, indexed by rank.
    pub fn group(world_size: usize) -> Vec<Self> {
        let group = Arc::new(LocalGroup {
            world_size,
            barrier: Barrier::new(world_size),
            slots: Mutex::new((0..world_size).map(|_| None).collect()),
        });
        (0..world_size)
            .map(|rank| Self {
                group: group.clone(),
                rank,
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.group.world_size
    }

    /// Every rank must call this the same number of times, or the group deadlocks.
    fn all_gather(&self, input: &Tensor) -> Vec<Tensor> {
        // a panicked rank can't leave the slots in a bad state, so poisoning is ignored
        {
            let mut slots = self
                .group
                .slots
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slots[self.rank] = Some(input.detach().copy());
        }
        self.group.barrier.wait();
        let gathered = self
            .group
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .flatten()
            .map(|tensor| tensor.to_device(input.device()))
            .collect();
        // nobody may overwrite a slot until every rank has read it
        self.group.barrier.wait();
        gathered
    }
}

#[derive(Debug)]
pub enum Communicator {
    /// A single process: rank 0 of a world of size 1.
    None,
    Local(LocalCommunicator),
}

impl From<LocalCommunicator> for Communicator {
    fn from(value: LocalCommunicator) -> Self {
        Self::Local(value)
    }
}

impl Communicator {
    pub fn none() -> Self {
        Self::None
    }

    pub fn size(&self) -> usize {
        match self {
            Communicator::None => 1,
            Communicator::Local(local) => local.size(),
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Communicator::None => 0,
            Communicator::Local(local) => local.rank(),
        }
    }

    /// Copies of every rank's `input`, in rank order. The copies are detached from any graph.
    pub fn all_gather(&self, input: &Tensor) -> Result<Vec<Tensor>, GatherError> {
        let gathered = match self {
            Communicator::None => vec![input.detach().copy()],
            Communicator::Local(local) => local.all_gather(input),
        };
        let expected = input.size();
        for (rank, tensor) in gathered.iter().enumerate() {
            let got = tensor.size();
            if got != expected {
                return Err(GatherError::ShapeMismatch {
                    rank,
                    expected,
                    got,
                });
            }
        }
        Ok(gathered)
    }

    pub fn all_reduce(&self, input: &Tensor, op: ReduceType) -> Result<Tensor, GatherError> {
        let stacked = Tensor::f_stack(&self.all_gather(input)?, 0)?;
        let reduced = match op {
            ReduceType::Sum => stacked.f_sum_dim_intlist(0i64, false, stacked.kind())?,
            ReduceType::Max => stacked.f_amax(&[0i64][..], false)?,
            ReduceType::Mean => stacked.f_mean_dim(0i64, false, stacked.kind())?,
        };
        Ok(reduced)
    }
}

/// All-gather whose backward pass all-reduces the incoming gradients, so each rank receives
/// the gradient that every rank's loss puts on its contribution.
pub struct FullGather<'a> {
    comm: &'a Communicator,
}

impl<'a> FullGather<'a> {
    pub fn new(comm: &'a Communicator) -> Self {
        Self { comm }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Vec<Tensor>, GatherError> {
        self.comm.all_gather(x)
    }

    /// `grads[r]` is the gradient of this rank's loss w.r.t. rank `r`'s gathered tensor.
    pub fn backward(&self, grads: &[Tensor]) -> Result<Tensor, GatherError> {
        let world_size = self.comm.size();
        if grads.len() != world_size {
            return Err(GatherError::GradientCount {
                expected: world_size,
                got: grads.len(),
            });
        }
        let all_gradients = Tensor::f_stack(grads, 0)?;
        let all_gradients = self.comm.all_reduce(&all_gradients, ReduceType::Sum)?;
        Ok(all_gradients.f_get(self.comm.rank() as i64)?)
    }
}

/// Result of [`batch_all_gather`].
///
/// [`GatheredBatch::tensor`] is a leaf of the caller's graph. Either back-propagate the loss
/// through [`GatheredBatch::backward_from`], or run `loss.backward()` yourself and then call
/// [`GatheredBatch::backward`] to finish the pass through the gather and into the graph of
/// the local input.
pub struct GatheredBatch<'a> {
    comm: &'a Communicator,
    input: Tensor,
    gathered: Tensor,
}

impl GatheredBatch<'_> {
    pub fn tensor(&self) -> &Tensor {
        &self.gathered
    }

    pub fn into_tensor(self) -> Tensor {
        self.gathered
    }

    /// Collective: every rank has to call this, even if its loss didn't use the batch.
    ///
    /// The graph between the input and its leaves must still be alive, so this doesn't work
    /// if the loss also used the input directly. Use [`GatheredBatch::backward_from`] then.
    pub fn backward(&self) -> Result<(), GatherError> {
        let grad = self.gathered.grad();
        let local_grad = self.reduce_gradients(grad)?;
        if self.input.requires_grad() {
            // vector-Jacobian product: d(sum(x * g))/dθ = gᵀ dx/dθ
            self.input
                .f_mul(&local_grad)?
                .f_sum(self.input.kind())?
                .f_backward()?;
        }
        Ok(())
    }

    /// Back-propagates the scalar `loss` through the gather and the rest of its graph in a
    /// single pass, so the loss may also depend on the local input directly.
    ///
    /// Collective, like [`GatheredBatch::backward`]. The loss must depend on the batch.
    pub fn backward_from(&self, loss: &Tensor) -> Result<(), GatherError> {
        if !self.gathered.requires_grad() {
            return Ok(loss.f_backward()?);
        }
        let grad = Tensor::f_run_backward(&[loss], &[&self.gathered], true, false)?
            .into_iter()
            .next()
            .unwrap_or_else(Tensor::new);
        let local_grad = self.reduce_gradients(grad)?;
        // one pass over the graph for the direct use of x and the gather's contribution
        let through_gather = self.input.f_mul(&local_grad)?.f_sum(loss.kind())?;
        loss.f_add(&through_gather)?.f_backward()?;
        Ok(())
    }

    /// This rank's share of every rank's gradient w.r.t. the gathered batch.
    fn reduce_gradients(&self, grad: Tensor) -> Result<Tensor, GatherError> {
        let grad = if grad.defined() {
            grad
        } else {
            self.gathered.f_zeros_like()?
        };
        // narrow, not split: split yields a single chunk for empty batches
        let per_rank = self.input.size()[0];
        let grads = (0..self.comm.size() as i64)
            .map(|rank| grad.f_narrow(0, rank * per_rank, per_rank))
            .collect::<Result<Vec<_>, _>>()?;
        FullGather::new(self.comm).backward(&grads)
    }
}

/// Gathers `x` from every rank and concatenates along dim 0, keeping gradients flowing back
/// to `x` on each rank.
pub fn batch_all_gather<'a>(
    x: &Tensor,
    comm: &'a Communicator,
) -> Result<GatheredBatch<'a>, GatherError> {
    if x.dim() == 0 {
        return Err(GatherError::ScalarInput);
    }
    let parts = FullGather::new(comm).forward(x)?;
    let gathered = Tensor::f_cat(&parts, 0)?.set_requires_grad(x.requires_grad());
    Ok(GatheredBatch {
        comm,
        input: x.shallow_clone(),
        gathered,
    })
}
