use tch::{TchError, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PadError {
    #[error("axis {axis} is out of range for a tensor with {dims} dimensions")]
    AxisOutOfRange { axis: i64, dims: i64 },

    #[error("tensor has length {length} along the padded axis, longer than {max_length}")]
    TooLong { length: i64, max_length: i64 },

    #[error("torch error: {0}")]
    Torch(#[from] TchError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PadSide {
    Start,
    End,
}

/// Zero-pads every tensor along `length_axis` to `max_length`.
///
/// A negative `length_axis` counts from the last dimension and pads at the start of the axis
/// (left padding); a non-negative one pads at the end.
pub fn pad_tensors(
    tensors: &[Tensor],
    max_length: i64,
    length_axis: i64,
) -> Result<Vec<Tensor>, PadError> {
    let side = if length_axis < 0 {
        PadSide::Start
    } else {
        PadSide::End
    };
    pad_tensors_to(tensors, max_length, length_axis, side)
}

pub fn pad_tensors_to(
    tensors: &[Tensor],
    max_length: i64,
    axis: i64,
    side: PadSide,
) -> Result<Vec<Tensor>, PadError> {
    tensors
        .iter()
        .map(|tensor| pad_tensor(tensor, max_length, axis, side))
        .collect()
}

fn pad_tensor(
    tensor: &Tensor,
    max_length: i64,
    axis: i64,
    side: PadSide,
) -> Result<Tensor, PadError> {
    let dims = tensor.dim() as i64;
    let axis_idx = if axis < 0 { dims + axis } else { axis };
    if !(0..dims).contains(&axis_idx) {
        return Err(PadError::AxisOutOfRange { axis, dims });
    }
    let length = tensor.size()[axis_idx as usize];
    if length > max_length {
        return Err(PadError::TooLong { length, max_length });
    }

    // (before, after) pairs, starting from the last dimension
    let mut pad = vec![0i64; 2 * (dims - axis_idx) as usize];
    let pair = pad.len() - 2;
    match side {
        PadSide::Start => pad[pair] = max_length - length,
        PadSide::End => pad[pair + 1] = max_length - length,
    }
    Ok(tensor.f_constant_pad_nd(pad.as_slice())?)
}
