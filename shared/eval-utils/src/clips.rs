use tch::{Kind, TchError, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("expected matched clips of shape [2, C, T, H, W], got {0:?}")]
    InvalidShape(Vec<i64>),

    #[error("matched clips are identical at every timestep")]
    NoDivergence,

    #[error("torch error: {0}")]
    Torch(#[from] TchError),
}

/// The first timestep at which the first two of `matched_clips` differ.
///
/// `matched_clips` is `[N >= 2, C, T, H, W]`. A timestep differs if any channel or pixel
/// differs in it.
pub fn get_action_timestep(matched_clips: &Tensor) -> Result<i64, ClipError> {
    let size = matched_clips.size();
    if size.len() != 5 || size[0] < 2 {
        return Err(ClipError::InvalidShape(size));
    }
    let differs = matched_clips
        .f_get(0)?
        .f_ne_tensor(&matched_clips.f_get(1)?)?;
    // [C, T, H, W] -> [T]
    let differing_per_timestep =
        differs.f_sum_dim_intlist(&[0i64, 2, 3][..], false, Kind::Int64)?;
    let changed = differing_per_timestep.f_nonzero()?;
    if changed.size()[0] == 0 {
        return Err(ClipError::NoDivergence);
    }
    Ok(changed.f_int64_value(&[0, 0])?)
}
