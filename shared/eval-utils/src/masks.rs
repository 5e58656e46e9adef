use tch::{Device, Kind, TchError, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("number of timesteps {n_timesteps} is not a multiple of the temporal patch size {temporal_size}")]
    UnalignedTimesteps { n_timesteps: i64, temporal_size: i64 },

    #[error("number of timesteps must be non-negative, got {0}")]
    NegativeTimesteps(i64),

    #[error("invalid patch geometry: {0}")]
    InvalidGeometry(String),

    #[error("torch error: {0}")]
    Torch(#[from] TchError),
}

/// How a clip is cut into spatio-temporal patches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchGeometry {
    /// (height, width) of a patch in pixels.
    pub spatial_size: (i64, i64),
    /// Number of frames per patch.
    pub temporal_size: i64,
    /// (height, width) of a frame in pixels.
    pub spatial_dim: (i64, i64),
    /// Number of frames per clip.
    pub temporal_dim: i64,
}

impl Default for PatchGeometry {
    fn default() -> Self {
        Self {
            spatial_size: (16, 16),
            temporal_size: 2,
            spatial_dim: (224, 224),
            temporal_dim: 16,
        }
    }
}

/// Patch selections for the context (`enc`) and prediction (`pred`) parts of a clip.
///
/// Either all boolean masks over the patch sequence, or all int64 patch indices.
#[derive(Debug)]
pub struct TimeMasks {
    pub enc: Tensor,
    pub pred: Tensor,
    pub full: Tensor,
}

fn patches_along(dim: i64, size: i64, what: &str) -> Result<i64, MaskError> {
    if size <= 0 || dim < 0 || dim % size != 0 {
        return Err(MaskError::InvalidGeometry(format!(
            "{what} of {dim} is not divisible into patches of {size}"
        )));
    }
    Ok(dim / size)
}

impl PatchGeometry {
    pub fn num_patches_spatial(&self) -> Result<i64, MaskError> {
        let rows = patches_along(self.spatial_dim.0, self.spatial_size.0, "height")?;
        let cols = patches_along(self.spatial_dim.1, self.spatial_size.1, "width")?;
        Ok(rows * cols)
    }

    pub fn num_patches_time(&self) -> Result<i64, MaskError> {
        patches_along(self.temporal_dim, self.temporal_size, "clip length")
    }

    pub fn num_patches(&self) -> Result<i64, MaskError> {
        Ok(self.num_patches_spatial()? * self.num_patches_time()?)
    }

    /// Splits the patch sequence so that the patches of the first `n_timesteps` frames are
    /// context and the rest are predicted.
    ///
    /// Patches are ordered time-major, so the split is a single cut in the sequence.
    pub fn time_masks(&self, n_timesteps: i64, as_bool: bool) -> Result<TimeMasks, MaskError> {
        if n_timesteps < 0 {
            return Err(MaskError::NegativeTimesteps(n_timesteps));
        }
        let spatial = self.num_patches_spatial()?;
        let total = spatial * self.num_patches_time()?;
        if n_timesteps % self.temporal_size != 0 {
            return Err(MaskError::UnalignedTimesteps {
                n_timesteps,
                temporal_size: self.temporal_size,
            });
        }
        // context longer than the clip leaves nothing to predict
        let n_timesteps = n_timesteps.min(self.temporal_dim);
        let context = spatial * n_timesteps / self.temporal_size;

        let patch_idcs = Tensor::f_arange(total, (Kind::Int64, Device::Cpu))?;
        let masks = if as_bool {
            TimeMasks {
                enc: patch_idcs.f_lt(context)?,
                pred: patch_idcs.f_ge(context)?,
                full: patch_idcs.f_ge(0)?,
            }
        } else {
            TimeMasks {
                enc: patch_idcs.f_narrow(0, 0, context)?,
                pred: patch_idcs.f_narrow(0, context, total - context)?,
                full: patch_idcs,
            }
        };
        Ok(masks)
    }
}

/// [`PatchGeometry::time_masks`] for the default 224x224, 16 frame clips.
pub fn get_time_masks(n_timesteps: i64, as_bool: bool) -> Result<TimeMasks, MaskError> {
    PatchGeometry::default().time_masks(n_timesteps, as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_true(mask: &Tensor) -> i64 {
        mask.sum(Kind::Int64).int64_value(&[])
    }

    #[test]
    fn test_default_geometry() {
        let geometry = PatchGeometry::default();
        assert_eq!(geometry.num_patches_spatial().unwrap(), 196);
        assert_eq!(geometry.num_patches_time().unwrap(), 8);
        assert_eq!(geometry.num_patches().unwrap(), 1568);
    }

    #[test]
    fn test_index_masks() {
        let masks = get_time_masks(8, false).unwrap();
        assert_eq!(masks.enc.size(), vec![784]);
        assert_eq!(masks.pred.size(), vec![784]);
        assert_eq!(masks.full.size(), vec![1568]);
        assert_eq!(masks.enc.kind(), Kind::Int64);
        assert_eq!(masks.enc.int64_value(&[0]), 0);
        assert_eq!(masks.enc.int64_value(&[783]), 783);
        assert_eq!(masks.pred.int64_value(&[0]), 784);
        assert_eq!(masks.pred.int64_value(&[783]), 1567);
    }

    #[test]
    fn test_bool_masks() {
        let masks = get_time_masks(4, true).unwrap();
        assert_eq!(masks.enc.kind(), Kind::Bool);
        assert_eq!(masks.enc.size(), vec![1568]);
        assert_eq!(count_true(&masks.enc), 392);
        assert_eq!(count_true(&masks.pred), 1568 - 392);
        assert_eq!(count_true(&masks.full), 1568);
        // enc and pred partition the sequence
        assert_eq!(count_true(&masks.enc.logical_and(&masks.pred)), 0);
        assert_eq!(count_true(&masks.enc.logical_or(&masks.pred)), 1568);
    }

    #[test]
    fn test_no_context() {
        let masks = get_time_masks(0, false).unwrap();
        assert_eq!(masks.enc.size(), vec![0]);
        assert_eq!(masks.pred.size(), vec![1568]);
    }

    #[test]
    fn test_context_past_clip_end_is_clamped() {
        let masks = get_time_masks(32, false).unwrap();
        assert_eq!(masks.enc.size(), vec![1568]);
        assert_eq!(masks.pred.size(), vec![0]);
    }

    #[test]
    fn test_huge_context_is_clamped() {
        let masks = get_time_masks(i64::MAX - 1, true).unwrap();
        assert_eq!(count_true(&masks.enc), 1568);
        assert_eq!(count_true(&masks.pred), 0);

        let masks = get_time_masks(i64::MAX - 1, false).unwrap();
        assert_eq!(masks.enc.size(), vec![1568]);
        assert_eq!(masks.pred.size(), vec![0]);
    }

    #[test]
    fn test_non_square_frames() {
        let geometry = PatchGeometry {
            spatial_size: (16, 8),
            temporal_size: 4,
            spatial_dim: (64, 32),
            temporal_dim: 8,
        };
        assert_eq!(geometry.num_patches_spatial().unwrap(), 16);
        let masks = geometry.time_masks(4, true).unwrap();
        assert_eq!(count_true(&masks.enc), 16);
        assert_eq!(count_true(&masks.pred), 16);
    }

    #[test]
    fn test_unaligned_timesteps() {
        assert!(matches!(
            get_time_masks(3, true),
            Err(MaskError::UnalignedTimesteps {
                n_timesteps: 3,
                temporal_size: 2
            })
        ));
        assert!(matches!(
            get_time_masks(-2, true),
            Err(MaskError::NegativeTimesteps(-2))
        ));
    }

    #[test]
    fn test_invalid_geometry() {
        let geometry = PatchGeometry {
            spatial_size: (15, 16),
            ..Default::default()
        };
        assert!(matches!(
            geometry.time_masks(2, false),
            Err(MaskError::InvalidGeometry(_))
        ));
        let geometry = PatchGeometry {
            temporal_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            geometry.time_masks(2, false),
            Err(MaskError::InvalidGeometry(_))
        ));
    }
}
