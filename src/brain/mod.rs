pub mod mgdm;

pub use mgdm::{mgdm_segmentation, ContrastChannel, MgdmParams, MAX_CONTRASTS};
