//! Translation of a voxel-to-world affine into the engine's slice order and
//! per-axis flip enumeration.
//!
//! The engine's `R2L`/`L2R`/... constants are a fixed convention of their own,
//! so the mapping below is an explicit table rather than something derived
//! from the sign of the affine.

use crate::error::OrientationError;
use nalgebra::{Matrix3, Matrix4};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceOrder {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LrFlip {
    R2L,
    L2R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApFlip {
    P2A,
    A2P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsFlip {
    S2I,
    I2S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrientationCode {
    pub slice_order: SliceOrder,
    pub lr: LrFlip,
    pub ap: ApFlip,
    pub is: IsFlip,
}

/// Closest world axis letter for each voxel axis, nibabel-style
/// (`RAS+` world: `R`, `A`, `S` for positive directions).
///
/// The 3×3 block is first replaced by its nearest orthogonal matrix so that
/// shears and anisotropic zooms do not bias the assignment, then voxel axes are
/// matched to world axes greedily by decreasing absolute projection.
pub fn axis_codes(affine: &Matrix4<f64>) -> Result<[char; 3], OrientationError> {
    let rzs: Matrix3<f64> = affine.fixed_view::<3, 3>(0, 0).into_owned();

    for j in 0..3 {
        if rzs.column(j).norm() == 0.0 {
            return Err(OrientationError::DegenerateAxis(j));
        }
    }

    let svd = rzs.svd(true, true);
    let ortho = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => u * v_t,
        _ => rzs,
    };

    let mut codes = ['?'; 3];
    let mut used_world = [false; 3];
    let mut used_voxel = [false; 3];
    for _ in 0..3 {
        let mut best: Option<(usize, usize, f64)> = None;
        for world in (0..3).filter(|w| !used_world[*w]) {
            for voxel in (0..3).filter(|v| !used_voxel[*v]) {
                let value = ortho[(world, voxel)];
                if best.map_or(true, |(_, _, b)| value.abs() > b.abs()) {
                    best = Some((world, voxel, value));
                }
            }
        }
        let (world, voxel, value) = best.ok_or(OrientationError::DegenerateAxis(0))?;
        if value == 0.0 {
            return Err(OrientationError::DegenerateAxis(voxel));
        }
        used_world[world] = true;
        used_voxel[voxel] = true;
        codes[voxel] = match (world, value > 0.0) {
            (0, true) => 'R',
            (0, false) => 'L',
            (1, true) => 'A',
            (1, false) => 'P',
            (_, true) => 'S',
            (_, false) => 'I',
        };
    }
    Ok(codes)
}

/// Engine orientation for an affine.
pub fn resolve(affine: &Matrix4<f64>) -> Result<OrientationCode, OrientationError> {
    resolve_codes(axis_codes(affine)?)
}

pub fn resolve_str(code: &str) -> Result<OrientationCode, OrientationError> {
    let letters: Vec<char> = code.chars().map(|c| c.to_ascii_uppercase()).collect();
    match letters.as_slice() {
        [a, b, c] => resolve_codes([*a, *b, *c]),
        _ => Err(OrientationError::BadLength(code.to_string())),
    }
}

/// Slice order comes from the last axis letter; each flip from whichever
/// letter of its pair appears anywhere in the code (first listed wins).
pub fn resolve_codes(codes: [char; 3]) -> Result<OrientationCode, OrientationError> {
    if let Some(bad) = codes.iter().find(|c| !"LRAPIS".contains(**c)) {
        return Err(OrientationError::InvalidLetter(*bad));
    }
    let code: String = codes.iter().collect();
    let missing = |pair: &'static str| OrientationError::MissingAxisPair {
        code: code.clone(),
        pair,
    };

    let slice_order = match codes[2] {
        'I' | 'S' => SliceOrder::Axial,
        'L' | 'R' => SliceOrder::Sagittal,
        _ => SliceOrder::Coronal,
    };

    let lr = if codes.contains(&'L') {
        LrFlip::R2L
    } else if codes.contains(&'R') {
        LrFlip::L2R
    } else {
        return Err(missing("left-right"));
    };
    let ap = if codes.contains(&'A') {
        ApFlip::P2A
    } else if codes.contains(&'P') {
        ApFlip::A2P
    } else {
        return Err(missing("anterior-posterior"));
    };
    let is = if codes.contains(&'I') {
        IsFlip::S2I
    } else if codes.contains(&'S') {
        IsFlip::I2S
    } else {
        return Err(missing("inferior-superior"));
    };

    Ok(OrientationCode {
        slice_order,
        lr,
        ap,
        is,
    })
}
