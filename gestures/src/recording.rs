//! Recorded position streams for offline replay.
//!
//! A recording is a list of rows, one per target position:
//!
//! ```text
//! ((:t 0.000 :target 1 :pos (0.10 1.20 -0.30))
//!  (:t 0.000 :target 2 :pos (0.40 1.10 -0.30))
//!  (:t 0.011 :target 1 :pos (0.11 1.21 -0.30)))
//! ```
//!
//! Consecutive rows sharing the same `:t` form one tick.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

use crate::detector::TargetId;
use crate::geometry::Vec3;
use crate::sexp;
use crate::trail::Sample;

/// Positions of every target at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub timestamp_s: f64,
    pub positions: BTreeMap<TargetId, Vec3>,
}

pub fn parse(raw: &str) -> Result<Vec<Frame>> {
    let root = sexp::parse(raw)?;
    let mut frames: Vec<Frame> = Vec::new();

    for (i, row) in sexp::items(&root).into_iter().enumerate() {
        let t = sexp::get_float(row, "t").ok_or_else(|| anyhow!("row {} has no numeric :t", i))?;
        let target = sexp::get(row, "target")
            .and_then(|v| v.as_u64())
            .map(TargetId)
            .ok_or_else(|| anyhow!("row {} has no integer :target", i))?;
        let coords = sexp::get(row, "pos")
            .map(sexp::floats)
            .transpose()
            .with_context(|| format!("row {} has an invalid :pos", i))?
            .ok_or_else(|| anyhow!("row {} has no :pos", i))?;
        let [x, y, z] = coords.as_slice() else {
            bail!("row {} :pos needs three coordinates", i);
        };
        let pos = Vec3::new(*x as f32, *y as f32, *z as f32);

        match frames.last_mut() {
            Some(frame) if frame.timestamp_s == t => {
                frame.positions.insert(target, pos);
            }
            Some(frame) if t < frame.timestamp_s => {
                bail!("row {} goes back in time ({} after {})", i, t, frame.timestamp_s);
            }
            _ => frames.push(Frame {
                timestamp_s: t,
                positions: BTreeMap::from([(target, pos)]),
            }),
        }
    }
    Ok(frames)
}

pub fn load(path: &Path) -> Result<Vec<Frame>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read recording {}", path.display()))?;
    parse(&raw).with_context(|| format!("failed to parse recording {}", path.display()))
}

/// Every target that appears in `frames`, ascending.
pub fn targets(frames: &[Frame]) -> Vec<TargetId> {
    let mut ids: Vec<TargetId> = frames
        .iter()
        .flat_map(|f| f.positions.keys().copied())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// The raw samples of one target, for template capture.
pub fn samples_for(frames: &[Frame], target: TargetId) -> Vec<Sample> {
    frames
        .iter()
        .filter_map(|f| {
            f.positions
                .get(&target)
                .map(|p| Sample::new(*p, f.timestamp_s))
        })
        .collect()
}
