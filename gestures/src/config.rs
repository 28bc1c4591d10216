//! Engine configuration loaded from an s-expression file.
//!
//! ```text
//! (:detector (:min-sample-distance 0.01 :max-sample-age 1.5 :minimum-samples 10)
//!  :shapes ((:id "circle" :kind :circular :cooldown 0.75 :min-radius 0.05)
//!           (:id "vee" :kind :drawn :closed-loop nil :points (-1 1 0 -1 1 1))
//!           (:id "hook" :kind :drawn :template "hook.sexp")
//!           (:id "swipe" :kind :linear :minimum-distance 0.3))
//!  :sequences ((:id "spell" :require-same-target t :max-step-gap 2.0
//!               :steps ((:label "charge" :shape "circle")
//!                       (:label "cast" :shape "swipe")))))
//! ```
//!
//! Omitted keys keep their defaults.  Relative `:template` paths resolve
//! against the directory of the config file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use lexpr::Value;
use tracing::{info, warn};

use crate::detector::DetectorConfig;
use crate::engine::GestureEngine;
use crate::geometry::Vec3;
use crate::sequence::{SequenceDefinition, SequenceStep};
use crate::sexp;
use crate::shapes::{
    CircularConfig, DrawnConfig, DrawnTemplate, LinearConfig, ShapeDefinition, ShapeKind,
};

/// A sequence as written in the config, with shapes still named.
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    pub id: String,
    /// `(label, shape id)` pairs.
    pub steps: Vec<(String, String)>,
    pub require_same_target: bool,
    pub max_step_gap_s: Option<f64>,
    pub restart_on_first_match: bool,
}

/// Everything needed to build a [`GestureEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub detector: DetectorConfig,
    pub shapes: Vec<ShapeDefinition>,
    pub sequences: Vec<SequenceConfig>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::from_sexp(&raw, base)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!(
            "Loaded {} shapes and {} sequences from {}",
            config.shapes.len(),
            config.sequences.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse a config document; `base_dir` anchors relative template paths.
    pub fn from_sexp(raw: &str, base_dir: &Path) -> Result<Self> {
        let root = sexp::parse(raw)?;
        let mut config = Self::default();

        if let Some(detector) = sexp::get(&root, "detector") {
            read_detector(detector, &mut config.detector)?;
        }
        if let Some(shapes) = sexp::get(&root, "shapes") {
            for (i, shape) in sexp::items(shapes).into_iter().enumerate() {
                let def =
                    read_shape(shape, base_dir).with_context(|| format!("shape #{}", i))?;
                config.shapes.push(def);
            }
        }
        if let Some(sequences) = sexp::get(&root, "sequences") {
            for (i, seq) in sexp::items(sequences).into_iter().enumerate() {
                let def = read_sequence(seq).with_context(|| format!("sequence #{}", i))?;
                config.sequences.push(def);
            }
        }
        Ok(config)
    }

    /// Build an engine, resolving sequence steps to shape handles.  A step
    /// naming an unknown shape is kept as a misconfigured step.
    pub fn build(&self) -> GestureEngine {
        let mut engine = GestureEngine::new(self.detector.clone());
        for def in &self.shapes {
            engine.add_shape(def.clone());
        }
        for seq in &self.sequences {
            let steps = seq
                .steps
                .iter()
                .map(|(label, shape_id)| {
                    let shape = engine.shape_handle(shape_id);
                    if shape.is_none() {
                        warn!(
                            "Sequence {:?} step {:?} names unknown shape {:?}",
                            seq.id, label, shape_id
                        );
                    }
                    SequenceStep {
                        label: label.clone(),
                        shape,
                    }
                })
                .collect();
            engine.add_sequence(SequenceDefinition {
                id: seq.id.clone(),
                steps,
                require_same_target: seq.require_same_target,
                max_step_gap_s: seq.max_step_gap_s,
                restart_on_first_match: seq.restart_on_first_match,
            });
        }
        engine
    }
}

// ── Typed plist readers ────────────────────────────────────

fn float(value: &Value, key: &str) -> Result<Option<f64>> {
    match sexp::get(value, key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| anyhow!(":{} must be a number, got {}", key, v)),
    }
}

fn set_f32(value: &Value, key: &str, slot: &mut f32) -> Result<()> {
    if let Some(v) = float(value, key)? {
        *slot = v as f32;
    }
    Ok(())
}

fn set_f64(value: &Value, key: &str, slot: &mut f64) -> Result<()> {
    if let Some(v) = float(value, key)? {
        *slot = v;
    }
    Ok(())
}

fn set_usize(value: &Value, key: &str, slot: &mut usize) -> Result<()> {
    if let Some(v) = sexp::get(value, key) {
        let n = v
            .as_u64()
            .ok_or_else(|| anyhow!(":{} must be a non-negative integer, got {}", key, v))?;
        *slot = usize::try_from(n).with_context(|| format!(":{} is too large", key))?;
    }
    Ok(())
}

fn set_bool(value: &Value, key: &str, slot: &mut bool) -> Result<()> {
    if let Some(b) = sexp::get_bool(value, key) {
        *slot = b;
    }
    Ok(())
}

fn set_vec3(value: &Value, key: &str, slot: &mut Vec3) -> Result<()> {
    if let Some(v) = sexp::get(value, key) {
        let coords = sexp::floats(v).with_context(|| format!("invalid :{}", key))?;
        let [x, y, z] = coords.as_slice() else {
            bail!(":{} needs three coordinates, got {}", key, coords.len());
        };
        *slot = Vec3::new(*x as f32, *y as f32, *z as f32);
    }
    Ok(())
}

// ── Sections ───────────────────────────────────────────────

fn read_detector(value: &Value, config: &mut DetectorConfig) -> Result<()> {
    set_f32(value, "min-sample-distance", &mut config.trail.min_sample_distance)?;
    set_f64(value, "max-sample-age", &mut config.trail.max_sample_age_s)?;
    set_usize(value, "minimum-samples", &mut config.minimum_samples)
}

fn read_shape(value: &Value, base_dir: &Path) -> Result<ShapeDefinition> {
    let id = sexp::get_name(value, "id").ok_or_else(|| anyhow!("shape has no :id"))?;
    let kind_name =
        sexp::get_name(value, "kind").ok_or_else(|| anyhow!("shape {:?} has no :kind", id))?;

    let kind = match kind_name.as_str() {
        "circular" => ShapeKind::Circular(read_circular(value)?),
        "drawn" => ShapeKind::Drawn(read_drawn(value, base_dir)?),
        "linear" => ShapeKind::Linear(read_linear(value)?),
        other => bail!("shape {:?} has unknown :kind {:?}", id, other),
    };

    let mut def = ShapeDefinition::new(id, kind);
    set_f64(value, "cooldown", &mut def.cooldown_s)?;
    set_usize(value, "minimum-samples", &mut def.minimum_samples)?;
    Ok(def)
}

fn read_circular(value: &Value) -> Result<CircularConfig> {
    let mut c = CircularConfig::default();
    set_f32(value, "min-radius", &mut c.min_radius)?;
    set_f32(value, "radius-variance-tolerance", &mut c.radius_variance_tolerance)?;
    set_f32(value, "min-coverage", &mut c.min_coverage_deg)?;
    set_f32(value, "max-coverage", &mut c.max_coverage_deg)?;
    set_f32(value, "min-travelled-arc-ratio", &mut c.min_travelled_arc_ratio)?;
    set_bool(value, "enforce-normal-alignment", &mut c.enforce_normal_alignment)?;
    set_vec3(value, "required-normal", &mut c.required_normal)?;
    set_f32(value, "normal-tolerance", &mut c.normal_tolerance_deg)?;
    Ok(c)
}

fn read_drawn(value: &Value, base_dir: &Path) -> Result<DrawnConfig> {
    let mut d = DrawnConfig::default();
    d.template = match sexp::get(value, "template") {
        Some(path) => {
            let path = path
                .as_str()
                .ok_or_else(|| anyhow!(":template must be a string path"))?;
            let mut template = DrawnTemplate::load(&resolve(base_dir, path))?;
            set_bool(value, "closed-loop", &mut template.closed_loop)?;
            template
        }
        None if sexp::get(value, "points").is_some() => DrawnTemplate::from_value(value)?,
        None => DrawnTemplate::default(),
    };
    set_f32(value, "min-path-length", &mut d.min_path_length)?;
    set_usize(value, "comparison-points", &mut d.comparison_points)?;
    set_f32(value, "max-average-error", &mut d.max_average_error)?;
    set_bool(value, "allow-mirrored", &mut d.allow_mirrored)?;
    set_bool(value, "allow-reversed", &mut d.allow_reversed)?;
    set_f32(value, "closure-distance-ratio", &mut d.closure_distance_ratio)?;
    Ok(d)
}

fn read_linear(value: &Value) -> Result<LinearConfig> {
    let mut l = LinearConfig::default();
    set_f32(value, "minimum-distance", &mut l.minimum_distance)?;
    set_f32(value, "max-deviation", &mut l.max_deviation)?;
    set_f32(value, "minimum-straightness", &mut l.minimum_straightness)?;
    set_bool(value, "enforce-direction", &mut l.enforce_direction)?;
    set_vec3(value, "expected-direction", &mut l.expected_direction)?;
    set_f32(value, "direction-tolerance", &mut l.direction_tolerance_deg)?;
    set_bool(value, "allow-reverse", &mut l.allow_reverse)?;
    Ok(l)
}

fn read_sequence(value: &Value) -> Result<SequenceConfig> {
    let id = sexp::get_name(value, "id").ok_or_else(|| anyhow!("sequence has no :id"))?;
    let defaults = SequenceDefinition::new(id.clone(), Vec::new());

    let mut steps = Vec::new();
    if let Some(list) = sexp::get(value, "steps") {
        for step in sexp::items(list) {
            let shape = sexp::get_name(step, "shape")
                .ok_or_else(|| anyhow!("sequence {:?} has a step without :shape", id))?;
            let label = sexp::get_name(step, "label").unwrap_or_else(|| shape.clone());
            steps.push((label, shape));
        }
    }

    let max_step_gap_s = match sexp::get(value, "max-step-gap") {
        None => defaults.max_step_gap_s,
        Some(v) if !sexp::truthy(v) => None,
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| anyhow!(":max-step-gap must be a number or nil, got {}", v))?,
        ),
    };

    let mut seq = SequenceConfig {
        id,
        steps,
        require_same_target: defaults.require_same_target,
        max_step_gap_s,
        restart_on_first_match: defaults.restart_on_first_match,
    };
    set_bool(value, "require-same-target", &mut seq.require_same_target)?;
    set_bool(value, "restart-on-first-match", &mut seq.restart_on_first_match)?;
    Ok(seq)
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

// ── Tests ──────────────────────────────────────────────────
