//! Named (sigma_0, q_0) defaults for the model selector.

use crate::payload::ParametersPayload;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use std::collections::BTreeMap;
use universe_core::CosmologicalParameters;
use wasm_bindgen::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPreset {
    pub sigma_0: f64,
    pub q_0: f64,
}

pub type PresetTable = BTreeMap<String, ModelPreset>;

pub fn builtin_model_presets() -> PresetTable {
    [
        ("Einstein-de Sitter", 0.5, 0.5),
        ("de Sitter", 0.0, -1.0),
        ("Empty open", 0.0, 0.0),
        ("Closed matter", 1.0, 1.0),
    ]
    .into_iter()
    .map(|(name, sigma_0, q_0)| (name.to_string(), ModelPreset { sigma_0, q_0 }))
    .collect()
}

pub(crate) fn validate_presets(presets: &PresetTable) -> Result<()> {
    if presets.is_empty() {
        bail!("Preset table must contain at least one model.");
    }
    for (name, preset) in presets {
        if name.trim().is_empty() {
            bail!("Model names must not be blank.");
        }
        if !preset.sigma_0.is_finite() || !preset.q_0.is_finite() {
            bail!("Model '{}' has non-finite parameters.", name);
        }
    }
    Ok(())
}

pub(crate) fn resolve_preset(presets: &PresetTable, name: &str) -> Result<CosmologicalParameters> {
    let preset = presets
        .get(name)
        .ok_or_else(|| anyhow!("Unknown model '{}'.", name))?;
    Ok(CosmologicalParameters::from_density_and_deceleration(
        preset.sigma_0,
        preset.q_0,
    )?)
}

/// `undefined`/`null` selects the built-in table.
fn preset_table(value: JsValue) -> Result<PresetTable, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(builtin_model_presets());
    }
    let presets: PresetTable = from_value(value)
        .map_err(|e| JsValue::from_str(&format!("Invalid model presets: {}", e)))?;
    validate_presets(&presets).map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(presets)
}

#[wasm_bindgen]
pub fn model_names(presets: JsValue) -> Result<Vec<String>, JsValue> {
    Ok(preset_table(presets)?.into_keys().collect())
}

/// Derived parameters (sigma_0, q_0, K, Lambda and the curvature class) for one
/// named model, in the same shape as `derive_parameters`.
#[wasm_bindgen]
pub fn model_parameters(presets: JsValue, name: &str) -> Result<JsValue, JsValue> {
    let presets = preset_table(presets)?;
    let params = resolve_preset(&presets, name).map_err(|e| JsValue::from_str(&e.to_string()))?;
    to_value(&ParametersPayload::from(&params))
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn model_parameters_include_curvature_class() {
        let value = model_parameters(JsValue::UNDEFINED, "Empty open").expect("parameters");
        let curvature = js_sys::Reflect::get(&value, &JsValue::from_str("curvature"))
            .expect("curvature field")
            .as_string();
        assert_eq!(curvature.as_deref(), Some("open"));
    }
}
