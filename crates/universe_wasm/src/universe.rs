//! WASM wrapper around one configured trajectory integrator.

use crate::payload::{
    compute_surface_payload, compute_trajectory_payload, compute_vertex_buffer, ParametersPayload,
};
use crate::presets::{builtin_model_presets, resolve_preset};
use js_sys::Float64Array;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use universe_core::{CosmologicalParameters, IntegratorSettings, TrajectoryIntegrator};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmUniverse {
    integrator: TrajectoryIntegrator,
}

fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{:#}", err))
}

fn serialize<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// `undefined`/`null` selects the default settings; missing fields fall back
/// to their defaults.
fn parse_settings(value: JsValue) -> Result<IntegratorSettings, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(IntegratorSettings::default());
    }
    from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid integrator settings: {}", e)))
}

pub(crate) fn build_integrator(
    params: CosmologicalParameters,
    settings: IntegratorSettings,
) -> anyhow::Result<TrajectoryIntegrator> {
    Ok(TrajectoryIntegrator::new(params, settings)?)
}

#[wasm_bindgen]
impl WasmUniverse {
    /// Takes K and Lambda as supplied by the caller.
    #[wasm_bindgen(constructor)]
    pub fn new(
        sigma_0: f64,
        q_0: f64,
        curvature_sign: f64,
        lambda: f64,
        settings: JsValue,
    ) -> Result<WasmUniverse, JsValue> {
        console_error_panic_hook::set_once();

        let settings = parse_settings(settings)?;
        let params = CosmologicalParameters::new(sigma_0, q_0, curvature_sign, lambda)
            .map_err(|e| to_js_error(e.into()))?;
        let integrator = build_integrator(params, settings).map_err(to_js_error)?;
        Ok(WasmUniverse { integrator })
    }

    /// Derives K and Lambda from sigma_0 and q_0.
    pub fn from_density_and_deceleration(
        sigma_0: f64,
        q_0: f64,
        settings: JsValue,
    ) -> Result<WasmUniverse, JsValue> {
        console_error_panic_hook::set_once();

        let settings = parse_settings(settings)?;
        let params = CosmologicalParameters::from_density_and_deceleration(sigma_0, q_0)
            .map_err(|e| to_js_error(e.into()))?;
        let integrator = build_integrator(params, settings).map_err(to_js_error)?;
        Ok(WasmUniverse { integrator })
    }

    /// Uses one of the built-in model presets.
    pub fn from_model(name: &str, settings: JsValue) -> Result<WasmUniverse, JsValue> {
        console_error_panic_hook::set_once();

        let settings = parse_settings(settings)?;
        let params = resolve_preset(&builtin_model_presets(), name).map_err(to_js_error)?;
        let integrator = build_integrator(params, settings).map_err(to_js_error)?;
        Ok(WasmUniverse { integrator })
    }

    pub fn parameters(&self) -> Result<JsValue, JsValue> {
        serialize(&ParametersPayload::from(self.integrator.parameters()))
    }

    pub fn settings(&self) -> Result<JsValue, JsValue> {
        serialize(self.integrator.settings())
    }

    /// Surface grids; a trajectory that stopped early is still returned and
    /// flagged in `trajectory.complete`.
    pub fn compute_surface(&self) -> Result<JsValue, JsValue> {
        let payload = compute_surface_payload(&self.integrator, false).map_err(to_js_error)?;
        serialize(&payload)
    }

    /// Fails if either direction stopped before its target time.
    pub fn compute_complete_surface(&self) -> Result<JsValue, JsValue> {
        let payload = compute_surface_payload(&self.integrator, true).map_err(to_js_error)?;
        serialize(&payload)
    }

    /// Flat `[x, y, z, ...]` vertex buffer of the surface, ready for a GPU upload.
    pub fn compute_vertices(&self) -> Result<Float64Array, JsValue> {
        let vertices = compute_vertex_buffer(&self.integrator).map_err(to_js_error)?;
        Ok(Float64Array::from(vertices.as_slice()))
    }

    pub fn angles(&self) -> Float64Array {
        Float64Array::from(self.integrator.angular_grid().angles())
    }

    pub fn compute_trajectory(&self) -> Result<JsValue, JsValue> {
        let payload = compute_trajectory_payload(&self.integrator).map_err(to_js_error)?;
        serialize(&payload)
    }
}

/// K = sign(3 sigma_0 - q_0 - 1) and Lambda = 3 (sigma_0 - q_0), plus the curvature class.
#[wasm_bindgen]
pub fn derive_parameters(sigma_0: f64, q_0: f64) -> Result<JsValue, JsValue> {
    let params = CosmologicalParameters::from_density_and_deceleration(sigma_0, q_0)
        .map_err(|e| to_js_error(e.into()))?;
    serialize(&ParametersPayload::from(&params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_integrator_rejects_single_angle() {
        let params =
            CosmologicalParameters::from_density_and_deceleration(0.5, 0.5).expect("params");
        let settings = IntegratorSettings {
            angular_samples: 1,
            ..IntegratorSettings::default()
        };
        let err = build_integrator(params, settings).err().expect("should fail");
        assert!(err.to_string().contains("angular_samples"));
    }

    #[test]
    fn build_integrator_keeps_supplied_parameters() {
        let params = CosmologicalParameters::new(0.3, -0.1, 0.0, 1.2).expect("params");
        let integrator =
            build_integrator(params, IntegratorSettings::default()).expect("integrator");
        assert_eq!(integrator.parameters(), &params);
        assert_eq!(integrator.angular_grid().len(), 50);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn settings_value(angular_samples: usize) -> JsValue {
        let settings = IntegratorSettings {
            angular_samples,
            ..IntegratorSettings::default()
        };
        to_value(&settings).expect("settings")
    }

    #[wasm_bindgen_test]
    fn constructor_rejects_non_finite_sigma() {
        let result = WasmUniverse::new(f64::NAN, 0.5, 0.0, 0.0, JsValue::UNDEFINED);
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("sigma_0"));
    }

    #[wasm_bindgen_test]
    fn compute_surface_returns_serialized_grids() {
        let universe = WasmUniverse::from_density_and_deceleration(1.0, 0.5, settings_value(10))
            .expect("universe");
        let payload = universe.compute_surface().expect("surface");
        let columns = js_sys::Reflect::get(&payload, &JsValue::from_str("columns"))
            .expect("columns field")
            .as_f64();
        assert_eq!(columns, Some(10.0));
    }

    #[wasm_bindgen_test]
    fn vertex_buffer_has_three_values_per_grid_cell() {
        let universe = WasmUniverse::from_model("de Sitter", settings_value(4)).expect("universe");
        let vertices = universe.compute_vertices().expect("vertices");
        assert_eq!(vertices.length() % 12, 0);
        assert_eq!(universe.angles().length(), 4);
    }

    #[wasm_bindgen_test]
    fn complete_surface_fails_for_big_bang_models() {
        let universe =
            WasmUniverse::from_model("Closed matter", JsValue::UNDEFINED).expect("universe");
        assert!(universe.compute_surface().is_ok());
        assert!(universe.compute_complete_surface().is_err());
    }
}
