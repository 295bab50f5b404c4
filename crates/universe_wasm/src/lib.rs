//! WASM bridge for `universe_core`.
//!
//! The UI supplies sigma_0, q_0, K and Lambda (or a model preset name) and
//! receives the x, y, z grids of the spacetime surface as flat row-major
//! arrays together with the trajectory they were swept from.

mod payload;
mod presets;
mod universe;

pub use presets::{builtin_model_presets, model_names, model_parameters, ModelPreset};
pub use universe::{derive_parameters, WasmUniverse};
