//! The `universe_core` crate integrates the Friedmann equation for the
//! normalized scale factor of a uniform isotropic universe and sweeps the
//! resulting trajectory into a spacetime surface of revolution.
//!
//! Key components:
//! - **Traits**: `Scalar` (numeric type abstraction), `DynamicalSystem` (first-order ODEs).
//! - **Solvers**: adaptive Tsit5 integration with embedded error control.
//! - **Friedmann**: the equation model, derived parameters and the axis rotation.
//! - **Trajectory**: forward/backward integration stitched into one time-ascending curve.
//! - **Surface**: angular sampling and the (M, N) coordinate grids handed to renderers.
pub mod error;
pub mod friedmann;
pub mod solvers;
pub mod surface;
pub mod traits;
pub mod trajectory;

pub use error::{Result, UniverseError};
pub use friedmann::{ode_right_hand_side, rotate, CosmologicalParameters, CurvatureSign};
pub use surface::{expand_to_surface, AngularGrid, Surface};
pub use trajectory::{
    build_trajectory, integrate, IntegrationStatus, IntegratorSettings, SpacetimeSurface,
    Trajectory, TrajectoryIntegrator,
};
