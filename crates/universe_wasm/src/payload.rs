//! Serializable views of core results for the JavaScript side.

use anyhow::{Context, Result};
use serde::Serialize;
use universe_core::solvers::Stats;
use universe_core::{
    CosmologicalParameters, CurvatureSign, IntegrationStatus, SpacetimeSurface, Surface,
    Trajectory, TrajectoryIntegrator,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ParametersPayload {
    pub sigma_0: f64,
    pub q_0: f64,
    pub curvature_sign: f64,
    pub lambda: f64,
    pub curvature: CurvatureSign,
}

impl From<&CosmologicalParameters> for ParametersPayload {
    fn from(params: &CosmologicalParameters) -> Self {
        Self {
            sigma_0: params.sigma_0,
            q_0: params.q_0,
            curvature_sign: params.curvature_sign,
            lambda: params.lambda,
            curvature: params.curvature(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TrajectoryPayload {
    pub times: Vec<f64>,
    pub scale_factors: Vec<f64>,
    pub backward: IntegrationStatus,
    pub forward: IntegrationStatus,
    pub complete: bool,
    pub stats: Stats,
}

impl From<&Trajectory> for TrajectoryPayload {
    fn from(trajectory: &Trajectory) -> Self {
        Self {
            times: trajectory.times().to_vec(),
            scale_factors: trajectory.scale_factors().to_vec(),
            backward: trajectory.backward_status(),
            forward: trajectory.forward_status(),
            complete: trajectory.is_complete(),
            stats: trajectory.stats(),
        }
    }
}

/// `x[row * columns + column]` is the coordinate of trajectory sample `row`
/// at angle `column`; same for `y` and `z`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SurfacePayload {
    pub rows: usize,
    pub columns: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub angles: Vec<f64>,
    pub parameters: ParametersPayload,
    pub trajectory: TrajectoryPayload,
}

pub(crate) fn surface_payload(result: &SpacetimeSurface, angles: &[f64]) -> SurfacePayload {
    let (rows, columns) = result.surface.shape();
    let [x, y, z] = result.surface.to_row_major();
    SurfacePayload {
        rows,
        columns,
        x,
        y,
        z,
        angles: angles.to_vec(),
        parameters: ParametersPayload::from(&result.parameters),
        trajectory: TrajectoryPayload::from(&result.trajectory),
    }
}

/// Interleaved `[x, y, z]` vertices, rows outer and angles inner.
pub(crate) fn vertex_buffer(surface: &Surface) -> Vec<f64> {
    let (rows, columns) = surface.shape();
    let mut vertices = Vec::with_capacity(rows * columns * 3);
    for row in 0..rows {
        for column in 0..columns {
            vertices.extend_from_slice(surface.point(row, column).as_slice());
        }
    }
    vertices
}

pub(crate) fn compute_surface_payload(
    integrator: &TrajectoryIntegrator,
    require_complete: bool,
) -> Result<SurfacePayload> {
    let result = if require_complete {
        integrator.run_complete()
    } else {
        integrator.run()
    }
    .context("Surface computation failed")?;
    Ok(surface_payload(&result, integrator.angular_grid().angles()))
}

pub(crate) fn compute_vertex_buffer(integrator: &TrajectoryIntegrator) -> Result<Vec<f64>> {
    let result = integrator.run().context("Surface computation failed")?;
    Ok(vertex_buffer(&result.surface))
}

pub(crate) fn compute_trajectory_payload(
    integrator: &TrajectoryIntegrator,
) -> Result<TrajectoryPayload> {
    let trajectory = integrator
        .trajectory()
        .context("Trajectory computation failed")?;
    Ok(TrajectoryPayload::from(&trajectory))
}
