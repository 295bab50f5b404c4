//! Scale-factor trajectories: one adaptive integration per time direction,
//! stitched into a single time-ascending curve, then swept into a surface.

use crate::error::{ensure_finite, Result, UniverseError};
use crate::friedmann::{CosmologicalParameters, FriedmannSystem};
use crate::solvers::{integrate_adaptive, AdaptiveSettings, CancelToken, Stats, StopReason};
use crate::surface::{expand_to_surface, AngularGrid, Surface};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    /// Integrated from `.0` up to `.1`.
    pub forward_span: (f64, f64),
    /// Integrated from `.0` down to `.1`; `.0` must equal `forward_span.0`.
    pub backward_span: (f64, f64),
    /// (a, da/dt) at the shared start time.
    pub initial_state: [f64; 2],
    pub solver: AdaptiveSettings,
    pub angular_samples: usize,
    /// Repeat the 2pi azimuth so the swept surface closes without a seam.
    pub close_seam: bool,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            forward_span: (0.0, 6.0),
            backward_span: (0.0, -1.0),
            initial_state: [1.0, 1.0],
            solver: AdaptiveSettings::default(),
            angular_samples: AngularGrid::DEFAULT_SAMPLES,
            close_seam: false,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        let (f0, f1) = self.forward_span;
        let (b0, b1) = self.backward_span;
        for (name, value) in [
            ("forward_span.start", f0),
            ("forward_span.end", f1),
            ("backward_span.start", b0),
            ("backward_span.end", b1),
        ] {
            ensure_finite(name, value)?;
        }
        if f1 <= f0 {
            return Err(UniverseError::invalid(
                "forward_span",
                format!("end ({}) must be after start ({})", f1, f0),
            ));
        }
        if b1 >= b0 {
            return Err(UniverseError::invalid(
                "backward_span",
                format!("end ({}) must be before start ({})", b1, b0),
            ));
        }
        if b0 != f0 {
            return Err(UniverseError::invalid(
                "backward_span",
                format!("must start at the forward start time {}, got {}", f0, b0),
            ));
        }
        validate_initial_state(&self.initial_state)?;
        self.solver.validate()?;
        // Builds and discards the grid; the integrator keeps its own copy.
        AngularGrid::new(self.angular_samples, self.close_seam).map(|_| ())
    }
}

fn validate_initial_state(state: &[f64; 2]) -> Result<()> {
    ensure_finite("initial_state.scale_factor", state[0])?;
    ensure_finite("initial_state.rate", state[1])?;
    if state[0] <= 0.0 {
        return Err(UniverseError::invalid(
            "initial_state.scale_factor",
            format!("must be positive, got {}", state[0]),
        ));
    }
    Ok(())
}

/// How far one direction got.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrationStatus {
    Complete,
    /// Stopped early; samples up to `last_valid_time` are trustworthy.
    Partial {
        last_valid_time: f64,
        reason: StopReason,
    },
}

impl IntegrationStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, IntegrationStatus::Complete)
    }

    fn into_result(self) -> Result<()> {
        match self {
            IntegrationStatus::Complete => Ok(()),
            IntegrationStatus::Partial {
                last_valid_time,
                reason,
            } => Err(UniverseError::IntegrationDiverged {
                last_valid_time,
                reason,
            }),
        }
    }
}

/// Samples of a single-direction integration in solver-visit order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionalSolution {
    pub times: Vec<f64>,
    pub scale_factors: Vec<f64>,
    /// da/dt at each sample.
    pub expansion_rates: Vec<f64>,
    pub status: IntegrationStatus,
    pub stats: Stats,
}

/// Integrates the Friedmann equation over `time_span` in whichever direction
/// it points. Reaching a = 0 (or any other solver stop) yields a `Partial`
/// status rather than an error.
pub fn integrate(
    time_span: (f64, f64),
    initial_state: [f64; 2],
    sigma_0: f64,
    q_0: f64,
    settings: &AdaptiveSettings,
    cancel: Option<&CancelToken>,
) -> Result<DirectionalSolution> {
    ensure_finite("sigma_0", sigma_0)?;
    ensure_finite("q_0", q_0)?;
    validate_initial_state(&initial_state)?;

    let system = FriedmannSystem { sigma_0, q_0 };
    let solution = integrate_adaptive(
        &system,
        time_span,
        &initial_state,
        settings,
        |_t, y| y[0] > 0.0,
        cancel,
    )?;

    let status = match solution.stop_reason {
        None => IntegrationStatus::Complete,
        Some(reason) => {
            warn!(
                start = time_span.0,
                target = time_span.1,
                last_valid_time = solution.last_time(),
                %reason,
                "integration stopped early"
            );
            IntegrationStatus::Partial {
                last_valid_time: solution.last_time(),
                reason,
            }
        }
    };
    debug!(
        start = time_span.0,
        end = solution.last_time(),
        samples = solution.len(),
        accepted = solution.stats.accepted_steps,
        rejected = solution.stats.rejected_steps,
        fn_evals = solution.stats.fn_evals,
        "integrated Friedmann equation"
    );

    Ok(DirectionalSolution {
        scale_factors: solution.component(0),
        expansion_rates: solution.component(1),
        times: solution.times,
        status,
        stats: solution.stats,
    })
}

/// Time-ascending (time, scale factor) samples covering the backward and
/// forward integrations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    times: Vec<f64>,
    scale_factors: Vec<f64>,
    backward_status: IntegrationStatus,
    forward_status: IntegrationStatus,
    stats: Stats,
}

impl Trajectory {
    /// Wraps externally produced samples. Times must be strictly ascending.
    pub fn from_samples(times: Vec<f64>, scale_factors: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(UniverseError::invalid("times", "must not be empty"));
        }
        if times.len() != scale_factors.len() {
            return Err(UniverseError::invalid(
                "scale_factors",
                format!(
                    "length mismatch. Expected {}, got {}",
                    times.len(),
                    scale_factors.len()
                ),
            ));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(UniverseError::invalid("times", "must be strictly ascending"));
        }
        Ok(Self {
            times,
            scale_factors,
            backward_status: IntegrationStatus::Complete,
            forward_status: IntegrationStatus::Complete,
            stats: Stats::default(),
        })
    }

    /// `[reversed(backward), forward]`. Both directions start from the same
    /// sample, which is kept once.
    pub fn stitch(backward: DirectionalSolution, forward: DirectionalSolution) -> Self {
        let seam_shared = match (backward.times.first(), forward.times.first()) {
            (Some(b), Some(f)) => b == f,
            _ => false,
        };
        let skip = usize::from(seam_shared);

        let mut times = backward.times;
        let mut scale_factors = backward.scale_factors;
        times.reverse();
        scale_factors.reverse();
        times.extend_from_slice(&forward.times[skip..]);
        scale_factors.extend_from_slice(&forward.scale_factors[skip..]);

        Self {
            times,
            scale_factors,
            backward_status: backward.status,
            forward_status: forward.status,
            stats: backward.stats.merge(forward.stats),
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn scale_factors(&self) -> &[f64] {
        &self.scale_factors
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// (earliest, latest) sample time.
    pub fn time_range(&self) -> (f64, f64) {
        match (self.times.first(), self.times.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => (f64::NAN, f64::NAN),
        }
    }

    /// Pre-rotation vectors (a, 0, t): radius from the scale factor, height from time.
    pub fn profile(&self) -> Vec<Vector3<f64>> {
        self.times
            .iter()
            .zip(&self.scale_factors)
            .map(|(&t, &a)| Vector3::new(a, 0.0, t))
            .collect()
    }

    pub fn backward_status(&self) -> IntegrationStatus {
        self.backward_status
    }

    pub fn forward_status(&self) -> IntegrationStatus {
        self.forward_status
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn is_complete(&self) -> bool {
        self.backward_status.is_complete() && self.forward_status.is_complete()
    }

    /// Turns a partial trajectory into `IntegrationDiverged`, backward direction first.
    pub fn require_complete(self) -> Result<Self> {
        self.backward_status.into_result()?;
        self.forward_status.into_result()?;
        Ok(self)
    }
}

/// Trajectory for `sigma_0`, `q_0` with the default spans, initial state and tolerances.
pub fn build_trajectory(sigma_0: f64, q_0: f64) -> Result<Trajectory> {
    build_trajectory_with(sigma_0, q_0, &IntegratorSettings::default(), None)
}

pub fn build_trajectory_with(
    sigma_0: f64,
    q_0: f64,
    settings: &IntegratorSettings,
    cancel: Option<&CancelToken>,
) -> Result<Trajectory> {
    settings.validate()?;
    let run = |span: (f64, f64)| {
        integrate(
            span,
            settings.initial_state,
            sigma_0,
            q_0,
            &settings.solver,
            cancel,
        )
    };

    #[cfg(feature = "parallel")]
    let (backward, forward) = rayon::join(
        || run(settings.backward_span),
        || run(settings.forward_span),
    );
    #[cfg(not(feature = "parallel"))]
    let (backward, forward) = (run(settings.backward_span), run(settings.forward_span));

    Ok(Trajectory::stitch(backward?, forward?))
}

/// Output of one computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpacetimeSurface {
    pub parameters: CosmologicalParameters,
    pub trajectory: Trajectory,
    pub surface: Surface,
}

/// Parameters -> trajectory -> surface pipeline. Holds only immutable
/// configuration, so one value can serve any number of runs.
#[derive(Debug, Clone)]
pub struct TrajectoryIntegrator {
    parameters: CosmologicalParameters,
    settings: IntegratorSettings,
    grid: AngularGrid,
    cancel: Option<CancelToken>,
}

impl TrajectoryIntegrator {
    pub fn new(parameters: CosmologicalParameters, settings: IntegratorSettings) -> Result<Self> {
        parameters.validate()?;
        settings.validate()?;
        let grid = AngularGrid::new(settings.angular_samples, settings.close_seam)?;
        Ok(Self {
            parameters,
            settings,
            grid,
            cancel: None,
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn parameters(&self) -> &CosmologicalParameters {
        &self.parameters
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn angular_grid(&self) -> &AngularGrid {
        &self.grid
    }

    pub fn trajectory(&self) -> Result<Trajectory> {
        build_trajectory_with(
            self.parameters.sigma_0,
            self.parameters.q_0,
            &self.settings,
            self.cancel.as_ref(),
        )
    }

    /// Accepts partial trajectories; inspect `trajectory.is_complete()`.
    pub fn run(&self) -> Result<SpacetimeSurface> {
        let trajectory = self.trajectory()?;
        let surface = expand_to_surface(&trajectory, &self.grid);
        Ok(SpacetimeSurface {
            parameters: self.parameters,
            trajectory,
            surface,
        })
    }

    /// Like `run`, but early termination in either direction is an error.
    pub fn run_complete(&self) -> Result<SpacetimeSurface> {
        let trajectory = self.trajectory()?.require_complete()?;
        let surface = expand_to_surface(&trajectory, &self.grid);
        Ok(SpacetimeSurface {
            parameters: self.parameters,
            trajectory,
            surface,
        })
    }
}
