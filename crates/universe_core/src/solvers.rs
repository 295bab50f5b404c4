use crate::error::{ensure_finite, Result, UniverseError};
use crate::traits::{DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Tsit5 tableau (Tsitouras 2011)
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;

const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;

const A41: f64 = 2.897153057105493;
const A42: f64 = -6.359448489975075;
const A43: f64 = 4.3622954328695815;

const A51: f64 = 5.325864828439257;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.4955393428898365;
const A54: f64 = -0.09249506636175525;

const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.028269050394068383;

// 5th order weights (also the last row of A, FSAL)
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436081;
const B6: f64 = 2.324710524099774;

// Difference between the 5th and embedded 4th order weights
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

/// Order of the embedded error estimator.
const ERROR_ESTIMATOR_ORDER: f64 = 4.0;

/// Stage evaluations per attempted step (k1 is reused from the previous step).
const STAGES_PER_ATTEMPT: u64 = 6;

/// Relative/absolute tolerance pair. A step is accepted when the RMS norm of
/// `err / (atol + rtol * max(|y|, |y_new|))` is below one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub tolerances: Tolerances,
    /// Budget of accepted steps per integration.
    pub max_steps: usize,
    /// Magnitude of the first step; chosen automatically when absent.
    pub first_step: Option<f64>,
    /// Upper bound on step magnitude; the span length when absent.
    pub max_step: Option<f64>,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_steps: 100_000,
            first_step: None,
            max_step: None,
        }
    }
}

impl AdaptiveSettings {
    pub fn validate(&self) -> Result<()> {
        let tol = self.tolerances;
        if !tol.rtol.is_finite() || tol.rtol < 0.0 {
            return Err(UniverseError::invalid(
                "rtol",
                format!("must be non-negative and finite, got {}", tol.rtol),
            ));
        }
        if !tol.atol.is_finite() || tol.atol <= 0.0 {
            return Err(UniverseError::invalid(
                "atol",
                format!("must be positive and finite, got {}", tol.atol),
            ));
        }
        if self.max_steps == 0 {
            return Err(UniverseError::invalid("max_steps", "must be at least 1"));
        }
        for (name, value) in [("first_step", self.first_step), ("max_step", self.max_step)] {
            if let Some(h) = value {
                if !h.is_finite() || h <= 0.0 {
                    return Err(UniverseError::invalid(
                        name,
                        format!("must be positive and finite, got {}", h),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Why an integration stopped before reaching its target time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The vector field or the state became NaN/infinite.
    NonFiniteState,
    /// A state was rejected by the caller-supplied admissibility check.
    ScaleFactorCollapse,
    /// The controller asked for a step below floating-point resolution.
    StepSizeTooSmall,
    MaxStepsExceeded,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::NonFiniteState => "non-finite state",
            StopReason::ScaleFactorCollapse => "scale factor reached zero",
            StopReason::StepSizeTooSmall => "required step size below floating-point spacing",
            StopReason::MaxStepsExceeded => "step budget exhausted",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Integration statistics for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub fn_evals: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
}

impl Stats {
    pub fn merge(self, other: Stats) -> Stats {
        Stats {
            fn_evals: self.fn_evals + other.fn_evals,
            accepted_steps: self.accepted_steps + other.accepted_steps,
            rejected_steps: self.rejected_steps + other.rejected_steps,
        }
    }
}

/// Shared flag polled between steps. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Accepted samples of one adaptive integration, in solver-visit order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveSolution {
    pub dimension: usize,
    pub times: Vec<f64>,
    /// Row-major, `dimension` values per sample.
    pub states: Vec<f64>,
    /// `None` when the target time was reached.
    pub stop_reason: Option<StopReason>,
    pub stats: Stats,
}

impl AdaptiveSolution {
    fn new(t0: f64, y0: &[f64]) -> Self {
        Self {
            dimension: y0.len(),
            times: vec![t0],
            states: y0.to_vec(),
            stop_reason: None,
            stats: Stats::default(),
        }
    }

    fn push(&mut self, t: f64, y: &[f64]) {
        self.times.push(t);
        self.states.extend_from_slice(y);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn state(&self, index: usize) -> &[f64] {
        &self.states[index * self.dimension..(index + 1) * self.dimension]
    }

    /// Values of one state component across all samples.
    pub fn component(&self, component: usize) -> Vec<f64> {
        self.states
            .chunks_exact(self.dimension)
            .map(|state| state[component])
            .collect()
    }

    pub fn last_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(f64::NAN)
    }
}

/// Step-size controller using an I-controller
///
/// h_new = safety * h * error^(-1/(q+1)), q = order of the error estimator
#[derive(Debug, Clone, Copy)]
pub struct StepController {
    pub safety: f64,
    /// Maximum growth factor per step
    pub max_factor: f64,
    /// Minimum reduction factor per step
    pub min_factor: f64,
    exponent: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            max_factor: 10.0,
            min_factor: 0.2,
            exponent: 1.0 / (ERROR_ESTIMATOR_ORDER + 1.0),
        }
    }
}

impl StepController {
    /// Factor applied after an accepted step with normalized error `error < 1`.
    pub fn accept_factor(&self, error: f64, after_rejection: bool) -> f64 {
        let factor = if error == 0.0 {
            self.max_factor
        } else {
            (self.safety * error.powf(-self.exponent)).min(self.max_factor)
        };
        // No growth straight after a rejection.
        if after_rejection {
            factor.min(1.0)
        } else {
            factor
        }
    }

    /// Factor applied after a rejected step. Non-finite errors shrink maximally.
    pub fn reject_factor(&self, error: f64) -> f64 {
        if !error.is_finite() {
            return self.min_factor;
        }
        (self.safety * error.powf(-self.exponent)).max(self.min_factor)
    }
}

fn coefficient<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// The tableau converted once into the stepper's scalar type.
#[derive(Debug, Clone, Copy)]
struct Tableau<T> {
    c: [T; 4],
    a2: T,
    a3: [T; 2],
    a4: [T; 3],
    a5: [T; 4],
    a6: [T; 5],
    b: [T; 6],
    e: [T; 7],
}

impl<T: Scalar> Tableau<T> {
    fn new() -> Self {
        let convert =
            |values: &[f64]| -> Vec<T> { values.iter().map(|&v| coefficient(v)).collect() };
        let c = convert(&[C2, C3, C4, C5]);
        let a3 = convert(&[A31, A32]);
        let a4 = convert(&[A41, A42, A43]);
        let a5 = convert(&[A51, A52, A53, A54]);
        let a6 = convert(&[A61, A62, A63, A64, A65]);
        let b = convert(&[B1, B2, B3, B4, B5, B6]);
        let e = convert(&[E1, E2, E3, E4, E5, E6, E7]);
        Self {
            c: [c[0], c[1], c[2], c[3]],
            a2: coefficient(A21),
            a3: [a3[0], a3[1]],
            a4: [a4[0], a4[1], a4[2]],
            a5: [a5[0], a5[1], a5[2], a5[3]],
            a6: [a6[0], a6[1], a6[2], a6[3], a6[4]],
            b: [b[0], b[1], b[2], b[3], b[4], b[5]],
            e: [e[0], e[1], e[2], e[3], e[4], e[5], e[6]],
        }
    }
}

/// Tsitouras 5(4) stepper with embedded error estimate and FSAL reuse.
pub struct Tsit5<T: Scalar> {
    tableau: Tableau<T>,
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            tableau: Tableau::new(),
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
        }
    }

    /// Evaluates f(t, state) into k1. Must be called before the first attempt.
    pub fn prime(&mut self, system: &impl DynamicalSystem<T>, t: T, state: &[T]) {
        system.apply(t, state, &mut self.k1);
    }

    /// f(t, y) at the current accepted point.
    pub fn derivative(&self) -> &[T] {
        &self.k1
    }

    /// Computes a trial step of size `dt` into `out`; k7 ends up holding f(t + dt, out).
    pub fn attempt(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
    ) {
        let n = state.len();
        let tab = self.tableau;

        // k2
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (tab.a2 * self.k1[i]);
        }
        system.apply(t + tab.c[0] * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..n {
            self.tmp[i] = state[i] + dt * (tab.a3[0] * self.k1[i] + tab.a3[1] * self.k2[i]);
        }
        system.apply(t + tab.c[1] * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (tab.a4[0] * self.k1[i] + tab.a4[1] * self.k2[i] + tab.a4[2] * self.k3[i]);
        }
        system.apply(t + tab.c[2] * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (tab.a5[0] * self.k1[i]
                    + tab.a5[1] * self.k2[i]
                    + tab.a5[2] * self.k3[i]
                    + tab.a5[3] * self.k4[i]);
        }
        system.apply(t + tab.c[3] * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (tab.a6[0] * self.k1[i]
                    + tab.a6[1] * self.k2[i]
                    + tab.a6[2] * self.k3[i]
                    + tab.a6[3] * self.k4[i]
                    + tab.a6[4] * self.k5[i]);
        }
        system.apply(t + dt, &self.tmp, &mut self.k6);

        for i in 0..n {
            out[i] = state[i]
                + dt * (tab.b[0] * self.k1[i]
                    + tab.b[1] * self.k2[i]
                    + tab.b[2] * self.k3[i]
                    + tab.b[3] * self.k4[i]
                    + tab.b[4] * self.k5[i]
                    + tab.b[5] * self.k6[i]);
        }

        // k7 = f(t + dt, y_new), reused as k1 of the next step
        system.apply(t + dt, out, &mut self.k7);
    }

    /// Embedded estimate of the local error of the last attempt, per component.
    pub fn local_error(&self, dt: T, out: &mut [T]) {
        let e = &self.tableau.e;
        for (i, err) in out.iter_mut().enumerate() {
            *err = dt
                * (e[0] * self.k1[i]
                    + e[1] * self.k2[i]
                    + e[2] * self.k3[i]
                    + e[3] * self.k4[i]
                    + e[4] * self.k5[i]
                    + e[5] * self.k6[i]
                    + e[6] * self.k7[i]);
        }
    }

    /// RMS norm of the scaled local error of the last attempt.
    pub fn error_norm(&self, state: &[T], proposed: &[T], dt: T, tol: &Tolerances) -> T {
        let n = state.len();
        let atol: T = coefficient(tol.atol);
        let rtol: T = coefficient(tol.rtol);
        let mut errors = vec![T::zero(); n];
        self.local_error(dt, &mut errors);
        let mut sum = T::zero();
        for i in 0..n {
            let scale = atol + rtol * state[i].abs().max(proposed[i].abs());
            let scaled = errors[i] / scale;
            sum = sum + scaled * scaled;
        }
        let count: T = coefficient(n as f64);
        (sum / count).sqrt()
    }

    /// Promotes the last attempt's end-point derivative to k1.
    pub fn accept(&mut self) {
        std::mem::swap(&mut self.k1, &mut self.k7);
    }
}

/// Integrates `system` from `span.0` to `span.1` (either direction) with
/// adaptive Tsit5 steps, recording every accepted sample.
///
/// Early termination is not an error: the returned solution holds the prefix
/// that was integrated and `stop_reason` says why it ended. `admissible` is
/// checked on every trial state; an inadmissible or non-finite trial is
/// rejected like an oversized step, so the integration closes in on the
/// boundary until the step falls below floating-point resolution.
pub fn integrate_adaptive<S, G>(
    system: &S,
    span: (f64, f64),
    initial_state: &[f64],
    settings: &AdaptiveSettings,
    admissible: G,
    cancel: Option<&CancelToken>,
) -> Result<AdaptiveSolution>
where
    S: DynamicalSystem<f64>,
    G: Fn(f64, &[f64]) -> bool,
{
    let (t0, tf) = span;
    ensure_finite("span.start", t0)?;
    ensure_finite("span.end", tf)?;
    if t0 == tf {
        return Err(UniverseError::invalid("span", "must have nonzero length"));
    }
    settings.validate()?;
    let dim = system.dimension();
    if initial_state.len() != dim {
        return Err(UniverseError::invalid(
            "initial_state",
            format!(
                "dimension mismatch. Expected {}, got {}",
                dim,
                initial_state.len()
            ),
        ));
    }
    if let Some(i) = initial_state.iter().position(|v| !v.is_finite()) {
        return Err(UniverseError::invalid(
            "initial_state",
            format!("component {} is not finite", i),
        ));
    }

    let tol = settings.tolerances;
    let controller = StepController::default();
    let direction = (tf - t0).signum();
    let span_length = (tf - t0).abs();
    let max_step = settings.max_step.unwrap_or(span_length).min(span_length);

    let mut solution = AdaptiveSolution::new(t0, initial_state);
    let mut stepper = Tsit5::<f64>::new(dim);
    stepper.prime(system, t0, initial_state);
    solution.stats.fn_evals += 1;

    if !all_finite(stepper.derivative()) {
        solution.stop_reason = Some(StopReason::NonFiniteState);
        return Ok(solution);
    }
    if !admissible(t0, initial_state) {
        solution.stop_reason = Some(StopReason::ScaleFactorCollapse);
        return Ok(solution);
    }

    let mut h_abs = match settings.first_step {
        Some(h) => h.min(max_step),
        None => {
            solution.stats.fn_evals += 1;
            initial_step_size(
                system,
                t0,
                initial_state,
                stepper.derivative(),
                direction,
                &tol,
                max_step,
            )
        }
    };

    let mut t = t0;
    let mut y = initial_state.to_vec();
    let mut y_new = vec![0.0; dim];
    let mut accepted_steps = 0usize;

    'outer: while (tf - t) * direction > 0.0 {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            solution.stop_reason = Some(StopReason::Cancelled);
            break;
        }
        if accepted_steps >= settings.max_steps {
            solution.stop_reason = Some(StopReason::MaxStepsExceeded);
            break;
        }

        let min_step = minimum_step(t);
        h_abs = h_abs.clamp(min_step, max_step.max(min_step));
        let mut rejected = false;
        let mut stop_cause = StopReason::StepSizeTooSmall;

        let t_new = loop {
            if h_abs < min_step {
                solution.stop_reason = Some(stop_cause);
                break 'outer;
            }

            let mut t_new = t + h_abs * direction;
            if (t_new - tf) * direction > 0.0 {
                t_new = tf;
            }
            let h = t_new - t;
            h_abs = h.abs();

            stepper.attempt(system, t, &y, h, &mut y_new);
            solution.stats.fn_evals += STAGES_PER_ATTEMPT;

            let rejection = if !all_finite(&y_new) {
                Some(StopReason::NonFiniteState)
            } else if !admissible(t_new, &y_new) {
                Some(StopReason::ScaleFactorCollapse)
            } else {
                None
            };
            let error = match rejection {
                Some(_) => f64::INFINITY,
                None => stepper.error_norm(&y, &y_new, h, &tol),
            };

            if error < 1.0 {
                h_abs *= controller.accept_factor(error, rejected);
                break t_new;
            }

            // NaN errors land here too
            stop_cause = rejection.unwrap_or(if error.is_nan() {
                StopReason::NonFiniteState
            } else {
                StopReason::StepSizeTooSmall
            });
            h_abs *= controller.reject_factor(error);
            rejected = true;
            solution.stats.rejected_steps += 1;
        };

        accepted_steps += 1;
        solution.stats.accepted_steps += 1;

        t = t_new;
        y.copy_from_slice(&y_new);
        stepper.accept();
        solution.push(t, &y);
    }

    Ok(solution)
}

/// Hairer-Norsett-Wanner starting step heuristic.
fn initial_step_size<S: DynamicalSystem<f64>>(
    system: &S,
    t0: f64,
    y0: &[f64],
    f0: &[f64],
    direction: f64,
    tol: &Tolerances,
    max_step: f64,
) -> f64 {
    let dim = y0.len();
    let scale: Vec<f64> = y0.iter().map(|y| tol.atol + y.abs() * tol.rtol).collect();

    let d0 = rms_scaled(y0, &scale);
    let d1 = rms_scaled(f0, &scale);
    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    }
    .min(max_step);

    let y1: Vec<f64> = y0
        .iter()
        .zip(f0)
        .map(|(y, f)| y + h0 * direction * f)
        .collect();
    let mut f1 = vec![0.0; dim];
    system.apply(t0 + h0 * direction, &y1, &mut f1);
    let diff: Vec<f64> = f1.iter().zip(f0).map(|(a, b)| a - b).collect();
    let d2 = rms_scaled(&diff, &scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / (ERROR_ESTIMATOR_ORDER + 1.0))
    };

    // f64::min ignores a NaN h1 coming from a non-finite probe.
    (100.0 * h0).min(h1).min(max_step)
}

fn rms_scaled(values: &[f64], scale: &[f64]) -> f64 {
    let sum: f64 = values
        .iter()
        .zip(scale)
        .map(|(v, s)| (v / s) * (v / s))
        .sum();
    (sum / values.len() as f64).sqrt()
}

/// Smallest step that still moves `t` by more than a few ulps.
fn minimum_step(t: f64) -> f64 {
    10.0 * (t.abs() * f64::EPSILON).max(f64::MIN_POSITIVE)
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
