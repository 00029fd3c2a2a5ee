//! Moré–Thuente line search driven by reverse communication.
//!
//! The search only sees the one-dimensional function `phi(t) = f(x0 + t·d)`:
//! the caller evaluates `phi(t)` and `phi'(t)` at each requested step and
//! feeds them back through [`LineSearch::iterate`]. A step is accepted when it
//! satisfies the strong Wolfe conditions
//!
//! - `phi(t) <= phi(0) + ftol·t·phi'(0)` (sufficient decrease),
//! - `|phi'(t)| <= gtol·|phi'(0)|` (curvature).
//!
//! Otherwise a new trial step is chosen by safeguarded cubic and quadratic
//! interpolation inside an interval of uncertainty, following J. J. Moré and
//! D. J. Thuente, "Line search algorithms with guaranteed sufficient
//! decrease", ACM TOMS 20 (1994).

const XTRAPL: f64 = 1.1;
const XTRAPU: f64 = 4.0;

/// Recoverable endings: the last or best step may still be usable.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LineSearchWarning {
    #[error("rounding errors prevent progress")]
    RoundingErrors,
    #[error("relative width of the interval of uncertainty is at most sxtol")]
    XtolSatisfied,
    #[error("the step reached the maximum step length")]
    StepAtMax,
    #[error("the step reached the minimum step length")]
    StepAtMin,
}

/// Endings after which the search cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LineSearchError {
    #[error("the search direction is not a descent direction (initial slope {0:e})")]
    NotDescent(f64),
    #[error("initial step {0:e} is outside the allowed step range")]
    StepOutOfRange(f64),
    #[error("no acceptable step after {0} evaluations")]
    TooManyEvaluations(usize),
    #[error("the line search was not started")]
    NotStarted,
}

/// What the caller has to do next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineSearchStatus {
    /// Evaluate the objective and its slope at the given step.
    Evaluate(f64),
    /// The current step satisfies both conditions.
    Converged,
    Warning(LineSearchWarning),
    Error(LineSearchError),
}

#[derive(Debug, Clone, Copy)]
struct SearchState {
    brackt: bool,
    // Switches to `false` once a step with psi(t) <= 0 and phi'(t) >= 0 is seen.
    modified: bool,
    finit: f64,
    ginit: f64,
    gtest: f64,
    width: f64,
    width1: f64,
    stx: f64,
    fx: f64,
    gx: f64,
    sty: f64,
    fy: f64,
    gy: f64,
    stmin: f64,
    stmax: f64,
}

/// Configuration and state of one line search.
#[derive(Debug, Clone)]
pub struct LineSearch {
    ftol: f64,
    gtol: f64,
    xtol: f64,
    stpmin: f64,
    stpmax: f64,
    max_evals: usize,
    stp: f64,
    evals: usize,
    state: Option<SearchState>,
}

impl LineSearch {
    pub fn new(ftol: f64, gtol: f64, xtol: f64) -> Self {
        Self {
            ftol,
            gtol,
            xtol,
            stpmin: 1e-20,
            stpmax: 1e20,
            max_evals: 30,
            stp: 0.0,
            evals: 0,
            state: None,
        }
    }

    pub fn with_step_limits(mut self, stpmin: f64, stpmax: f64) -> Self {
        self.stpmin = stpmin;
        self.stpmax = stpmax;
        self
    }

    pub fn with_max_evaluations(mut self, max_evals: usize) -> Self {
        self.max_evals = max_evals.max(1);
        self
    }

    /// Step currently being tried, or the accepted step after convergence.
    pub fn step(&self) -> f64 {
        self.stp
    }

    /// End point `stx` of the interval of uncertainty. While the search
    /// still works on the auxiliary function psi this is the step with the
    /// lowest psi, which need not be the lowest objective value.
    pub fn best_step(&self) -> f64 {
        self.state.map_or(0.0, |s| s.stx)
    }

    /// Trial evaluations consumed by the current search.
    pub fn evaluations(&self) -> usize {
        self.evals
    }

    /// Starts a new search from `phi(0) = f0`, `phi'(0) = g0` with first trial
    /// step `stp`.
    pub fn start(&mut self, stp: f64, f0: f64, g0: f64) -> LineSearchStatus {
        self.state = None;
        self.evals = 0;
        self.stp = stp;
        if !(stp >= self.stpmin && stp <= self.stpmax) {
            return LineSearchStatus::Error(LineSearchError::StepOutOfRange(stp));
        }
        if !(g0 < 0.0) {
            return LineSearchStatus::Error(LineSearchError::NotDescent(g0));
        }
        let width = self.stpmax - self.stpmin;
        self.state = Some(SearchState {
            brackt: false,
            modified: true,
            finit: f0,
            ginit: g0,
            gtest: self.ftol * g0,
            width,
            width1: 2.0 * width,
            stx: 0.0,
            fx: f0,
            gx: g0,
            sty: 0.0,
            fy: f0,
            gy: g0,
            stmin: 0.0,
            stmax: stp + XTRAPU * stp,
        });
        LineSearchStatus::Evaluate(stp)
    }

    /// Feeds `phi(stp)` and `phi'(stp)` for the step last requested.
    pub fn iterate(&mut self, f: f64, g: f64) -> LineSearchStatus {
        let Some(mut s) = self.state else {
            return LineSearchStatus::Error(LineSearchError::NotStarted);
        };
        self.evals += 1;
        let stp = self.stp;
        let ftest = s.finit + stp * s.gtest;
        if s.modified && f <= ftest && g >= 0.0 {
            s.modified = false;
        }

        // Later tests take precedence over earlier ones.
        let mut outcome = None;
        if s.brackt && (stp <= s.stmin || stp >= s.stmax) {
            outcome = Some(LineSearchStatus::Warning(LineSearchWarning::RoundingErrors));
        }
        if s.brackt && s.stmax - s.stmin <= self.xtol * s.stmax {
            outcome = Some(LineSearchStatus::Warning(LineSearchWarning::XtolSatisfied));
        }
        if stp == self.stpmax && f <= ftest && g <= s.gtest {
            outcome = Some(LineSearchStatus::Warning(LineSearchWarning::StepAtMax));
        }
        if stp == self.stpmin && (f > ftest || g >= s.gtest) {
            outcome = Some(LineSearchStatus::Warning(LineSearchWarning::StepAtMin));
        }
        if f <= ftest && g.abs() <= self.gtol * (-s.ginit) {
            outcome = Some(LineSearchStatus::Converged);
        }
        if let Some(status) = outcome {
            return self.finish(s, status);
        }
        if self.evals >= self.max_evals {
            return self.finish(
                s,
                LineSearchStatus::Error(LineSearchError::TooManyEvaluations(self.evals)),
            );
        }

        let mut next = stp;
        if s.modified && f <= s.fx && f > ftest {
            // Work with psi(t) = phi(t) - phi(0) - ftol·t·phi'(0) until a step
            // with psi(t) <= 0 and phi'(t) >= 0 is found.
            let mut fxm = s.fx - s.stx * s.gtest;
            let mut fym = s.fy - s.sty * s.gtest;
            let mut gxm = s.gx - s.gtest;
            let mut gym = s.gy - s.gtest;
            let fm = f - stp * s.gtest;
            let gm = g - s.gtest;
            cstep(
                &mut s.stx,
                &mut fxm,
                &mut gxm,
                &mut s.sty,
                &mut fym,
                &mut gym,
                &mut next,
                fm,
                gm,
                &mut s.brackt,
                s.stmin,
                s.stmax,
            );
            s.fx = fxm + s.stx * s.gtest;
            s.fy = fym + s.sty * s.gtest;
            s.gx = gxm + s.gtest;
            s.gy = gym + s.gtest;
        } else {
            cstep(
                &mut s.stx,
                &mut s.fx,
                &mut s.gx,
                &mut s.sty,
                &mut s.fy,
                &mut s.gy,
                &mut next,
                f,
                g,
                &mut s.brackt,
                s.stmin,
                s.stmax,
            );
        }

        // Force a sufficient decrease in the size of the interval.
        if s.brackt {
            if (s.sty - s.stx).abs() >= 0.66 * s.width1 {
                next = s.stx + 0.5 * (s.sty - s.stx);
            }
            s.width1 = s.width;
            s.width = (s.sty - s.stx).abs();
            s.stmin = s.stx.min(s.sty);
            s.stmax = s.stx.max(s.sty);
        } else {
            s.stmin = next + XTRAPL * (next - s.stx);
            s.stmax = next + XTRAPU * (next - s.stx);
        }

        next = next.clamp(self.stpmin, self.stpmax);
        // Fall back to the best step if no further progress is possible.
        if s.brackt && (next <= s.stmin || next >= s.stmax || s.stmax - s.stmin <= self.xtol * s.stmax)
        {
            next = s.stx;
        }
        self.stp = next;
        self.state = Some(s);
        LineSearchStatus::Evaluate(next)
    }

    fn finish(&mut self, s: SearchState, status: LineSearchStatus) -> LineSearchStatus {
        self.state = Some(s);
        status
    }
}

/// Safeguarded step update (the `dcstep` routine of MINPACK-2).
///
/// `(stx, fx, dx)` is the best step so far, `(sty, fy, dy)` the other end of
/// the interval of uncertainty and `(stp, fp, dp)` the current trial. On exit
/// the interval is updated and `stp` holds the next trial, kept in
/// `[stpmin, stpmax]`.
#[allow(clippy::too_many_arguments)]
fn cstep(
    stx: &mut f64,
    fx: &mut f64,
    dx: &mut f64,
    sty: &mut f64,
    fy: &mut f64,
    dy: &mut f64,
    stp: &mut f64,
    fp: f64,
    dp: f64,
    brackt: &mut bool,
    stpmin: f64,
    stpmax: f64,
) {
    let sgnd = dp * (*dx / dx.abs());
    let t = *stp;

    let stpf = if fp > *fx {
        // Higher function value: the minimum is bracketed. Take the cubic
        // step if it is closer to stx, otherwise the mean of both steps.
        let theta = 3.0 * (*fx - fp) / (t - *stx) + *dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (*dx / s) * (dp / s)).sqrt();
        if t < *stx {
            gamma = -gamma;
        }
        let p = (gamma - *dx) + theta;
        let q = ((gamma - *dx) + gamma) + dp;
        let stpc = *stx + (p / q) * (t - *stx);
        let stpq = *stx + ((*dx / ((*fx - fp) / (t - *stx) + *dx)) / 2.0) * (t - *stx);
        *brackt = true;
        if (stpc - *stx).abs() < (stpq - *stx).abs() {
            stpc
        } else {
            stpc + (stpq - stpc) / 2.0
        }
    } else if sgnd < 0.0 {
        // Derivatives of opposite sign: bracketed. Take whichever of the
        // cubic and secant steps lies farther from stp.
        let theta = 3.0 * (*fx - fp) / (t - *stx) + *dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (*dx / s) * (dp / s)).sqrt();
        if t > *stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + *dx;
        let stpc = t + (p / q) * (*stx - t);
        let stpq = t + (dp / (dp - *dx)) * (*stx - t);
        *brackt = true;
        if (stpc - t).abs() > (stpq - t).abs() {
            stpc
        } else {
            stpq
        }
    } else if dp.abs() < dx.abs() {
        // Same sign, decreasing magnitude of the derivative.
        let theta = 3.0 * (*fx - fp) / (t - *stx) + *dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (*dx / s) * (dp / s)).max(0.0).sqrt();
        if t > *stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = (gamma + (*dx - dp)) + gamma;
        let r = p / q;
        let stpc = if r < 0.0 && gamma != 0.0 {
            t + r * (*stx - t)
        } else if t > *stx {
            stpmax
        } else {
            stpmin
        };
        let stpq = t + (dp / (dp - *dx)) * (*stx - t);
        if *brackt {
            let stpf = if (stpc - t).abs() < (stpq - t).abs() {
                stpc
            } else {
                stpq
            };
            let limit = t + 0.66 * (*sty - t);
            if t > *stx {
                stpf.min(limit)
            } else {
                stpf.max(limit)
            }
        } else {
            let stpf = if (stpc - t).abs() > (stpq - t).abs() {
                stpc
            } else {
                stpq
            };
            stpf.clamp(stpmin, stpmax)
        }
    } else if *brackt {
        // Same sign, non-decreasing magnitude, bracketed: cubic through
        // stp and sty.
        let theta = 3.0 * (fp - *fy) / (*sty - t) + *dy + dp;
        let s = theta.abs().max(dy.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (*dy / s) * (dp / s)).sqrt();
        if t > *sty {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + *dy;
        t + (p / q) * (*sty - t)
    } else if t > *stx {
        stpmax
    } else {
        stpmin
    };

    if fp > *fx {
        *sty = t;
        *fy = fp;
        *dy = dp;
    } else {
        if sgnd < 0.0 {
            *sty = *stx;
            *fy = *fx;
            *dy = *dx;
        }
        *stx = t;
        *fx = fp;
        *dx = dp;
    }
    *stp = stpf;
}

#[cfg(test)]
mod tests {
    use super::{LineSearch, LineSearchError, LineSearchStatus, LineSearchWarning};
    use spectral::prelude::*;

    // Runs a search on phi until it stops, returning the final status and step.
    fn drive<F>(ls: &mut LineSearch, stp: f64, phi: F) -> (LineSearchStatus, f64)
    where
        F: Fn(f64) -> (f64, f64),
    {
        let (f0, g0) = phi(0.0);
        let mut status = ls.start(stp, f0, g0);
        while let LineSearchStatus::Evaluate(t) = status {
            let (f, g) = phi(t);
            status = ls.iterate(f, g);
        }
        (status, ls.step())
    }

    #[test]
    fn accepts_unit_step_on_well_scaled_quadratic() {
        // phi(t) = (t - 1)^2, exact minimizer at t = 1.
        let mut ls = LineSearch::new(1e-3, 0.9, 0.1);
        let (status, stp) = drive(&mut ls, 1.0, |t| ((t - 1.0).powi(2), 2.0 * (t - 1.0)));
        assert_eq!(status, LineSearchStatus::Converged);
        assert_that!(&stp).is_close_to(1.0, 1e-12);
        assert_eq!(ls.evaluations(), 1);
    }

    #[test]
    fn extrapolates_when_first_step_is_too_short() {
        // Minimizer at t = 100; a tight curvature test forces extrapolation.
        let mut ls = LineSearch::new(1e-3, 0.1, 0.1);
        let phi = |t: f64| ((t - 100.0).powi(2), 2.0 * (t - 100.0));
        let (status, stp) = drive(&mut ls, 1.0, phi);
        assert_eq!(status, LineSearchStatus::Converged);
        let (f, g) = phi(stp);
        let (f0, g0) = phi(0.0);
        assert!(f <= f0 + 1e-3 * stp * g0);
        assert!(g.abs() <= 0.1 * g0.abs());
        assert!(ls.evaluations() > 1);
    }

    #[test]
    fn interpolates_when_first_step_overshoots() {
        // Minimizer at t = 0.01.
        let mut ls = LineSearch::new(1e-3, 0.9, 0.0);
        let phi = |t: f64| ((t - 0.01).powi(2), 2.0 * (t - 0.01));
        let (status, stp) = drive(&mut ls, 1.0, phi);
        assert_eq!(status, LineSearchStatus::Converged);
        assert!(stp < 0.02);
        let (f, _) = phi(stp);
        assert!(f < phi(0.0).0);
    }

    #[test]
    fn ascent_direction_is_an_error() {
        let mut ls = LineSearch::new(1e-3, 0.9, 0.1);
        assert_eq!(
            ls.start(1.0, 0.0, 2.0),
            LineSearchStatus::Error(LineSearchError::NotDescent(2.0))
        );
        assert_eq!(
            ls.iterate(0.0, 0.0),
            LineSearchStatus::Error(LineSearchError::NotStarted)
        );
    }

    #[test]
    fn step_outside_limits_is_an_error() {
        let mut ls = LineSearch::new(1e-3, 0.9, 0.1).with_step_limits(1e-3, 10.0);
        assert!(matches!(
            ls.start(20.0, 0.0, -1.0),
            LineSearchStatus::Error(LineSearchError::StepOutOfRange(_))
        ));
    }

    #[test]
    fn evaluation_budget_is_enforced() {
        // Linear decrease never satisfies the curvature condition.
        let mut ls = LineSearch::new(1e-3, 0.1, 0.0).with_max_evaluations(4);
        let (status, stp) = drive(&mut ls, 1.0, |t| (-t, -1.0));
        assert_eq!(
            status,
            LineSearchStatus::Error(LineSearchError::TooManyEvaluations(4))
        );
        // Trials 1, 5, 21, 85: each extrapolates four times the last jump.
        assert_that!(&stp).is_close_to(85.0, 1e-12);
        assert_eq!(ls.evaluations(), 4);
    }

    #[test]
    fn unbounded_decrease_stops_at_max_step() {
        let mut ls = LineSearch::new(1e-3, 0.1, 0.0)
            .with_step_limits(1e-20, 50.0)
            .with_max_evaluations(100);
        let (status, stp) = drive(&mut ls, 1.0, |t| (-t, -1.0));
        assert_eq!(status, LineSearchStatus::Warning(LineSearchWarning::StepAtMax));
        assert_that!(&stp).is_close_to(50.0, 1e-12);
    }

    #[test]
    fn wide_sxtol_stops_on_narrow_bracket() {
        // A kink makes the curvature condition unreachable near the minimum.
        let mut ls = LineSearch::new(1e-3, 1e-6, 0.5);
        let phi = |t: f64| ((t - 0.3).abs(), if t < 0.3 { -1.0 } else { 1.0 });
        let (status, _) = drive(&mut ls, 1.0, phi);
        assert_eq!(
            status,
            LineSearchStatus::Warning(LineSearchWarning::XtolSatisfied)
        );
        assert!(phi(ls.best_step()).0 < phi(0.0).0);
    }
}
