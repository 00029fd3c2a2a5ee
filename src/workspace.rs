//! The reverse-communication engine.
//!
//! A [`Workspace`] owns the iterate and every piece of solver state. It never
//! calls the objective: it reports what it needs through a [`Task`] and the
//! caller answers by either supplying `(f, g)` at [`Workspace::x`] with
//! [`Workspace::provide`] (when the task is [`Task::FgRequest`]) or calling
//! [`Workspace::advance`] (for every other task).
//!
//! ```
//! use ndarray::{Array1, array};
//! use vmlmb::{Task, VmlmbOptions, Workspace};
//!
//! let target = array![1.0, -2.0];
//! let options = VmlmbOptions { gtol: 1e-8, ..VmlmbOptions::default() };
//! let mut ws = Workspace::new(Array1::zeros(2), &options).unwrap();
//! loop {
//!     let task = match ws.task() {
//!         Task::FgRequest => {
//!             let r = ws.x() - &target;
//!             let (f, g) = (r.dot(&r), 2.0 * &r);
//!             ws.provide(f, &g)
//!         }
//!         t if t.is_terminal() => break,
//!         _ => ws.advance(),
//!     };
//!     if task.is_terminal() {
//!         break;
//!     }
//! }
//! assert_eq!(ws.task(), Task::Converged);
//! assert!((ws.x()[1] + 2.0).abs() < 1e-6);
//! ```

use ndarray::{Array1, Zip};

use crate::bounds::{BoundMode, BoxBounds};
use crate::convergence::{ConvergenceReason, ConvergenceTest};
use crate::error::VmlmbError;
use crate::line_search::{LineSearch, LineSearchError, LineSearchStatus, LineSearchWarning};
use crate::memory::{CurvatureStore, DirectionKind};
use crate::options::VmlmbOptions;

/// The instruction the workspace gives its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Nothing has happened yet; call `advance` to project the start point.
    Start,
    /// Evaluate the objective and its gradient at `x` and call `provide`.
    FgRequest,
    /// The free variables and the next search direction are due; call `advance`.
    FreeVarsRequest,
    /// A new iterate has been accepted; call `advance` to continue.
    NewX,
    Converged,
    Warning,
    Error,
}

impl Task {
    pub fn is_terminal(self) -> bool {
        matches!(self, Task::Converged | Task::Warning | Task::Error)
    }
}

/// Why a run stopped on `Task::Warning` or `Task::Error`.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Failure {
    #[error("line search warning: {0}")]
    LineSearchWarning(#[from] LineSearchWarning),
    #[error("line search error: {0}")]
    LineSearch(#[from] LineSearchError),
    #[error("objective value or gradient is not finite")]
    NonFinite,
    #[error("gradient has {got} components, expected {expected}")]
    GradientLength { got: usize, expected: usize },
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
}

#[derive(Debug, Clone)]
struct Best {
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
    // Trial step that produced x, 0 for the origin of the search.
    step: f64,
}

/// Exclusive state of one minimization run.
#[derive(Debug, Clone)]
pub struct Workspace {
    bounds: BoxBounds,
    convergence: ConvergenceTest,
    epsilon: f64,
    delta: f64,
    memory: CurvatureStore,
    line_search: LineSearch,
    task: Task,
    x: Array1<f64>,
    f: f64,
    g: Array1<f64>,
    // Last accepted iterate, the origin of the current line search.
    x0: Array1<f64>,
    f0: f64,
    g0: Array1<f64>,
    d: Array1<f64>,
    best: Option<Best>,
    searching: bool,
    evaluations: usize,
    iterations: usize,
    restarts: usize,
    step: f64,
    converged: Option<ConvergenceReason>,
    failure: Option<Failure>,
}

impl Workspace {
    /// Validates `options` against the size of `x` and prepares a run
    /// starting from `x`. The first task is [`Task::Start`].
    pub fn new(x: Array1<f64>, options: &VmlmbOptions) -> Result<Self, VmlmbError> {
        let n = x.len();
        let bounds = options.validate(n)?;
        let line_search = LineSearch::new(options.sftol, options.sgtol, options.sxtol)
            .with_max_evaluations(options.max_line_search_evals);
        Ok(Self {
            bounds,
            convergence: ConvergenceTest::new(options.gtol, options.fatol, options.frtol),
            epsilon: options.epsilon,
            delta: options.delta,
            memory: CurvatureStore::new(options.m),
            line_search,
            task: Task::Start,
            x0: x.clone(),
            x,
            f: f64::NAN,
            g: Array1::zeros(n),
            f0: f64::NAN,
            g0: Array1::zeros(n),
            d: Array1::zeros(n),
            best: None,
            searching: false,
            evaluations: 0,
            iterations: 0,
            restarts: 0,
            step: 0.0,
            converged: None,
            failure: None,
        })
    }

    pub fn task(&self) -> Task {
        self.task
    }

    /// The point at which the objective is requested, or the current iterate.
    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// Consumes the workspace and returns the point it holds.
    pub fn into_x(self) -> Array1<f64> {
        self.x
    }

    /// Objective value at `x` (NaN before the first evaluation).
    pub fn f(&self) -> f64 {
        self.f
    }

    pub fn gradient(&self) -> &Array1<f64> {
        &self.g
    }

    pub fn bounds(&self) -> &BoxBounds {
        &self.bounds
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Number of times the quasi-Newton direction was replaced by steepest
    /// descent and the memory cleared.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn rejected_pairs(&self) -> usize {
        self.memory.rejected()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Length of the last accepted step along the search direction.
    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn convergence_reason(&self) -> Option<ConvergenceReason> {
        self.converged
    }

    pub fn failure(&self) -> Option<Failure> {
        self.failure
    }

    /// Human-readable explanation of a terminal task.
    pub fn reason(&self) -> Option<String> {
        self.failure
            .map(|f| f.to_string())
            .or_else(|| self.converged.map(|c| c.to_string()))
    }

    /// Coordinates currently blocked by a bound.
    pub fn active_mask(&self) -> Vec<bool> {
        self.bounds.active_mask(&self.x, &self.g)
    }

    /// Norm of the gradient restricted to the free variables at `x`.
    pub fn projected_gradient_norm(&self) -> f64 {
        let gp = self.bounds.projected_gradient(&self.x, &self.g);
        gp.dot(&gp).sqrt()
    }

    /// Performs the work of every task except [`Task::FgRequest`].
    pub fn advance(&mut self) -> Task {
        match self.task {
            Task::Start => {
                self.bounds.project(&mut self.x);
                self.task = Task::FgRequest;
            }
            Task::FgRequest => {
                self.restore_best();
                self.fail(Failure::Protocol(
                    "an objective evaluation was requested but advance was called",
                ));
            }
            Task::FreeVarsRequest => self.next_direction(),
            Task::NewX => self.accept_iterate(),
            Task::Converged | Task::Warning | Task::Error => {}
        }
        self.task
    }

    /// Supplies the objective value and gradient at [`Workspace::x`].
    pub fn provide(&mut self, f: f64, g: &Array1<f64>) -> Task {
        if self.task != Task::FgRequest {
            self.fail(Failure::Protocol(
                "an objective evaluation was supplied but none was requested",
            ));
            return self.task;
        }
        if g.len() != self.x.len() {
            self.fail(Failure::GradientLength {
                got: g.len(),
                expected: self.x.len(),
            });
            return self.task;
        }
        self.evaluations += 1;
        if !f.is_finite() || g.iter().any(|v| !v.is_finite()) {
            self.restore_best();
            self.fail(Failure::NonFinite);
            return self.task;
        }
        self.f = f;
        self.g.assign(g);

        if !self.searching {
            let gnorm = self.projected_gradient_norm();
            if let Some(reason) = self.convergence.check_gradient(gnorm) {
                self.converge(reason);
            } else if gnorm == 0.0 {
                self.converge(ConvergenceReason::Stationary);
            } else {
                self.task = Task::FreeVarsRequest;
            }
            return self.task;
        }

        let stp = self.line_search.step();
        if self.best.as_ref().is_none_or(|b| f < b.f) {
            self.best = Some(Best {
                x: self.x.clone(),
                f,
                g: self.g.clone(),
                step: stp,
            });
        }
        let slope = if self.bounds.mode() == BoundMode::None {
            self.g.dot(&self.d)
        } else {
            // Derivative along the projected path x(t) = P(x0 + t·d).
            Zip::from(&self.g)
                .and(&self.x)
                .and(&self.x0)
                .fold(0.0, |acc, &gi, &xi, &x0i| acc + gi * (xi - x0i))
                / stp
        };
        let status = self.line_search.iterate(f, slope);
        self.on_line_search(status);
        self.task
    }

    fn next_direction(&mut self) {
        let active = self.bounds.active_mask(&self.x, &self.g);
        let dir = self
            .memory
            .build_direction(&self.g, &active, self.epsilon, self.delta);
        if dir.kind == DirectionKind::Restart {
            self.restarts += 1;
        }
        log::debug!(
            "[VMLMB] iter {}: {:?} direction, d·g = {:.3e}, {} active, {} pairs",
            self.iterations,
            dir.kind,
            dir.slope,
            active.iter().filter(|&&a| a).count(),
            self.memory.len()
        );
        self.x0.assign(&self.x);
        self.f0 = self.f;
        self.g0.assign(&self.g);
        self.d = dir.d;
        self.best = Some(Best {
            x: self.x0.clone(),
            f: self.f0,
            g: self.g0.clone(),
            step: 0.0,
        });
        let status = self.line_search.start(1.0, self.f0, dir.slope);
        self.on_line_search(status);
    }

    fn on_line_search(&mut self, status: LineSearchStatus) {
        match status {
            LineSearchStatus::Evaluate(stp) => {
                self.x.assign(&self.x0);
                self.x.scaled_add(stp, &self.d);
                self.bounds.project(&mut self.x);
                self.searching = true;
                self.task = Task::FgRequest;
            }
            LineSearchStatus::Converged => {
                self.step = self.line_search.step();
                self.searching = false;
                self.task = Task::NewX;
            }
            LineSearchStatus::Warning(
                w @ (LineSearchWarning::XtolSatisfied | LineSearchWarning::RoundingErrors),
            ) if self.best.as_ref().is_some_and(|b| b.f < self.f0) => {
                log::warn!(
                    "[VMLMB] Line search stopped early ({}); keeping the best step found.",
                    w
                );
                self.step = self.best.as_ref().map_or(0.0, |b| b.step);
                self.restore_best();
                self.task = Task::NewX;
            }
            LineSearchStatus::Warning(w) => {
                self.restore_best();
                self.fail(w.into());
            }
            LineSearchStatus::Error(e) => {
                self.restore_best();
                self.fail(e.into());
            }
        }
    }

    fn accept_iterate(&mut self) {
        let s = &self.x - &self.x0;
        let y = &self.g - &self.g0;
        self.memory.push_pair(s, y);
        self.iterations += 1;
        let gnorm = self.projected_gradient_norm();
        log::debug!(
            "[VMLMB] iter {}: f = {:.6e}, |pg| = {:.3e}, step = {:.3e}, evals = {}",
            self.iterations,
            self.f,
            gnorm,
            self.step,
            self.evaluations
        );
        if let Some(reason) = self.convergence.check(gnorm, self.f0, self.f) {
            self.converge(reason);
        } else if gnorm == 0.0 {
            self.converge(ConvergenceReason::Stationary);
        } else {
            self.task = Task::FreeVarsRequest;
        }
    }

    fn restore_best(&mut self) {
        if let Some(best) = self.best.take() {
            self.x = best.x;
            self.f = best.f;
            self.g = best.g;
        }
        self.searching = false;
    }

    fn converge(&mut self, reason: ConvergenceReason) {
        log::info!(
            "[VMLMB] Converged ({}): iters={}, f={:.6e}, evals={}",
            reason,
            self.iterations,
            self.f,
            self.evaluations
        );
        self.converged = Some(reason);
        self.task = Task::Converged;
    }

    fn fail(&mut self, failure: Failure) {
        self.task = match failure {
            Failure::LineSearchWarning(_) => {
                log::warn!("[VMLMB] Stopped with a warning: {}", failure);
                Task::Warning
            }
            _ => {
                log::error!("[VMLMB] Stopped with an error: {}", failure);
                Task::Error
            }
        };
        self.failure = Some(failure);
    }
}
