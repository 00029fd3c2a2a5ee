//! An implementation of the VMLMB algorithm: a limited-memory variable metric
//! (quasi-Newton) minimizer with optional bound constraints.
//!
//! The numerical core is a reverse-communication [`Workspace`]: it never calls
//! the objective itself but returns a [`Task`] telling the caller what to do
//! next. This makes it easy to embed in an outer loop that owns the objective
//! (an image reconstruction, a model fit) and wants to interleave its own
//! bookkeeping. For the common case the [`Vmlmb`] driver runs that loop for
//! you.
//!
//! # Features
//! - Limited-memory BFGS directions from the last `m` curvature pairs via the
//!   two-loop recursion. Pairs with `s·y <= 0` are rejected.
//! - Box constraints: points are projected into `[xmin, xmax]` and variables
//!   blocked by a bound are frozen while computing the direction.
//! - Moré–Thuente line search enforcing the strong Wolfe conditions, run along
//!   the projected path when bounds are present.
//! - Steepest-descent restart when the quasi-Newton direction is not a
//!   sufficient descent direction.
//! - Independent stopping tests on the projected gradient norm and on the
//!   absolute and relative decrease of the objective.
//!
//! ## Defaults
//! - `m = 3`, `gtol = 0` (disabled), `fatol = 0` (disabled), `frtol = 1e-8`.
//! - Line search: `sftol = 1e-3`, `sgtol = 0.9`, `sxtol = 0.1`.
//! - Descent safeguard: `epsilon = 1e-2`, `delta = 0.1`.
//!
//! # Example
//!
//! Minimize the Rosenbrock function with the first variable kept above 1.2.
//!
//! ```
//! use vmlmb::{Vmlmb, VmlmbSolution};
//! use ndarray::{array, Array1};
//!
//! let rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let a = 1.0;
//!     let b = 100.0;
//!     let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
//!         2.0 * b * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let VmlmbSolution { final_point: x, .. } = Vmlmb::new(array![2.0, 2.0], rosenbrock)
//!     .with_lower_bound(array![1.2, f64::NEG_INFINITY])
//!     .with_gtol(1e-6)
//!     .with_max_iterations(500)
//!     .run()
//!     .expect("VMLMB failed to solve");
//!
//! // The bound is active and x[1] sits on the valley floor.
//! assert!((x[0] - 1.2).abs() < 1e-6);
//! assert!((x[1] - 1.44).abs() < 1e-3);
//! ```

use ndarray::Array1;
use std::time::{Duration, Instant};

pub mod bounds;
pub mod convergence;
pub mod error;
pub mod line_search;
pub mod memory;
pub mod options;
pub mod workspace;

pub use bounds::{BoundMode, BoxBounds};
pub use convergence::{ConvergenceReason, ConvergenceTest};
pub use error::VmlmbError;
pub use line_search::{LineSearch, LineSearchError, LineSearchStatus, LineSearchWarning};
pub use memory::{CurvatureStore, DirectionKind, SearchDirection};
pub use options::{Bound, VmlmbOptions};
pub use workspace::{Failure, Task, Workspace};

/// A summary of an optimization run.
///
/// Note that for non-convex functions, convergence to a local minimum is not guaranteed.
#[derive(Debug, Clone)]
pub struct VmlmbSolution {
    /// The point at which the minimum value was found.
    pub final_point: Array1<f64>,
    /// The minimum value of the objective function.
    pub final_value: f64,
    /// The norm of the gradient restricted to free variables at the final point.
    pub final_gradient_norm: f64,
    /// The total number of iterations performed.
    pub iterations: usize,
    /// The total number of times the objective function was evaluated.
    pub func_evals: usize,
    /// The total number of times the gradient was evaluated.
    pub grad_evals: usize,
    /// Number of steepest-descent restarts.
    pub restarts: usize,
    /// Number of curvature pairs rejected for non-positive curvature.
    pub rejected_pairs: usize,
    pub message: String,
}

impl VmlmbSolution {
    fn from_workspace(ws: &Workspace, message: impl Into<String>) -> Self {
        Self {
            final_point: ws.x().clone(),
            final_value: ws.f(),
            final_gradient_norm: ws.projected_gradient_norm(),
            iterations: ws.iterations(),
            func_evals: ws.evaluations(),
            grad_evals: ws.evaluations(),
            restarts: ws.restarts(),
            rejected_pairs: ws.rejected_pairs(),
            message: message.into(),
        }
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug)]
pub struct Progress<'a> {
    pub iteration: usize,
    pub evaluations: usize,
    pub restarts: usize,
    pub value: f64,
    pub gradient_norm: f64,
    pub x: &'a Array1<f64>,
    pub elapsed: Duration,
}

type ProgressFn = Box<dyn FnMut(&Progress<'_>)>;

/// A configurable VMLMB solver driving a [`Workspace`] with a closure.
pub struct Vmlmb<ObjFn> {
    x0: Array1<f64>,
    obj_fn: ObjFn,
    options: VmlmbOptions,
    max_iterations: usize,
    verbose: bool,
    report_every: usize,
    progress: Option<ProgressFn>,
}

impl<ObjFn> Vmlmb<ObjFn>
where
    ObjFn: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    /// Creates a new VMLMB solver.
    ///
    /// # Arguments
    /// * `x0` - The initial guess for the minimum.
    /// * `obj_fn` - The objective function which returns a tuple `(value, gradient)`.
    pub fn new(x0: Array1<f64>, obj_fn: ObjFn) -> Self {
        Self {
            x0,
            obj_fn,
            options: VmlmbOptions::default(),
            max_iterations: 500,
            verbose: false,
            report_every: 1,
            progress: None,
        }
    }

    /// Replaces every option at once, bounds included.
    pub fn with_options(mut self, options: VmlmbOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the number of stored curvature pairs (default: 3).
    pub fn with_memory(mut self, m: usize) -> Self {
        self.options.m = m;
        self
    }

    /// Sets the projected gradient norm threshold (default: 0, disabled).
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.options.gtol = gtol;
        self
    }

    /// Sets the absolute function decrease threshold (default: 0, disabled).
    pub fn with_fatol(mut self, fatol: f64) -> Self {
        self.options.fatol = fatol;
        self
    }

    /// Sets the relative function decrease threshold (default: 1e-8).
    pub fn with_frtol(mut self, frtol: f64) -> Self {
        self.options.frtol = frtol;
        self
    }

    /// Sets the sufficient decrease, curvature and bracket width constants of
    /// the line search (defaults: 1e-3, 0.9, 0.1).
    pub fn with_line_search(mut self, sftol: f64, sgtol: f64, sxtol: f64) -> Self {
        self.options.sftol = sftol;
        self.options.sgtol = sgtol;
        self.options.sxtol = sxtol;
        self
    }

    /// Sets the minimum descent cosine and the steepest-descent scale
    /// (defaults: 1e-2, 0.1).
    pub fn with_descent_safeguard(mut self, epsilon: f64, delta: f64) -> Self {
        self.options.epsilon = epsilon;
        self.options.delta = delta;
        self
    }

    /// Provides box bounds (lower <= x <= upper). Each side is either a single
    /// value for every coordinate or one value per coordinate; consistency is
    /// checked when the solver runs.
    pub fn with_bounds(mut self, lower: impl Into<Bound>, upper: impl Into<Bound>) -> Self {
        self.options.xmin = Some(lower.into());
        self.options.xmax = Some(upper.into());
        self
    }

    pub fn with_lower_bound(mut self, lower: impl Into<Bound>) -> Self {
        self.options.xmin = Some(lower.into());
        self
    }

    pub fn with_upper_bound(mut self, upper: impl Into<Bound>) -> Self {
        self.options.xmax = Some(upper.into());
        self
    }

    /// Sets the maximum number of iterations (default: 500).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Caps the number of evaluations in a single line search (default: 30).
    pub fn with_max_line_search_evals(mut self, evals: usize) -> Self {
        self.options.max_line_search_evals = evals;
        self
    }

    /// Calls `callback` every `every` iterations with a snapshot of the run.
    pub fn with_progress<F>(mut self, every: usize, callback: F) -> Self
    where
        F: FnMut(&Progress<'_>) + 'static,
    {
        self.report_every = every.max(1);
        self.progress = Some(Box::new(callback));
        self
    }

    /// Logs a progress line at `info` level on every reported iteration.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Executes VMLMB until convergence, a line search failure or the
    /// iteration limit.
    pub fn run(&mut self) -> Result<VmlmbSolution, VmlmbError> {
        let started = Instant::now();
        let mut ws = Workspace::new(self.x0.clone(), &self.options)?;
        loop {
            match ws.task() {
                Task::FgRequest => {
                    let (f, g) = (self.obj_fn)(ws.x());
                    ws.provide(f, &g);
                }
                Task::NewX => {
                    ws.advance();
                    self.report(&ws, started);
                }
                Task::FreeVarsRequest if ws.iterations() >= self.max_iterations => {
                    log::warn!(
                        "[VMLMB] Maximum number of iterations ({}) reached: f={:.6e}, |pg|={:.3e}",
                        self.max_iterations,
                        ws.f(),
                        ws.projected_gradient_norm()
                    );
                    return Err(VmlmbError::MaxIterationsReached {
                        last_solution: Box::new(VmlmbSolution::from_workspace(
                            &ws,
                            "maximum number of iterations reached",
                        )),
                    });
                }
                Task::Start | Task::FreeVarsRequest => {
                    ws.advance();
                }
                Task::Converged => {
                    let message = ws.reason().unwrap_or_else(|| "converged".to_string());
                    return Ok(VmlmbSolution::from_workspace(&ws, message));
                }
                Task::Warning | Task::Error => return Err(Self::failure_to_error(&ws)),
            }
        }
    }

    fn report(&mut self, ws: &Workspace, started: Instant) {
        if ws.iterations() % self.report_every != 0 {
            return;
        }
        let progress = Progress {
            iteration: ws.iterations(),
            evaluations: ws.evaluations(),
            restarts: ws.restarts(),
            value: ws.f(),
            gradient_norm: ws.projected_gradient_norm(),
            x: ws.x(),
            elapsed: started.elapsed(),
        };
        if self.verbose {
            log::info!(
                "[VMLMB] iter={:>5} evals={:>5} restarts={:>3} f={:.9e} |pg|={:.3e} t={:.3}s",
                progress.iteration,
                progress.evaluations,
                progress.restarts,
                progress.value,
                progress.gradient_norm,
                progress.elapsed.as_secs_f64()
            );
        }
        if let Some(callback) = self.progress.as_mut() {
            callback(&progress);
        }
    }

    fn failure_to_error(ws: &Workspace) -> VmlmbError {
        let reason = ws.reason().unwrap_or_else(|| "unknown failure".to_string());
        let last_solution = Box::new(VmlmbSolution::from_workspace(ws, reason.clone()));
        match ws.failure() {
            Some(Failure::LineSearchWarning(_)) => VmlmbError::LineSearchWarning {
                reason,
                last_solution,
            },
            Some(Failure::LineSearch(_)) => VmlmbError::LineSearchFailed {
                reason,
                last_solution,
            },
            Some(Failure::NonFinite) => VmlmbError::NonFiniteObjective {
                reason,
                last_solution,
            },
            Some(Failure::GradientLength { .. }) | Some(Failure::Protocol(_)) | None => {
                VmlmbError::ProtocolViolation(reason)
            }
        }
    }
}
