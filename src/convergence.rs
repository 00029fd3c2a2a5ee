//! Stopping criteria on the gradient norm and on the decrease of the objective.

/// Which criterion stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    GradientNorm,
    AbsoluteDecrease,
    RelativeDecrease,
    /// The gradient restricted to free variables is exactly zero, so no
    /// descent direction exists.
    Stationary,
}

impl std::fmt::Display for ConvergenceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::GradientNorm => "projected gradient norm below gtol",
            Self::AbsoluteDecrease => "absolute function decrease below fatol",
            Self::RelativeDecrease => "relative function decrease below frtol",
            Self::Stationary => "projected gradient is zero",
        };
        f.write_str(text)
    }
}

/// Thresholds of the three independent tests. A threshold of exactly zero
/// disables its test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceTest {
    pub gtol: f64,
    pub fatol: f64,
    pub frtol: f64,
}

impl ConvergenceTest {
    pub fn new(gtol: f64, fatol: f64, frtol: f64) -> Self {
        Self { gtol, fatol, frtol }
    }

    /// Gradient test alone, used before any step has been taken.
    pub fn check_gradient(&self, gnorm: f64) -> Option<ConvergenceReason> {
        (self.gtol > 0.0 && gnorm * gnorm < self.gtol * self.gtol)
            .then_some(ConvergenceReason::GradientNorm)
    }

    /// Full test after a step from `f_prev` to `f_curr`. `gnorm` is the norm
    /// of the gradient restricted to free variables.
    pub fn check(&self, gnorm: f64, f_prev: f64, f_curr: f64) -> Option<ConvergenceReason> {
        if let Some(reason) = self.check_gradient(gnorm) {
            return Some(reason);
        }
        let change = (f_prev - f_curr).abs();
        if self.fatol > 0.0 && change <= self.fatol {
            return Some(ConvergenceReason::AbsoluteDecrease);
        }
        if self.frtol > 0.0 && change <= self.frtol * f_prev.abs() {
            return Some(ConvergenceReason::RelativeDecrease);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{ConvergenceReason, ConvergenceTest};

    #[test]
    fn zero_gtol_never_triggers() {
        let t = ConvergenceTest::new(0.0, 0.0, 0.0);
        assert_eq!(t.check_gradient(0.0), None);
        assert_eq!(t.check(0.0, 1.0, 0.5), None);
        assert_eq!(t.check(1e300, 1.0, 0.5), None);
    }

    #[test]
    fn gradient_norm_below_gtol_triggers() {
        let t = ConvergenceTest::new(1e-6, 0.0, 0.0);
        assert_eq!(t.check_gradient(5e-7), Some(ConvergenceReason::GradientNorm));
        assert_eq!(t.check_gradient(2e-6), None);
    }

    #[test]
    fn fatol_triggers_on_small_absolute_change() {
        let t = ConvergenceTest::new(0.0, 1e-6, 0.0);
        assert_eq!(
            t.check(1.0, 3.0, 3.0 - 1e-7),
            Some(ConvergenceReason::AbsoluteDecrease)
        );
        assert_eq!(t.check(1.0, 3.0, 2.0), None);
    }

    #[test]
    fn frtol_is_relative_to_previous_value() {
        let t = ConvergenceTest::new(0.0, 0.0, 1e-8);
        assert_eq!(
            t.check(1.0, 1e6, 1e6 - 1e-3),
            Some(ConvergenceReason::RelativeDecrease)
        );
        assert_eq!(t.check(1.0, 1.0, 1.0 - 1e-3), None);
    }

    #[test]
    fn zero_thresholds_do_not_require_equality() {
        // With every test disabled even an unchanged objective keeps going.
        let t = ConvergenceTest::new(0.0, 0.0, 0.0);
        assert_eq!(t.check(1.0, 2.0, 2.0), None);
    }

    #[test]
    fn any_single_criterion_is_enough() {
        let t = ConvergenceTest::new(1e-3, 1e-6, 1e-8);
        assert_eq!(t.check(1e-4, 10.0, 1.0), Some(ConvergenceReason::GradientNorm));
        assert_eq!(
            t.check(1.0, 10.0, 10.0 - 1e-7),
            Some(ConvergenceReason::AbsoluteDecrease)
        );
    }
}
