//! Box constraints: projection of points and classification of variables.

use ndarray::Array1;

/// Which sides of the box are constrained. Fixed once the bounds are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundMode {
    None,
    Lower,
    Upper,
    Both,
}

/// Per-coordinate lower and upper bounds, either of which may be absent.
///
/// When both are present, `lower[i] <= upper[i]` is a precondition checked
/// by [`VmlmbOptions::validate`](crate::VmlmbOptions::validate); the methods
/// here do not re-check it.
#[derive(Debug, Clone, Default)]
pub struct BoxBounds {
    lower: Option<Array1<f64>>,
    upper: Option<Array1<f64>>,
}

impl BoxBounds {
    pub fn new(lower: Option<Array1<f64>>, upper: Option<Array1<f64>>) -> Self {
        Self { lower, upper }
    }

    /// Bounds that constrain nothing.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> BoundMode {
        match (&self.lower, &self.upper) {
            (None, None) => BoundMode::None,
            (Some(_), None) => BoundMode::Lower,
            (None, Some(_)) => BoundMode::Upper,
            (Some(_), Some(_)) => BoundMode::Both,
        }
    }

    pub fn lower(&self) -> Option<&Array1<f64>> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Array1<f64>> {
        self.upper.as_ref()
    }

    /// Clamps `x` into the box in place. Sides without a bound are skipped.
    pub fn project(&self, x: &mut Array1<f64>) {
        if let Some(lo) = &self.lower {
            x.zip_mut_with(lo, |xi, &l| {
                if *xi < l {
                    *xi = l;
                }
            });
        }
        if let Some(hi) = &self.upper {
            x.zip_mut_with(hi, |xi, &h| {
                if *xi > h {
                    *xi = h;
                }
            });
        }
    }

    /// Returns `true` for every coordinate blocked by a bound.
    ///
    /// A coordinate is free with respect to its lower bound when
    /// `x_i > xmin_i` or `g_i < 0`, and with respect to its upper bound when
    /// `x_i < xmax_i` or `g_i > 0`. It is active as soon as one present bound
    /// does not leave it free. A variable resting on a bound is therefore
    /// released as soon as the anti-gradient points back inside the box.
    pub fn active_mask(&self, x: &Array1<f64>, g: &Array1<f64>) -> Vec<bool> {
        let mut mask = vec![false; x.len()];
        for (i, active) in mask.iter_mut().enumerate() {
            let free_lower = self.lower.as_ref().is_none_or(|lo| x[i] > lo[i] || g[i] < 0.0);
            let free_upper = self.upper.as_ref().is_none_or(|hi| x[i] < hi[i] || g[i] > 0.0);
            *active = !(free_lower && free_upper);
        }
        mask
    }

    /// Gradient with the components of active coordinates set to zero.
    pub fn projected_gradient(&self, x: &Array1<f64>, g: &Array1<f64>) -> Array1<f64> {
        let mut gp = g.clone();
        if self.mode() != BoundMode::None {
            for (gi, active) in gp.iter_mut().zip(self.active_mask(x, g)) {
                if active {
                    *gi = 0.0;
                }
            }
        }
        gp
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundMode, BoxBounds};
    use ndarray::{Array1, array};

    fn both(lo: Array1<f64>, hi: Array1<f64>) -> BoxBounds {
        BoxBounds::new(Some(lo), Some(hi))
    }

    #[test]
    fn mode_reflects_present_sides() {
        assert_eq!(BoxBounds::unbounded().mode(), BoundMode::None);
        assert_eq!(
            BoxBounds::new(Some(array![0.0]), None).mode(),
            BoundMode::Lower
        );
        assert_eq!(
            BoxBounds::new(None, Some(array![0.0])).mode(),
            BoundMode::Upper
        );
        assert_eq!(both(array![0.0], array![1.0]).mode(), BoundMode::Both);
    }

    #[test]
    fn projection_lands_inside_the_box() {
        let b = both(array![0.0, -1.0, 2.0], array![1.0, 1.0, 3.0]);
        let mut x = array![-5.0, 0.5, 10.0];
        b.project(&mut x);
        assert_eq!(x, array![0.0, 0.5, 3.0]);
        let lo = b.lower().unwrap();
        let hi = b.upper().unwrap();
        for i in 0..x.len() {
            assert!(lo[i] <= x[i] && x[i] <= hi[i]);
        }
    }

    #[test]
    fn one_sided_projection_ignores_missing_side() {
        let b = BoxBounds::new(Some(array![0.0, 0.0]), None);
        let mut x = array![-1.0, 1e9];
        b.project(&mut x);
        assert_eq!(x, array![0.0, 1e9]);

        let b = BoxBounds::new(None, Some(array![0.0, 0.0]));
        let mut x = array![-1e9, 1.0];
        b.project(&mut x);
        assert_eq!(x, array![-1e9, 0.0]);
    }

    #[test]
    fn lower_bound_classification() {
        let b = BoxBounds::new(Some(array![0.0, 0.0, 0.0]), None);
        let x = array![0.0, 0.0, 1.0];
        // At the bound pushed outward, at the bound pulled inward, interior.
        let g = array![1.0, -1.0, 1.0];
        assert_eq!(b.active_mask(&x, &g), vec![true, false, false]);
        // Zero gradient on the bound stays blocked.
        assert_eq!(b.active_mask(&x, &array![0.0, 0.0, 0.0]), vec![true, true, false]);
    }

    #[test]
    fn upper_bound_classification() {
        let b = BoxBounds::new(None, Some(array![1.0, 1.0, 1.0]));
        let x = array![1.0, 1.0, 0.0];
        let g = array![-1.0, 1.0, -1.0];
        assert_eq!(b.active_mask(&x, &g), vec![true, false, false]);
    }

    #[test]
    fn both_bounds_require_freedom_on_each_side() {
        let b = both(array![0.0, 0.0, 0.0, 2.0], array![1.0, 1.0, 1.0, 2.0]);
        let x = array![0.0, 1.0, 0.5, 2.0];
        let g = array![1.0, -1.0, 3.0, 1.0];
        // Fixed variable (lower == upper) is active whichever way g points.
        assert_eq!(b.active_mask(&x, &g), vec![true, true, false, true]);
        assert_eq!(
            b.active_mask(&x, &array![-1.0, 1.0, 0.0, -1.0]),
            vec![false, false, false, true]
        );
    }

    #[test]
    fn classification_is_idempotent() {
        let b = both(array![0.0, 0.0], array![1.0, 1.0]);
        let x = array![0.0, 0.3];
        let g = array![2.0, -2.0];
        let first = b.active_mask(&x, &g);
        assert_eq!(first, b.active_mask(&x, &g));
    }

    #[test]
    fn unbounded_problem_has_no_active_variables() {
        let b = BoxBounds::unbounded();
        let x = array![0.0, 1.0];
        let g = array![5.0, -5.0];
        assert_eq!(b.active_mask(&x, &g), vec![false, false]);
        assert_eq!(b.projected_gradient(&x, &g), g);
    }

    #[test]
    fn projected_gradient_zeroes_active_components() {
        let b = both(array![0.0, 0.0], array![10.0, 10.0]);
        let x = array![0.0, 0.0];
        let g = array![-10.0, 10.0];
        assert_eq!(b.projected_gradient(&x, &g), array![-10.0, 0.0]);
    }
}
