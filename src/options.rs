//! Tunable settings for a minimization run.

use ndarray::Array1;
use serde::Deserialize;

use crate::bounds::BoxBounds;
use crate::error::VmlmbError;

/// A bound given either as one value shared by every coordinate or as one
/// value per coordinate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Scalar(f64),
    Values(Vec<f64>),
}

impl Bound {
    /// Broadcasts the bound to `n` coordinates.
    fn expand(&self, name: &'static str, n: usize) -> Result<Array1<f64>, VmlmbError> {
        match self {
            Bound::Scalar(v) => Ok(Array1::from_elem(n, *v)),
            Bound::Values(values) if values.len() == n => Ok(Array1::from_vec(values.clone())),
            Bound::Values(values) => Err(VmlmbError::BoundLength {
                name,
                len: values.len(),
                expected: n,
            }),
        }
    }
}

impl From<f64> for Bound {
    fn from(value: f64) -> Self {
        Bound::Scalar(value)
    }
}

impl From<Vec<f64>> for Bound {
    fn from(values: Vec<f64>) -> Self {
        Bound::Values(values)
    }
}

impl From<Array1<f64>> for Bound {
    fn from(values: Array1<f64>) -> Self {
        Bound::Values(values.to_vec())
    }
}

/// Options recognized by the minimizer.
///
/// Every field has a default, so a partial JSON or TOML table deserializes
/// into a usable configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmlmbOptions {
    /// Maximum number of stored curvature pairs.
    pub m: usize,
    /// Threshold on the projected gradient norm (0 disables the test).
    pub gtol: f64,
    /// Threshold on the absolute decrease of the objective (0 disables the test).
    pub fatol: f64,
    /// Threshold on the relative decrease of the objective (0 disables the test).
    pub frtol: f64,
    /// Sufficient decrease constant of the line search.
    pub sftol: f64,
    /// Curvature constant of the line search.
    pub sgtol: f64,
    /// Relative width of the bracket below which the line search stops.
    pub sxtol: f64,
    /// Minimum cosine between the search direction and the anti-gradient.
    pub epsilon: f64,
    /// Scale of the steepest descent direction used when no curvature is known.
    pub delta: f64,
    /// Safety limit on the number of trial evaluations in one line search.
    pub max_line_search_evals: usize,
    pub xmin: Option<Bound>,
    pub xmax: Option<Bound>,
}

impl Default for VmlmbOptions {
    fn default() -> Self {
        Self {
            m: 3,
            gtol: 0.0,
            fatol: 0.0,
            frtol: 1e-8,
            sftol: 1e-3,
            sgtol: 0.9,
            sxtol: 0.1,
            epsilon: 1e-2,
            delta: 1e-1,
            max_line_search_evals: 30,
            xmin: None,
            xmax: None,
        }
    }
}

fn check(
    name: &'static str,
    value: f64,
    ok: bool,
    expected: &'static str,
) -> Result<(), VmlmbError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(VmlmbError::InvalidParameter {
            name,
            value,
            expected,
        })
    }
}

impl VmlmbOptions {
    /// Checks every option against a problem of size `n` and expands the
    /// bounds to `n` coordinates.
    pub fn validate(&self, n: usize) -> Result<BoxBounds, VmlmbError> {
        if n == 0 {
            return Err(VmlmbError::EmptyPoint);
        }
        if self.m == 0 {
            return Err(VmlmbError::InvalidMemory(self.m));
        }
        check("gtol", self.gtol, self.gtol >= 0.0, "a non-negative number")?;
        check("fatol", self.fatol, self.fatol >= 0.0, "a non-negative number")?;
        check("frtol", self.frtol, self.frtol >= 0.0, "a non-negative number")?;
        check(
            "sftol",
            self.sftol,
            self.sftol > 0.0 && self.sftol < 1.0,
            "a number in (0, 1)",
        )?;
        check(
            "sgtol",
            self.sgtol,
            self.sgtol > self.sftol && self.sgtol < 1.0,
            "a number in (sftol, 1)",
        )?;
        check(
            "sxtol",
            self.sxtol,
            self.sxtol >= 0.0 && self.sxtol < 1.0,
            "a number in [0, 1)",
        )?;
        check(
            "epsilon",
            self.epsilon,
            self.epsilon >= 0.0 && self.epsilon < 1.0,
            "a number in [0, 1)",
        )?;
        check("delta", self.delta, self.delta > 0.0, "a positive number")?;
        if self.max_line_search_evals == 0 {
            return Err(VmlmbError::InvalidParameter {
                name: "max_line_search_evals",
                value: 0.0,
                expected: "at least one evaluation",
            });
        }

        let lower = self
            .xmin
            .as_ref()
            .map(|b| b.expand("xmin", n))
            .transpose()?;
        let upper = self
            .xmax
            .as_ref()
            .map(|b| b.expand("xmax", n))
            .transpose()?;
        if let (Some(lo), Some(hi)) = (&lower, &upper) {
            for i in 0..n {
                if lo[i] > hi[i] {
                    return Err(VmlmbError::InconsistentBounds {
                        index: i,
                        lower: lo[i],
                        upper: hi[i],
                    });
                }
            }
        }
        Ok(BoxBounds::new(lower, upper))
    }
}

#[cfg(test)]
mod tests {
    use super::{Bound, VmlmbOptions};
    use crate::bounds::BoundMode;
    use crate::error::VmlmbError;
    use spectral::prelude::*;

    #[test]
    fn defaults_match_documented_values() {
        let o = VmlmbOptions::default();
        assert_eq!(o.m, 3);
        assert_that!(&o.gtol).is_close_to(0.0, 1e-15);
        assert_that!(&o.frtol).is_close_to(1e-8, 1e-15);
        assert_that!(&o.sftol).is_close_to(1e-3, 1e-15);
        assert_that!(&o.sgtol).is_close_to(0.9, 1e-15);
        assert_that!(&o.sxtol).is_close_to(0.1, 1e-15);
        assert_that!(&o.epsilon).is_close_to(0.01, 1e-15);
        assert_that!(&o.delta).is_close_to(0.1, 1e-15);
        assert!(o.xmin.is_none() && o.xmax.is_none());
    }

    #[test]
    fn scalar_bounds_are_broadcast() {
        let o = VmlmbOptions {
            xmin: Some(Bound::Scalar(-1.0)),
            ..VmlmbOptions::default()
        };
        let bounds = o.validate(4).unwrap();
        assert_eq!(bounds.mode(), BoundMode::Lower);
        let lower = bounds.lower().unwrap();
        assert_eq!(lower.len(), 4);
        assert!(lower.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn mismatched_bound_length_is_rejected() {
        let o = VmlmbOptions {
            xmax: Some(Bound::Values(vec![1.0, 2.0])),
            ..VmlmbOptions::default()
        };
        assert!(matches!(
            o.validate(3),
            Err(VmlmbError::BoundLength {
                name: "xmax",
                len: 2,
                expected: 3
            })
        ));
    }

    #[test]
    fn crossed_bounds_are_rejected() {
        let o = VmlmbOptions {
            xmin: Some(Bound::Values(vec![0.0, 3.0])),
            xmax: Some(Bound::Scalar(2.0)),
            ..VmlmbOptions::default()
        };
        assert!(matches!(
            o.validate(2),
            Err(VmlmbError::InconsistentBounds { index: 1, .. })
        ));
    }

    #[test]
    fn zero_memory_is_rejected() {
        let o = VmlmbOptions {
            m: 0,
            ..VmlmbOptions::default()
        };
        assert!(matches!(o.validate(2), Err(VmlmbError::InvalidMemory(0))));
    }

    #[test]
    fn line_search_constants_must_be_ordered() {
        let o = VmlmbOptions {
            sftol: 0.5,
            sgtol: 0.4,
            ..VmlmbOptions::default()
        };
        assert!(matches!(
            o.validate(2),
            Err(VmlmbError::InvalidParameter { name: "sgtol", .. })
        ));
        let o = VmlmbOptions {
            delta: 0.0,
            ..VmlmbOptions::default()
        };
        assert!(matches!(
            o.validate(2),
            Err(VmlmbError::InvalidParameter { name: "delta", .. })
        ));
    }

    #[test]
    fn empty_problem_is_rejected() {
        assert!(matches!(
            VmlmbOptions::default().validate(0),
            Err(VmlmbError::EmptyPoint)
        ));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let o: VmlmbOptions =
            serde_json::from_str(r#"{ "m": 7, "gtol": 1e-6, "xmin": 0.0, "xmax": [1.0, 2.0] }"#)
                .unwrap();
        assert_eq!(o.m, 7);
        assert_that!(&o.gtol).is_close_to(1e-6, 1e-18);
        assert_that!(&o.sgtol).is_close_to(0.9, 1e-15);
        assert_eq!(o.xmin, Some(Bound::Scalar(0.0)));
        assert_eq!(o.xmax, Some(Bound::Values(vec![1.0, 2.0])));
        let bounds = o.validate(2).unwrap();
        assert_eq!(bounds.mode(), BoundMode::Both);
    }
}
