//! Limited-memory storage of curvature pairs and the two-loop recursion.

use ndarray::Array1;
use std::collections::VecDeque;

/// One stored correction: `s = x_k - x_{k-1}`, `y = g_k - g_{k-1}` and
/// `rho = s·y > 0`.
#[derive(Debug, Clone)]
pub struct CurvaturePair {
    pub s: Array1<f64>,
    pub y: Array1<f64>,
    pub rho: f64,
}

/// How a search direction was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionKind {
    /// Two-loop recursion over the stored pairs.
    QuasiNewton,
    /// Scaled anti-gradient because no stored pair is usable on the free
    /// coordinates.
    SteepestDescent,
    /// Scaled anti-gradient after the quasi-Newton direction failed the
    /// descent test; the memory has been cleared.
    Restart,
}

#[derive(Debug, Clone)]
pub struct SearchDirection {
    pub d: Array1<f64>,
    pub kind: DirectionKind,
    /// Directional derivative `d·g`, negative for a descent direction.
    pub slope: f64,
}

// Dot product over the free coordinates only.
fn free_dot(a: &Array1<f64>, b: &Array1<f64>, active: &[bool]) -> f64 {
    a.iter()
        .zip(b.iter())
        .zip(active)
        .filter(|&(_, &blocked)| !blocked)
        .map(|((x, y), _)| x * y)
        .sum()
}

fn zero_active(v: &mut Array1<f64>, active: &[bool]) {
    for (vi, &blocked) in v.iter_mut().zip(active) {
        if blocked {
            *vi = 0.0;
        }
    }
}

/// FIFO of at most `capacity` curvature pairs.
#[derive(Debug, Clone)]
pub struct CurvatureStore {
    pairs: VecDeque<CurvaturePair>,
    capacity: usize,
    rejected: usize,
}

impl CurvatureStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            pairs: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            rejected: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pairs dropped so far for non-positive curvature.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Stored pairs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CurvaturePair> {
        self.pairs.iter()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Stores `(s, y)` unless `s·y <= 0`, evicting the oldest pair when full.
    /// Returns whether the pair was kept.
    pub fn push_pair(&mut self, s: Array1<f64>, y: Array1<f64>) -> bool {
        let rho = s.dot(&y);
        if !(rho > 0.0 && rho.is_finite()) {
            self.rejected += 1;
            log::warn!(
                "[VMLMB] Rejected curvature pair with s·y = {:.3e} ({} rejected so far).",
                rho,
                self.rejected
            );
            return false;
        }
        if self.pairs.len() == self.capacity {
            self.pairs.pop_front();
        }
        self.pairs.push_back(CurvaturePair { s, y, rho });
        true
    }

    /// Computes a descent direction approximating `-H·g` over the free
    /// coordinates.
    ///
    /// `active` flags the coordinates blocked by a bound; the returned
    /// direction is exactly zero there. Pairs whose curvature restricted to the
    /// free coordinates is not positive are skipped. When no pair is usable,
    /// or the quasi-Newton direction makes an angle with the anti-gradient
    /// whose cosine is below `epsilon`, the direction is `-delta·g` on the
    /// free coordinates; in the latter case the memory is cleared.
    pub fn build_direction(
        &mut self,
        g: &Array1<f64>,
        active: &[bool],
        epsilon: f64,
        delta: f64,
    ) -> SearchDirection {
        let mut q = g.clone();
        zero_active(&mut q, active);

        if self.pairs.is_empty() {
            return Self::steepest(q, delta, DirectionKind::SteepestDescent);
        }

        let k = self.pairs.len();
        let mut alpha = vec![0.0; k];
        let mut rho = vec![0.0; k];
        let mut gamma = None;
        for (i, pair) in self.pairs.iter().enumerate().rev() {
            let r = free_dot(&pair.s, &pair.y, active);
            if r <= 0.0 {
                continue;
            }
            if gamma.is_none() {
                gamma = Some(r / free_dot(&pair.y, &pair.y, active));
            }
            rho[i] = r;
            alpha[i] = free_dot(&pair.s, &q, active) / r;
            q.scaled_add(-alpha[i], &pair.y);
        }
        let Some(gamma) = gamma else {
            // No pair has positive curvature on the free coordinates, so q is
            // still the free part of g.
            return Self::steepest(q, delta, DirectionKind::SteepestDescent);
        };
        zero_active(&mut q, active);
        q *= gamma;
        for (i, pair) in self.pairs.iter().enumerate() {
            if rho[i] <= 0.0 {
                continue;
            }
            let beta = free_dot(&pair.y, &q, active) / rho[i];
            q.scaled_add(alpha[i] - beta, &pair.s);
        }
        zero_active(&mut q, active);
        let d = -q;

        let slope = free_dot(&d, g, active);
        let dnorm = d.dot(&d).sqrt();
        let gnorm = free_dot(g, g, active).sqrt();
        if slope < 0.0 && slope <= -epsilon * dnorm * gnorm {
            return SearchDirection {
                d,
                kind: DirectionKind::QuasiNewton,
                slope,
            };
        }

        log::warn!(
            "[VMLMB] Not a sufficient descent direction (d·g = {:.3e}); restarting with steepest descent.",
            slope
        );
        self.pairs.clear();
        let mut q = g.clone();
        zero_active(&mut q, active);
        Self::steepest(q, delta, DirectionKind::Restart)
    }

    fn steepest(q: Array1<f64>, delta: f64, kind: DirectionKind) -> SearchDirection {
        let slope = -delta * q.dot(&q);
        SearchDirection {
            d: q * -delta,
            kind,
            slope,
        }
    }
}
