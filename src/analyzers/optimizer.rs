//! Derivative-free minimisation for small parameter vectors.

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    pub max_iterations: usize,
    /// Relative spread of objective values across the simplex
    pub f_tolerance: f64,
    /// Relative distance of every vertex from the best one
    pub x_tolerance: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            f_tolerance: 1e-10,
            x_tolerance: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Nelder-Mead simplex minimisation starting from `start`.
///
/// Returns `None` when the objective is not finite at the start point or the
/// simplex collapses onto non-finite values.
pub fn nelder_mead<F>(objective: F, start: &[f64], options: NelderMeadOptions) -> Option<Minimum>
where
    F: Fn(&[f64]) -> f64,
{
    let dim = start.len();
    if dim == 0 || !objective(start).is_finite() {
        return None;
    }

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    simplex.push((start.to_vec(), objective(start)));
    for i in 0..dim {
        let mut vertex = start.to_vec();
        let step = if vertex[i].abs() > 1e-8 {
            0.05 * vertex[i]
        } else {
            0.00025
        };
        vertex[i] += step;
        let value = objective(&vertex);
        simplex.push((vertex, value));
    }

    let mut iterations = 0;
    let mut converged = false;

    while iterations < options.max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let best = simplex[0].1;
        let worst = simplex[dim].1;
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|(v, _)| v.iter().zip(&simplex[0].0).map(|(a, b)| (a - b).abs()))
            .fold(0.0f64, f64::max);
        let x_scale = 1.0 + simplex[0].0.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        if (worst - best).abs() <= options.f_tolerance * (1.0 + best.abs())
            && x_spread <= options.x_tolerance * x_scale
        {
            converged = true;
            break;
        }
        iterations += 1;

        let centroid: Vec<f64> = (0..dim)
            .map(|j| simplex[..dim].iter().map(|(v, _)| v[j]).sum::<f64>() / dim as f64)
            .collect();
        let toward = |coef: f64, from: &[f64]| -> Vec<f64> {
            centroid
                .iter()
                .zip(from)
                .map(|(c, w)| c + coef * (c - w))
                .collect()
        };

        let worst_point = simplex[dim].0.clone();
        let reflected = toward(REFLECTION, &worst_point);
        let f_reflected = objective(&reflected);

        if f_reflected < simplex[0].1 {
            let expanded = toward(EXPANSION, &worst_point);
            let f_expanded = objective(&expanded);
            simplex[dim] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
            continue;
        }

        if f_reflected < simplex[dim - 1].1 {
            simplex[dim] = (reflected, f_reflected);
            continue;
        }

        // contraction, outside when the reflection improved on the worst vertex
        let (contracted, f_contracted) = if f_reflected < simplex[dim].1 {
            let point = toward(CONTRACTION, &worst_point);
            let value = objective(&point);
            (point, value)
        } else {
            let point = toward(-CONTRACTION, &worst_point);
            let value = objective(&point);
            (point, value)
        };

        if f_contracted < simplex[dim].1.min(f_reflected) {
            simplex[dim] = (contracted, f_contracted);
            continue;
        }

        let best_point = simplex[0].0.clone();
        for (vertex, value) in simplex.iter_mut().skip(1) {
            for (v, b) in vertex.iter_mut().zip(&best_point) {
                *v = b + SHRINK * (*v - b);
            }
            *value = objective(vertex);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (x, value) = simplex.swap_remove(0);
    if !value.is_finite() || x.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(Minimum {
        x,
        value,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_bowl() {
        let f = |p: &[f64]| (p[0] - 3.0).powi(2) + 2.0 * (p[1] + 1.0).powi(2);
        let min = nelder_mead(f, &[0.0, 0.0], NelderMeadOptions::default()).unwrap();
        assert!(min.converged);
        assert!((min.x[0] - 3.0).abs() < 1e-4);
        assert!((min.x[1] + 1.0).abs() < 1e-4);
        assert!(min.value < 1e-8);
    }

    #[test]
    fn test_rosenbrock() {
        let f = |p: &[f64]| (1.0 - p[0]).powi(2) + 100.0 * (p[1] - p[0] * p[0]).powi(2);
        let options = NelderMeadOptions {
            max_iterations: 5000,
            ..Default::default()
        };
        let min = nelder_mead(f, &[-1.2, 1.0], options).unwrap();
        assert!((min.x[0] - 1.0).abs() < 1e-3);
        assert!((min.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_non_finite_start_is_rejected() {
        let f = |p: &[f64]| if p[0] < 1.0 { f64::NAN } else { p[0] };
        assert!(nelder_mead(f, &[0.0], NelderMeadOptions::default()).is_none());
        assert!(nelder_mead(|_| 0.0, &[], NelderMeadOptions::default()).is_none());
    }

    #[test]
    fn test_iteration_cap_reports_unconverged() {
        let f = |p: &[f64]| (p[0] - 100.0).powi(2);
        let options = NelderMeadOptions {
            max_iterations: 3,
            ..Default::default()
        };
        let min = nelder_mead(f, &[0.0], options).unwrap();
        assert!(!min.converged);
        assert_eq!(min.iterations, 3);
    }
}
