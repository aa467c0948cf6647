/////////////////////////////////////////////////////////////////////////////////////////////
//
// Generates Gauss-Legendre quadrature and the orthonormal Legendre scaling functions on [0, 1].
//
// Created on: 15 Nov 2025     Author: Daniel Owen 
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License. 
//
/////////////////////////////////////////////////////////////////////////////////////////////

// # References
// [1] B. Alpert, A class of bases in L2 for the sparse representation of integral operators,
//     SIAM Journal on Mathematical Analysis 24 (1) (1993) 246-262.
// [2] B. Alpert, G. Beylkin, D. Gines, L. Vozovoi, Adaptive solution of partial differential
//     equations in multiwavelet bases, Journal of Computational Physics 182 (1) (2002) 149-190.

use std::f64::consts::PI;

const NEWTON_TOLERANCE: f64 = 1e-15;
const NEWTON_MAX_ITERATIONS: usize = 100;

/// Evaluates P_n(z) and P_{n-1}(z), the Legendre polynomials on [-1, 1].
///
/// Uses the recurrence relation:
///  P_0(z) = 1 \n
///  P_1(z) = z \n
///  (j + 1) P_{j+1}(z) = (2j + 1) z P_j(z) - j P_{j-1}(z)
fn legendre_pair(n: usize, z: f64) -> (f64, f64) {
    let mut p_prev = 0.0;
    let mut p = 1.0;
    for j in 0..n {
        let p_next = ((2 * j + 1) as f64 * z * p - j as f64 * p_prev) / (j + 1) as f64;
        p_prev = p;
        p = p_next;
    }
    (p, p_prev)
}

/// Returns the `npt` Gauss-Legendre points and weights mapped to [0, 1],
/// with points in ascending order.
///
/// The rule integrates polynomials of degree `2 * npt - 1` exactly.
pub fn gauss_legendre(npt: usize) -> (Vec<f64>, Vec<f64>) {
    let n = npt as f64;
    let mut points = Vec::with_capacity(npt);
    let mut weights = Vec::with_capacity(npt);

    for i in 0..npt {
        // Newton iteration on P_n from the usual cosine initial guess.
        let mut z = (PI * (i as f64 + 0.75) / (n + 0.5)).cos();
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let (p, p_prev) = legendre_pair(npt, z);
            let step = p * (z * z - 1.0) / (n * (z * p - p_prev));
            z -= step;
            if step.abs() < NEWTON_TOLERANCE {
                break;
            }
        }
        let (p, p_prev) = legendre_pair(npt, z);
        let derivative = n * (z * p - p_prev) / (z * z - 1.0);

        // The guesses run from z near 1 downwards, so x = (1 - z) / 2 ascends.
        points.push(0.5 * (1.0 - z));
        weights.push(1.0 / ((1.0 - z * z) * derivative * derivative));
    }

    (points, weights)
}

/// Evaluates the first `k` orthonormal scaling functions at `x` in [0, 1]:
/// φ_i(x) = sqrt(2i + 1) P_i(2x - 1).
pub fn scaling_functions(x: f64, k: usize) -> Vec<f64> {
    let z = 2.0 * x - 1.0;
    let mut values = Vec::with_capacity(k);
    let mut p_prev = 0.0;
    let mut p = 1.0;
    for j in 0..k {
        values.push(((2 * j + 1) as f64).sqrt() * p);
        let p_next = ((2 * j + 1) as f64 * z * p - j as f64 * p_prev) / (j + 1) as f64;
        p_prev = p;
        p = p_next;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        for npt in 1..=20 {
            let (points, weights) = gauss_legendre(npt);
            let total: f64 = weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-13, "npt {npt}: {total}");
            assert!(points.windows(2).all(|w| w[0] < w[1]));
            assert!(points.iter().all(|&x| x > 0.0 && x < 1.0));
        }
    }

    #[test]
    fn integrates_monomials_exactly() {
        let npt = 7;
        let (points, weights) = gauss_legendre(npt);
        for m in 0..2 * npt {
            let integral: f64 = points
                .iter()
                .zip(&weights)
                .map(|(x, w)| w * x.powi(m as i32))
                .sum();
            let exact = 1.0 / (m as f64 + 1.0);
            assert!((integral - exact).abs() < 1e-14, "x^{m}: {integral} vs {exact}");
        }
    }

    #[test]
    fn scaling_functions_are_orthonormal() {
        let k = 10;
        let (points, weights) = gauss_legendre(k);
        let phi: Vec<Vec<f64>> = points.iter().map(|&x| scaling_functions(x, k)).collect();
        for i in 0..k {
            for j in 0..k {
                let inner: f64 = (0..k).map(|q| weights[q] * phi[q][i] * phi[q][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((inner - expected).abs() < 1e-12, "<{i},{j}> = {inner}");
            }
        }
    }

    #[test]
    fn endpoint_values() {
        let k = 5;
        let left = scaling_functions(0.0, k);
        let right = scaling_functions(1.0, k);
        for i in 0..k {
            let norm = ((2 * i + 1) as f64).sqrt();
            assert!((right[i] - norm).abs() < 1e-12);
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            assert!((left[i] - sign * norm).abs() < 1e-12);
        }
    }
}
