//! Legendre polynomials on [-1, 1]
//!
//! P_0 = 1, P_1 = x, (k+1) P_{k+1} = (2k+1) x P_k - k P_{k-1}.
//! Derivatives use P'_{k+1} = P'_{k-1} + (2k+1) P_k, which stays exact at
//! the end points.

/// Evaluate P_n(x) and P'_n(x)
pub fn legendre_and_derivative(n: usize, x: f64) -> (f64, f64) {
    let (values, derivs) = legendre_table(n, x);
    (values[n], derivs[n])
}

/// Evaluate P_n(x)
pub fn legendre(n: usize, x: f64) -> f64 {
    legendre_and_derivative(n, x).0
}

/// Values and derivatives of P_0..=P_n at x
pub fn legendre_table(n: usize, x: f64) -> (Vec<f64>, Vec<f64>) {
    let mut p = vec![0.0; n + 1];
    let mut dp = vec![0.0; n + 1];
    p[0] = 1.0;
    if n == 0 {
        return (p, dp);
    }
    p[1] = x;
    dp[1] = 1.0;

    for k in 1..n {
        let kf = k as f64;
        p[k + 1] = ((2.0 * kf + 1.0) * x * p[k] - kf * p[k - 1]) / (kf + 1.0);
        dp[k + 1] = dp[k - 1] + (2.0 * kf + 1.0) * p[k];
    }

    (p, dp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_low_order_values() {
        let x = 0.3;
        assert_relative_eq!(legendre(2, x), 0.5 * (3.0 * x * x - 1.0), epsilon = 1e-15);
        assert_relative_eq!(
            legendre(3, x),
            0.5 * (5.0 * x * x * x - 3.0 * x),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_derivative_at_endpoints() {
        for n in 0..8 {
            let (p, dp) = legendre_and_derivative(n, 1.0);
            assert_relative_eq!(p, 1.0, epsilon = 1e-14);
            assert_relative_eq!(dp, (n * (n + 1)) as f64 / 2.0, epsilon = 1e-12);

            let (_, dm) = legendre_and_derivative(n, -1.0);
            let sign = if n % 2 == 0 { -1.0 } else { 1.0 };
            assert_relative_eq!(dm, sign * (n * (n + 1)) as f64 / 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let h = 1e-6;
        let x = -0.37;
        let (_, dp) = legendre_and_derivative(5, x);
        let fd = (legendre(5, x + h) - legendre(5, x - h)) / (2.0 * h);
        assert!((dp - fd).abs() < 1e-8);
    }
}
