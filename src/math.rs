use std::cmp::Ordering;

use itertools::Itertools;
use ndarray::ArrayView1;
use num_traits::{Float, FromPrimitive};

/// The result of an ordinary least squares fit of `y = slope * x + intercept`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit<E> {
    pub slope: E,
    pub intercept: E,
    /// Coefficient of determination, in `[0, 1]`
    pub r2: E,
    /// Root mean square of the residuals
    pub rmse: E,
}

impl<E: Float> LinearFit<E> {
    pub fn evaluate(&self, x: E) -> E {
        self.slope.mul_add(x, self.intercept)
    }
}

/// Fit a straight line through the observations `(x, y)` by ordinary least squares
///
/// Returns `None` when the inputs differ in length, contain fewer than two points, or when `x` has
/// no spread, in which case the slope is undefined. When `y` has no spread (beyond rounding) every
/// line through the mean is an exact fit and the coefficient of determination is one.
///
/// # Examples
///
/// ```
/// use voltammetry::math::linear_fit;
///
/// let x = [0., 1., 2., 3.];
/// let y = [1., 3., 5., 7.];
/// let fit = linear_fit(&x, &y).unwrap();
///
/// approx::assert_relative_eq!(fit.slope, 2.);
/// approx::assert_relative_eq!(fit.intercept, 1.);
/// approx::assert_relative_eq!(fit.r2, 1.);
/// ```
pub fn linear_fit<E: Float + FromPrimitive>(x: &[E], y: &[E]) -> Option<LinearFit<E>> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = E::from_usize(x.len())?;
    let x = ArrayView1::from(x);
    let y = ArrayView1::from(y);

    let x_mean = x.mean()?;
    let y_mean = y.mean()?;
    let dx = x.mapv(|xi| xi - x_mean);
    let dy = y.mapv(|yi| yi - y_mean);

    let sxx = (&dx * &dx).sum();
    if sxx.is_nan() || sxx <= E::zero() {
        return None;
    }
    let sxy = (&dx * &dy).sum();
    let ss_tot = (&dy * &dy).sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let ss_res = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| (yi - slope.mul_add(xi, intercept)).powi(2))
        .fold(E::zero(), |acc, r| acc + r);

    let rounding = E::epsilon() * n * y_mean.abs().max(E::one());
    let r2 = if ss_tot.sqrt() <= rounding {
        E::one()
    } else {
        (E::one() - ss_res / ss_tot).max(E::zero()).min(E::one())
    };

    if !(slope.is_finite() && intercept.is_finite()) {
        return None;
    }

    Some(LinearFit {
        slope,
        intercept,
        r2,
        rmse: (ss_res / n).sqrt(),
    })
}

/// Ratio of the population standard deviation of `y` to its range
///
/// A signal with no range is perfectly stable and has ratio zero.
pub fn stability_ratio<E: Float + FromPrimitive>(y: &[E]) -> E {
    if y.is_empty() {
        return E::zero();
    }
    let (min, max) = y
        .iter()
        .fold((E::infinity(), E::neg_infinity()), |(lo, hi), &yi| {
            (lo.min(yi), hi.max(yi))
        });
    let range = max - min;
    if range <= E::zero() {
        return E::zero();
    }
    ArrayView1::from(y).std(E::zero()) / range
}

/// Robust estimate of the white noise standard deviation in `y`
///
/// Uses the median absolute second difference, which is blind to constant offsets and linear
/// drift. For Gaussian noise of standard deviation σ the second difference has standard deviation
/// σ√6, and the median absolute value of a normal variate is 0.6745 of its standard deviation.
/// Returns `None` for fewer than three samples.
pub fn noise_level<E: Float + FromPrimitive>(y: &[E]) -> Option<E> {
    let mut second_differences = y
        .iter()
        .tuple_windows()
        .map(|(&a, &b, &c)| (a - b - b + c).abs())
        .collect::<Vec<_>>();
    if second_differences.is_empty() {
        return None;
    }
    second_differences.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mid = second_differences.len() / 2;
    let median = if second_differences.len() % 2 == 0 {
        (second_differences[mid - 1] + second_differences[mid]) / (E::one() + E::one())
    } else {
        second_differences[mid]
    };

    Some(median / E::from_f64(0.674_5 * 6.0_f64.sqrt())?)
}

/// Mean of `values` weighted by `weights`, or `None` if the weights carry no mass
pub fn weighted_mean<E: Float>(values: &[E], weights: &[E]) -> Option<E> {
    let (weighted_sum, total_weight) = values
        .iter()
        .zip(weights)
        .fold((E::zero(), E::zero()), |(sum, total), (&v, &w)| {
            (sum + v * w, total + w)
        });
    (total_weight > E::zero()).then(|| weighted_sum / total_weight)
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use proptest::prelude::*;
    use rand_isaac::isaac64::Isaac64Rng;

    use super::{linear_fit, noise_level, stability_ratio, weighted_mean};

    #[test]
    fn straight_lines_are_fitted_exactly() {
        let x = (0..20).map(|ii| 0.005 * f64::from(ii)).collect::<Vec<_>>();
        let y = x.iter().map(|xi| 12.5f64.mul_add(*xi, -3.0)).collect::<Vec<_>>();

        let fit = linear_fit(&x, &y).unwrap();

        approx::assert_relative_eq!(fit.slope, 12.5, max_relative = 1e-10);
        approx::assert_relative_eq!(fit.intercept, -3.0, max_relative = 1e-10);
        approx::assert_relative_eq!(fit.r2, 1.0, max_relative = 1e-10);
        approx::assert_relative_eq!(fit.evaluate(0.05), -2.375, max_relative = 1e-10);
        approx::assert_abs_diff_eq!(fit.rmse, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn residual_spread_is_reported() {
        // Best line is 0.2 + 0.2x, leaving residuals of -0.2, 0.6, -0.6 and 0.2
        let fit = linear_fit(&[0.0, 1.0, 2.0, 3.0], &[0.0, 1.0, 0.0, 1.0]).unwrap();

        approx::assert_relative_eq!(fit.slope, 0.2, max_relative = 1e-12);
        approx::assert_relative_eq!(fit.rmse, 0.2f64.sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn constant_signals_fit_with_unit_r2() {
        let x = [0.1, 0.2, 0.3, 0.4, 0.5];
        let y = [2.0; 5];

        let fit = linear_fit(&x, &y).unwrap();

        approx::assert_abs_diff_eq!(fit.slope, 0.0);
        approx::assert_relative_eq!(fit.intercept, 2.0);
        approx::assert_relative_eq!(fit.r2, 1.0);
    }

    #[test]
    fn degenerate_abscissae_have_no_fit() {
        assert!(linear_fit(&[0.2, 0.2, 0.2], &[1.0, 2.0, 3.0]).is_none());
        assert!(linear_fit(&[0.2], &[1.0]).is_none());
        assert!(linear_fit(&[0.1, 0.2], &[1.0]).is_none());
    }

    #[test]
    fn uncorrelated_signals_have_low_r2() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];

        let fit = linear_fit(&x, &y).unwrap();

        assert!(fit.r2 < 0.1);
    }

    #[test]
    fn stability_ratio_of_flat_signal_is_zero() {
        approx::assert_abs_diff_eq!(stability_ratio(&[3.0; 8]), 0.0);
        approx::assert_abs_diff_eq!(stability_ratio::<f64>(&[]), 0.0);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn stability_ratio_of_uniform_ramp_matches_closed_form() {
        let n = 21;
        let y = (0..n).map(|ii| ii as f64 * 0.7).collect::<Vec<_>>();

        let expected = (((n * n - 1) as f64) / 12.0).sqrt() / (n - 1) as f64;

        approx::assert_relative_eq!(stability_ratio(&y), expected, max_relative = 1e-12);
    }

    #[test]
    fn noise_level_ignores_linear_drift() {
        let y = (0..50).map(|ii| 2.0 + 0.3 * f64::from(ii)).collect::<Vec<_>>();
        approx::assert_abs_diff_eq!(noise_level(&y).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn noise_level_averages_the_middle_pair() {
        // Absolute second differences are 1, 2, 1 and 4, with median 1.5
        let y = [0.0, 0.0, 1.0, 0.0, 0.0, 4.0];

        approx::assert_relative_eq!(
            noise_level(&y).unwrap(),
            1.5 / (0.674_5 * 6.0f64.sqrt()),
            max_relative = 1e-12
        );
        assert!(noise_level(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn noise_level_recovers_gaussian_standard_deviation() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let sigma = 0.5;
        let noise = Array::random_using(4000, Normal::new(0., sigma).unwrap(), &mut rng);

        let estimate = noise_level(noise.as_slice().unwrap()).unwrap();

        approx::assert_relative_eq!(estimate, sigma, max_relative = 0.1);
    }

    #[test]
    fn weighted_means_respect_weights() {
        approx::assert_relative_eq!(
            weighted_mean(&[1.0, 3.0], &[3.0, 1.0]).unwrap(),
            1.5
        );
        assert!(weighted_mean(&[1.0, 3.0], &[0.0, 0.0]).is_none());
    }

    proptest! {
        #[test]
        fn r2_is_bounded(
            y in prop::collection::vec(-1e3f64..1e3, 2..40),
        ) {
            #[allow(clippy::cast_precision_loss)]
            let x = (0..y.len()).map(|ii| ii as f64 * 0.01).collect::<Vec<_>>();
            let fit = linear_fit(&x, &y).unwrap();
            prop_assert!((0.0..=1.0).contains(&fit.r2));
        }

        #[test]
        fn stability_ratio_is_bounded(
            y in prop::collection::vec(-1e3f64..1e3, 1..40),
        ) {
            let ratio = stability_ratio(&y);
            prop_assert!((0.0..=0.5 + 1e-12).contains(&ratio));
        }
    }
}
