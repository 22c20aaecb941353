// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

pub mod cancellation;
pub(crate) mod homopolymers;
pub mod regions;

pub use cancellation::CancellationToken;
pub use regions::Region;

use bio::stats::{LogProb, Prob};

/// Tolerated numerical overshoot of probabilities beyond [0, 1].
pub(crate) const NUMERICAL_EPSILON: f64 = 1e-9;

/// Convert the given value into a probability, clamping numerical overshoot of at most
/// `NUMERICAL_EPSILON` beyond [0, 1]. Returns `None` for anything else, including NaN.
pub(crate) fn cap_probability(value: f64) -> Option<Prob> {
    let clamped = if value.abs() <= NUMERICAL_EPSILON {
        0.0
    } else if (value - 1.0).abs() <= NUMERICAL_EPSILON {
        1.0
    } else {
        value
    };
    Prob::checked(clamped).ok()
}

pub(crate) fn logit(p: Prob) -> f64 {
    let p = LogProb::from(p);
    *p - *p.ln_one_minus_exp()
}

pub(crate) fn expit(x: f64) -> Prob {
    Prob(1.0 / (1.0 + (-x).exp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_probability() {
        assert_eq!(cap_probability(0.5), Some(Prob(0.5)));
        assert_eq!(cap_probability(1.0 + 1e-12), Some(Prob(1.0)));
        assert_eq!(cap_probability(-1e-12), Some(Prob(0.0)));
        assert_eq!(cap_probability(1.1), None);
        assert_eq!(cap_probability(-0.1), None);
        assert_eq!(cap_probability(f64::NAN), None);
        assert_eq!(cap_probability(f64::INFINITY), None);
    }

    #[test]
    fn test_logit_expit() {
        assert_relative_eq!(logit(Prob(0.5)), 0.0, epsilon = 1e-12);
        assert_relative_eq!(logit(Prob(0.01)), (0.01f64 / 0.99).ln(), epsilon = 1e-12);
        assert_relative_eq!(*expit(logit(Prob(0.01))), 0.01, epsilon = 1e-12);
    }
}
