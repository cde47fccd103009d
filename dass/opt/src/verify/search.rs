//! Search for the largest interchange distance that verifies.
use dass_utils::{DassResult, Error};
use std::fmt::Display;
use std::str::FromStr;

/// How candidate distances are visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchStrategy {
    /// Try every distance from the lower bound up and stop at the first
    /// failure.
    #[default]
    Linear,
    /// Bisect the domain. Agrees with [SearchStrategy::Linear] when
    /// verification is monotone in the distance.
    Binary,
}

impl FromStr for SearchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(SearchStrategy::Linear),
            "binary" => Ok(SearchStrategy::Binary),
            _ => Err(Error::configuration(format!(
                "unknown search strategy `{s}', expected `linear' or `binary'"
            ))),
        }
    }
}

impl Display for SearchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchStrategy::Linear => write!(f, "linear"),
            SearchStrategy::Binary => write!(f, "binary"),
        }
    }
}

/// The distance to commit for the domain `[lower, upper]`: `upper` when
/// every distance passes `check`, otherwise one less than the first
/// failing distance (saturating at zero).
pub fn search_depth<F>(
    lower: u32,
    upper: u32,
    strategy: SearchStrategy,
    mut check: F,
) -> DassResult<u32>
where
    F: FnMut(u32) -> DassResult<bool>,
{
    if lower > upper {
        return Err(Error::invalid_search_domain(lower, upper));
    }
    match strategy {
        SearchStrategy::Linear => {
            for d in lower..=upper {
                if !check(d)? {
                    return Ok(d.saturating_sub(1));
                }
            }
            Ok(upper)
        }
        SearchStrategy::Binary => {
            let (mut lo, mut hi) = (u64::from(lower), u64::from(upper) + 1);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                // `mid <= upper`, so it fits.
                if check(mid as u32)? {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            Ok(lo.saturating_sub(1) as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dass_utils::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn first_failure_commits_the_previous_distance() {
        let below_three = |d: u32| Ok(d < 3);
        for s in [SearchStrategy::Linear, SearchStrategy::Binary] {
            assert_eq!(search_depth(1, 8, s, below_three).unwrap(), 2);
            assert_eq!(search_depth(0, 2, s, below_three).unwrap(), 2);
            assert_eq!(search_depth(5, 8, s, below_three).unwrap(), 4);
            assert_eq!(search_depth(0, 0, s, |_| Ok(false)).unwrap(), 0);
        }
    }

    #[test]
    fn linear_search_stops_at_the_first_failure() {
        let mut tried = vec![];
        let d = search_depth(1, 10, SearchStrategy::Linear, |d| {
            tried.push(d);
            Ok(d != 4)
        })
        .unwrap();
        assert_eq!(d, 3);
        assert_eq!(tried, vec![1, 2, 3, 4]);
    }

    #[test]
    fn empty_domain_is_rejected() {
        let err = search_depth(3, 2, SearchStrategy::Binary, |_| Ok(true))
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::InvalidSearchDomain { lower: 3, upper: 2 }
        );
    }

    #[test]
    fn oracle_errors_propagate() {
        let res = search_depth(0, 4, SearchStrategy::Linear, |_| {
            Err(Error::oracle_failure("boom"))
        });
        assert!(res.is_err());
    }

    #[test]
    fn strategies_parse() {
        let s: SearchStrategy = "binary".parse().unwrap();
        assert_eq!(s, SearchStrategy::Binary);
        assert!("random".parse::<SearchStrategy>().is_err());
    }

    proptest! {
        #[test]
        fn strategies_agree_on_monotone_checks(
            lower in 0u32..64,
            len in 0u32..64,
            threshold in 0u32..160,
        ) {
            let upper = lower + len;
            let passes = |d: u32| Ok(d < threshold);
            let linear =
                search_depth(lower, upper, SearchStrategy::Linear, passes)
                    .unwrap();
            let binary =
                search_depth(lower, upper, SearchStrategy::Binary, passes)
                    .unwrap();
            prop_assert_eq!(linear, binary);
            let expected = if threshold > upper {
                upper
            } else {
                threshold.max(lower).saturating_sub(1)
            };
            prop_assert_eq!(linear, expected);
        }
    }
}
