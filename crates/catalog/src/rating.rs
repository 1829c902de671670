//! Average-rating computation.
//!
//! The average is always recomputed from the full current review set, never kept as an
//! incrementally maintained counter.

use prodreview_core::Rating;

use crate::review::Review;

/// Arithmetic mean of the reviews' ratings, or `0.0` when there are none.
pub fn average_rating(reviews: &[Review]) -> f64 {
    average_of(reviews.iter().map(|r| r.rating))
}

/// Arithmetic mean of a rating sequence, or `0.0` when it is empty.
pub fn average_of(ratings: impl IntoIterator<Item = Rating>) -> f64 {
    let (sum, count) = ratings
        .into_iter()
        .fold((0i64, 0u64), |(sum, count), r| (sum + i64::from(r.value()), count + 1));

    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings(values: &[i32]) -> Vec<Rating> {
        values.iter().map(|v| Rating::new(*v).unwrap()).collect()
    }

    #[test]
    fn empty_set_averages_to_zero() {
        assert_eq!(average_of(Vec::new()), 0.0);
        assert_eq!(average_rating(&[]), 0.0);
    }

    #[test]
    fn mixed_ratings_average() {
        let avg = average_of(ratings(&[5, 4, 2]));
        assert!((avg - 11.0 / 3.0).abs() < 1e-9);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: the average equals sum/count and stays inside the rating range.
            #[test]
            fn average_matches_sum_over_count(values in proptest::collection::vec(1i32..=5, 1..200)) {
                let avg = average_of(ratings(&values));
                let expected = values.iter().map(|v| f64::from(*v)).sum::<f64>() / values.len() as f64;
                prop_assert!((avg - expected).abs() < 1e-9);
                prop_assert!((1.0..=5.0).contains(&avg));
            }

            /// Property: the average does not depend on review order.
            #[test]
            fn average_is_order_independent(mut values in proptest::collection::vec(1i32..=5, 0..50)) {
                let forward = average_of(ratings(&values));
                values.reverse();
                let backward = average_of(ratings(&values));
                prop_assert!((forward - backward).abs() < 1e-9);
            }
        }
    }
}
