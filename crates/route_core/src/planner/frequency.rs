//! Visit-frequency decomposition by client category.
//!
//! Concrete week-days per category, chosen so the long-run weekly mean hits
//! the category target without cross-week bookkeeping:
//!
//! - **A** (2.5/week): Monday + Wednesday every week, Friday on odd ISO
//!   weeks. Every rolling 7-day window holds at least two visits.
//! - **B** (1/week): Monday.
//! - **C** (0.5/week): Monday on even ISO weeks.

use chrono::Weekday;

use crate::repository::ClientCategory;

/// Week-days a client of `category` must be visited in ISO week `iso_week`.
pub fn visit_days(category: ClientCategory, iso_week: u32) -> Vec<Weekday> {
    match category {
        ClientCategory::A => {
            let mut days = vec![Weekday::Mon, Weekday::Wed];
            if iso_week % 2 == 1 {
                days.push(Weekday::Fri);
            }
            days
        }
        ClientCategory::B => vec![Weekday::Mon],
        ClientCategory::C => {
            if iso_week % 2 == 0 {
                vec![Weekday::Mon]
            } else {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_a_alternates_friday() {
        assert_eq!(
            visit_days(ClientCategory::A, 23),
            vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]
        );
        assert_eq!(
            visit_days(ClientCategory::A, 24),
            vec![Weekday::Mon, Weekday::Wed]
        );
    }

    #[test]
    fn category_a_long_run_mean_is_two_and_a_half() {
        let total: usize = (1..=52)
            .map(|week| visit_days(ClientCategory::A, week).len())
            .sum();
        assert_eq!(total as f64 / 52.0, 2.5);
    }

    #[test]
    fn category_b_every_monday() {
        for week in 1..=8 {
            assert_eq!(visit_days(ClientCategory::B, week), vec![Weekday::Mon]);
        }
    }

    #[test]
    fn category_c_alternates_weeks() {
        assert_eq!(visit_days(ClientCategory::C, 24), vec![Weekday::Mon]);
        assert!(visit_days(ClientCategory::C, 25).is_empty());
    }
}
