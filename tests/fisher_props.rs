use proptest::prelude::*;
use snvpair::calling::{fisher_exact_two_tailed, ContingencyTable};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9_f64.max(1e-7 * a.abs().max(b.abs()))
}

proptest! {
    #[test]
    fn p_value_is_a_probability(a in 0u32..80, b in 0u32..80, c in 0u32..80, d in 0u32..80) {
        let p = fisher_exact_two_tailed(a, b, c, d);
        prop_assert!(p.is_finite());
        prop_assert!(p > 0.0, "observed table always contributes");
        prop_assert!(p <= 1.0);
    }

    #[test]
    fn p_value_ignores_table_orientation(a in 0u32..60, b in 0u32..60, c in 0u32..60, d in 0u32..60) {
        let p = fisher_exact_two_tailed(a, b, c, d);
        prop_assert!(close(p, fisher_exact_two_tailed(c, d, a, b)), "row swap");
        prop_assert!(close(p, fisher_exact_two_tailed(b, a, d, c)), "column swap");
        prop_assert!(close(p, fisher_exact_two_tailed(a, c, b, d)), "transpose");
    }

    #[test]
    fn table_wrapper_matches_free_function(a in 0u32..40, b in 0u32..40, c in 0u32..40, d in 0u32..40) {
        let table = ContingencyTable::new(a, b, c, d);
        prop_assert_eq!(table.total(), u64::from(a + b + c + d));
        prop_assert_eq!(table.fisher_two_tailed(), fisher_exact_two_tailed(a, b, c, d));
    }
}

#[test]
fn proportional_tables_are_not_significant() {
    assert!(fisher_exact_two_tailed(20, 20, 20, 20) > 0.99);
    assert!(fisher_exact_two_tailed(40, 0, 20, 20) < 1e-6);
}
