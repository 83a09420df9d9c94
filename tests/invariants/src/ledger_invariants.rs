//! Property-based tests for the expected-value ledger.
//!
//! Properties tested:
//! 1. Conservation: tracked balances always equal mined - fees - external
//! 2. Pool expectations are the running sum of their deltas
//! 3. Overflow is an error, never a wrapped total

#[cfg(test)]
mod tests {
    use {
        proptest::prelude::*,
        zqa_harness::{HarnessError, InvariantModel},
        zqa_rpc_types::{Amount, COIN},
    };

    const NODES: usize = 4;

    #[derive(Debug, Clone)]
    enum Event {
        Mined { node: usize, zat: i64 },
        Transfer { from: usize, to: Option<usize>, zat: i64, fee: i64 },
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            (0..NODES, 1..=50 * COIN).prop_map(|(node, zat)| Event::Mined { node, zat }),
            (0..NODES, prop::option::of(0..NODES), 0..=10 * COIN, 0..=COIN / 1000).prop_map(
                |(from, to, zat, fee)| Event::Transfer { from, to, zat, fee }
            ),
        ]
    }

    fn apply(model: &mut InvariantModel, event: &Event) {
        match *event {
            Event::Mined { node, zat } => model.record_mined(node, Amount::from_zat(zat)).unwrap(),
            Event::Transfer { from, to, zat, fee } => model
                .record_transfer(from, to, Amount::from_zat(zat), Amount::from_zat(fee))
                .unwrap(),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 1. Conservation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn ledger_conserves_value(events in prop::collection::vec(event(), 0..60)) {
            let mut model = InvariantModel::new();
            let mut mined = 0i64;
            let mut fees = 0i64;
            let mut external = 0i64;
            for event in &events {
                apply(&mut model, event);
                match *event {
                    Event::Mined { zat, .. } => mined += zat,
                    Event::Transfer { to, zat, fee, .. } => {
                        fees += fee;
                        if to.is_none() {
                            external += zat;
                        }
                    }
                }
                prop_assert!(model.check_conservation().is_ok());
            }
            prop_assert_eq!(model.mined(), Amount::from_zat(mined));
            prop_assert_eq!(model.fees(), Amount::from_zat(fees));
            prop_assert_eq!(model.external(), Amount::from_zat(external));
            prop_assert_eq!(
                model.tracked_total().unwrap(),
                Amount::from_zat(mined - fees - external)
            );
        }

        #[test]
        fn self_transfer_only_costs_the_fee(
            node in 0..NODES,
            zat in 0..=10 * COIN,
            fee in 0..=COIN / 1000,
        ) {
            let mut model = InvariantModel::new();
            model.record_mined(node, Amount::from_zat(50 * COIN)).unwrap();
            model
                .record_transfer(node, Some(node), Amount::from_zat(zat), Amount::from_zat(fee))
                .unwrap();
            prop_assert_eq!(model.expected_balance(node), Amount::from_zat(50 * COIN - fee));
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 2. Pools
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn pool_is_sum_of_deltas(deltas in prop::collection::vec(-100 * COIN..=100 * COIN, 0..40)) {
            let mut model = InvariantModel::new();
            for delta in &deltas {
                model.record_pool_delta("sprout", Amount::from_zat(*delta)).unwrap();
            }
            let expected: i64 = deltas.iter().sum();
            prop_assert_eq!(model.expected_pool("sprout"), Amount::from_zat(expected));
            prop_assert_eq!(model.expected_pool("sapling"), Amount::ZERO);
            // Pool movements never touch the transparent ledger.
            prop_assert_eq!(model.tracked_total().unwrap(), Amount::ZERO);
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 3. Overflow
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn overflow_is_reported() {
        let mut model = InvariantModel::new();
        model.record_mined(0, Amount::from_zat(i64::MAX)).unwrap();
        let before = model.clone();
        assert!(matches!(
            model.record_mined(1, Amount::from_zat(1)),
            Err(HarnessError::LedgerOverflow { .. })
        ));
        assert_eq!(model.mined(), before.mined());

        let mut model = InvariantModel::new();
        model.record_pool_delta("sprout", Amount::from_zat(i64::MIN)).unwrap();
        assert!(matches!(
            model.record_pool_delta("sprout", Amount::from_zat(-1)),
            Err(HarnessError::LedgerOverflow { .. })
        ));
        assert!(matches!(
            model.record_transfer(0, Some(1), Amount::from_zat(i64::MAX), Amount::from_zat(1)),
            Err(HarnessError::LedgerOverflow { .. })
        ));
    }
}
