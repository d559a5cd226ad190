//! Property tests for the analysis primitives.

use proptest::prelude::*;

use forensic_engine::analysis::bankruptcy::{BankruptcyConfig, BankruptcyScorer};
use forensic_engine::analysis::benford::{expected_share, DigitLawTest, DigitTestConfig};
use forensic_engine::analysis::risk::{RiskAggregator, RiskCategory, RiskConfig};
use forensic_engine::analysis::ZoneBand;

fn subscore() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![Just(None), (0.0f64..=100.0).prop_map(Some)]
}

fn subscores() -> impl Strategy<Value = Vec<(RiskCategory, Option<f64>)>> {
    proptest::collection::vec(subscore(), 6).prop_map(|values| RiskCategory::ALL.into_iter().zip(values).collect())
}

/// Values whose leading digits follow the first-digit law almost exactly.
fn benford_sample(total: usize) -> Vec<f64> {
    let mut values = Vec::with_capacity(total);
    for d in 1..=9u8 {
        let count = (expected_share(d) * total as f64).round() as usize;
        values.extend((0..count).map(|i| f64::from(d) * 1000.0 + i as f64 % 900.0));
    }
    values
}

proptest! {
    #[test]
    fn digit_test_depends_only_on_the_multiset(
        values in proptest::collection::vec(1.0f64..1e9, 30..200),
        seed in any::<u64>(),
    ) {
        let config = DigitTestConfig::default();
        let test = DigitLawTest::new(&config);

        let mut shuffled = values.clone();
        // Deterministic Fisher-Yates driven by the seed
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }

        prop_assert_eq!(test.run(values), test.run(shuffled));
    }

    #[test]
    fn composite_is_order_invariant(inputs in subscores(), rotation in 0usize..6) {
        let config = RiskConfig::default();
        let aggregator = RiskAggregator::new(&config);

        let mut rotated = inputs.clone();
        rotated.rotate_left(rotation);
        let mut reversed = inputs.clone();
        reversed.reverse();

        let base = aggregator.aggregate(inputs);
        prop_assert_eq!(&base, &aggregator.aggregate(rotated));
        prop_assert_eq!(&base, &aggregator.aggregate(reversed));
    }

    #[test]
    fn missing_subscore_never_raises_composite(inputs in subscores(), drop in 0usize..6) {
        let config = RiskConfig::default();
        let aggregator = RiskAggregator::new(&config);

        let mut degraded = inputs.clone();
        degraded[drop].1 = None;

        let full = aggregator.aggregate(inputs).composite;
        let partial = aggregator.aggregate(degraded).composite;
        prop_assert!(partial <= full + 1e-9, "{} > {}", partial, full);
    }

    #[test]
    fn bankruptcy_bands_are_contiguous(a in -10.0f64..10.0, b in -10.0f64..10.0) {
        let compiled = BankruptcyConfig::default().compile().unwrap();
        let scorer = BankruptcyScorer::new(&compiled);
        let rank = |band: ZoneBand| match band {
            ZoneBand::Distress => 0,
            ZoneBand::Grey => 1,
            ZoneBand::Safe => 2,
        };
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(rank(scorer.classify(low)) <= rank(scorer.classify(high)));
    }
}

#[test]
fn uniform_digits_are_anomalous() {
    let config = DigitTestConfig::default();
    let values: Vec<f64> = (1..=9).flat_map(|d| std::iter::repeat(f64::from(d) * 100.0).take(20)).collect();
    assert!(DigitLawTest::new(&config).run(values).is_anomalous());
}

#[test]
fn benford_distributed_digits_are_not_anomalous() {
    let config = DigitTestConfig::default();
    let result = DigitLawTest::new(&config).run(benford_sample(1000));
    assert!(!result.is_anomalous(), "{result:?}");
}

#[test]
fn scenario_subscores_classify_medium() {
    let config = RiskConfig::default();
    let score = RiskAggregator::new(&config).aggregate([
        (RiskCategory::Sentiment, Some(70.0)),
        (RiskCategory::ForensicFlags, Some(70.0)),
        (RiskCategory::EarningsQuality, Some(40.0)),
        (RiskCategory::FinancialHealth, Some(85.0)),
        (RiskCategory::MarketSignal, Some(70.0)),
        (RiskCategory::DisclosureQuality, Some(70.0)),
    ]);
    assert!((score.composite - 67.0).abs() < 1e-9);
    assert_eq!(score.classification, "MEDIUM");
}
