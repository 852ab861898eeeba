//! Property-based tests for inrep-cat
//!
//! Uses proptest to verify invariants of the IRT models, selection and stopping.

use inrep_cat::{
    estimate_ability, evaluate_stopping, select_next_item, EstimationMethod, EstimatorSettings,
    Item, ItemBank, ItemId, ItemModel, ModelFamily, Selection, SelectionCriterion,
    SelectionSettings, StoppingInput, StoppingRule, TestStatus,
};
use proptest::prelude::*;

fn bank_2pl(params: &[(f64, f64)]) -> ItemBank {
    let items = params
        .iter()
        .enumerate()
        .map(|(i, &(a, b))| Item::two_pl(i as u64 + 1, a, b))
        .collect();
    ItemBank::from_items(ModelFamily::TwoPl, items).unwrap()
}

fn criterion() -> impl Strategy<Value = SelectionCriterion> {
    prop_oneof![
        Just(SelectionCriterion::MaxInformation),
        Just(SelectionCriterion::MaxFisherInformation),
        Just(SelectionCriterion::KullbackLeibler),
        Just(SelectionCriterion::Random),
    ]
}

fn estimation_method() -> impl Strategy<Value = EstimationMethod> {
    prop_oneof![
        Just(EstimationMethod::MaximumLikelihood),
        Just(EstimationMethod::MaximumAPosteriori),
        Just(EstimationMethod::ExpectedAPosteriori),
    ]
}

proptest! {
    // ==================== Probability Properties ====================

    #[test]
    fn two_pl_probability_monotone_in_theta(
        a in 0.2f64..3.0,
        b in -3.0f64..3.0,
        t1 in -6.0f64..6.0,
        t2 in -6.0f64..6.0
    ) {
        let model = ItemModel::TwoPl { a, b };
        let (lo, hi) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        prop_assert!(model.probability(lo) <= model.probability(hi) + 1e-12);
    }

    #[test]
    fn two_pl_symmetric_around_difficulty(
        a in 0.2f64..3.0,
        b in -3.0f64..3.0,
        d in 0.0f64..4.0
    ) {
        let model = ItemModel::TwoPl { a, b };
        let sum = model.probability(b + d) + model.probability(b - d);
        prop_assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn three_pl_bounded_by_guessing(
        a in 0.2f64..3.0,
        b in -3.0f64..3.0,
        c in 0.0f64..0.4,
        theta in -6.0f64..6.0
    ) {
        let model = ItemModel::ThreePl { a, b, c };
        let p = model.probability(theta);
        prop_assert!(p >= c - 1e-12 && p <= 1.0);
        prop_assert!(model.information(theta) >= 0.0);
    }

    #[test]
    fn grm_categories_form_distribution(
        a in 0.3f64..3.0,
        start in -3.0f64..0.0,
        gaps in prop::collection::vec(0.1f64..1.5, 1..5),
        theta in -5.0f64..5.0
    ) {
        let thresholds: Vec<f64> = gaps
            .iter()
            .scan(start, |acc, gap| {
                let t = *acc;
                *acc += gap;
                Some(t)
            })
            .collect();
        let model = ItemModel::Grm { a, thresholds: thresholds.clone() };
        let probs = model.category_probabilities(theta);

        prop_assert_eq!(probs.len(), thresholds.len() + 1);
        prop_assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
        prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        prop_assert!(model.information(theta) >= 0.0);
        prop_assert!(model.fisher_information(theta) >= 0.0);
    }

    // ==================== Estimation Properties ====================

    #[test]
    fn estimate_stays_within_bounds(
        params in prop::collection::vec((0.5f64..2.5, -2.5f64..2.5), 1..12),
        pattern in prop::collection::vec(any::<bool>(), 12),
        method in estimation_method()
    ) {
        let bank = bank_2pl(&params);
        let responses: Vec<(ItemId, u32)> = (0..params.len())
            .map(|i| (ItemId::from(i as u64 + 1), u32::from(pattern[i])))
            .collect();
        let settings = EstimatorSettings::default().with_method(method);

        let estimate = estimate_ability(&responses, &bank, &settings);
        prop_assert!(estimate.theta >= settings.theta_min && estimate.theta <= settings.theta_max);
        prop_assert!(estimate.se > 0.0);
    }

    #[test]
    fn estimate_stays_within_bounds_three_pl(
        params in prop::collection::vec((0.5f64..2.5, -2.5f64..2.5, 0.0f64..0.3), 1..12),
        pattern in prop::collection::vec(any::<bool>(), 12),
        method in estimation_method()
    ) {
        let items = params
            .iter()
            .enumerate()
            .map(|(i, &(a, b, c))| Item::three_pl(i as u64 + 1, a, b, c))
            .collect();
        let bank = ItemBank::from_items(ModelFamily::ThreePl, items).unwrap();
        let responses: Vec<(ItemId, u32)> = (0..params.len())
            .map(|i| (ItemId::from(i as u64 + 1), u32::from(pattern[i])))
            .collect();
        let settings = EstimatorSettings::default().with_method(method);

        let estimate = estimate_ability(&responses, &bank, &settings);
        prop_assert!(estimate.theta >= settings.theta_min && estimate.theta <= settings.theta_max);
        prop_assert!(estimate.se > 0.0);
    }

    #[test]
    fn estimate_stays_within_bounds_grm(
        params in prop::collection::vec((0.5f64..2.5, -2.5f64..0.0, 0.2f64..1.5), 1..10),
        pattern in prop::collection::vec(0u32..4, 10),
        method in estimation_method()
    ) {
        let items = params
            .iter()
            .enumerate()
            .map(|(i, &(a, start, gap))| {
                Item::grm(i as u64 + 1, a, vec![start, start + gap, start + 2.0 * gap])
            })
            .collect();
        let bank = ItemBank::from_items(ModelFamily::Grm, items).unwrap();
        let responses: Vec<(ItemId, u32)> = (0..params.len())
            .map(|i| (ItemId::from(i as u64 + 1), pattern[i]))
            .collect();
        let settings = EstimatorSettings::default().with_method(method);

        let estimate = estimate_ability(&responses, &bank, &settings);
        prop_assert!(estimate.theta >= settings.theta_min && estimate.theta <= settings.theta_max);
        prop_assert!(estimate.se > 0.0);
    }

    // ==================== Selection Properties ====================

    #[test]
    fn selection_never_repeats_an_item(
        params in prop::collection::vec((0.5f64..2.5, -2.5f64..2.5), 2..15),
        mask in prop::collection::vec(any::<bool>(), 15),
        theta in -3.0f64..3.0,
        criterion in criterion(),
        seed in any::<u64>()
    ) {
        let bank = bank_2pl(&params);
        let administered: Vec<ItemId> = (0..params.len())
            .filter(|&i| mask[i])
            .map(|i| ItemId::from(i as u64 + 1))
            .collect();
        let settings = SelectionSettings::with_criterion(criterion);

        match select_next_item(theta, &administered, &bank, &settings, None, seed) {
            Selection::Item(id) => {
                prop_assert!(bank.contains(&id));
                prop_assert!(!administered.contains(&id));
            }
            Selection::Exhausted => prop_assert_eq!(administered.len(), bank.len()),
        }
    }

    #[test]
    fn selection_is_deterministic(
        params in prop::collection::vec((0.5f64..2.5, -2.5f64..2.5), 2..15),
        theta in -3.0f64..3.0,
        criterion in criterion(),
        seed in any::<u64>()
    ) {
        let bank = bank_2pl(&params);
        let administered = vec![ItemId::from(1u64)];
        let settings = SelectionSettings::with_criterion(criterion);

        let first = select_next_item(theta, &administered, &bank, &settings, None, seed);
        let second = select_next_item(theta, &administered, &bank, &settings, None, seed);
        prop_assert_eq!(first, second);
    }

    // ==================== Stopping Properties ====================

    #[test]
    fn stopping_is_idempotent_and_absorbing(
        min_items in 1usize..10,
        extra in 0usize..20,
        min_sem in prop::option::of(0.1f64..0.6),
        administered in 0usize..40,
        se in 0.05f64..2.0,
        bank_exhausted in any::<bool>()
    ) {
        let rule = StoppingRule::new(min_items, min_items + extra, min_sem);
        let input = StoppingInput { administered, se, bank_exhausted };

        let status = evaluate_stopping(&rule, &input);
        prop_assert_eq!(&status, &evaluate_stopping(&rule, &input));

        if status.is_terminal() {
            let later = StoppingInput { administered: 0, se: 10.0, bank_exhausted: false };
            prop_assert_eq!(status.advance(&rule, &later), status.clone());
        }
        if administered >= rule.max_items {
            prop_assert!(matches!(status, TestStatus::Stopped(_)));
        }
    }
}
