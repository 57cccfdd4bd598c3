use district_energy_hub::clustering::*;
use district_energy_hub::optimizer::MicroLpBackend;
use ndarray::Array3;
use proptest::prelude::*;

const STEPS: usize = 4;

fn horizon(max_periods: usize) -> impl Strategy<Value = Vec<f64>> {
    (2..=max_periods).prop_flat_map(|periods| prop::collection::vec(1.0..100.0f64, periods * STEPS))
}

proptest! {
    #[test]
    fn test_distance_matrix_is_a_metric_table(
        values in prop::collection::vec(0.0..50.0f64, 2 * STEPS * 5),
        p in prop_oneof![Just(1.0), Just(2.0), Just(f64::INFINITY)],
    ) {
        let raw = Array3::from_shape_vec((2, STEPS, 5), values).unwrap();
        let normalized = normalize(&raw, &[0.5, 0.5]);
        prop_assert!(normalized.iter().all(|v| (-1e-12..=1.0 + 1e-12).contains(v)));
        let d = distance_matrix(&normalized, p);
        for i in 0..5 {
            prop_assert!(d[[i, i]].abs() < 1e-12);
            for j in 0..5 {
                prop_assert!(d[[i, j]] >= 0.0);
                prop_assert!((d[[i, j]] - d[[j, i]]).abs() < 1e-12);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_clusters_cover_every_period_and_preserve_energy(
        heat in horizon(5),
        k in 1..=2usize,
    ) {
        let periods = heat.len() / STEPS;
        let total: f64 = heat.iter().sum();
        let input = ClusteringInput::from_series(&[("b0.demand.heat".to_string(), heat)], STEPS).unwrap();
        let clusterer = TimeSeriesClusterer::new(
            ClusterSettings { clusters: k, ..Default::default() },
            Box::new(MicroLpBackend),
        );
        let set = clusterer.cluster(&input).unwrap();

        prop_assert_eq!(set.len(), k);
        prop_assert_eq!(set.weights.iter().sum::<usize>(), periods);
        prop_assert_eq!(set.assignment.len(), periods);
        for (c, medoid) in set.medoids.iter().enumerate() {
            prop_assert_eq!(set.assignment[*medoid], c);
        }
        let matrix = set.assignment_matrix();
        prop_assert!(matrix.rows().into_iter().all(|row| row.sum() == 1));

        let represented = set.weighted_total("b0.demand.heat").unwrap();
        prop_assert!((represented - total).abs() < 1e-6 * total.max(1.0));
    }
}

#[test]
fn test_ambient_series_keeps_raw_medoid() {
    let mut heat = vec![10.0; STEPS];
    heat.extend(vec![30.0; STEPS]);
    let ambient: Vec<f64> = (0..2 * STEPS).map(|t| t as f64).collect();
    let input = ClusteringInput::from_series(
        &[("b0.demand.heat".to_string(), heat), ("ambient".to_string(), ambient)],
        STEPS,
    )
    .unwrap()
    .keep_raw("ambient");
    let clusterer = TimeSeriesClusterer::new(
        ClusterSettings {
            clusters: 1,
            ..Default::default()
        },
        Box::new(MicroLpBackend),
    );
    let set = clusterer.cluster(&input).unwrap();
    let medoid = set.medoids[0];
    let ambient = set.profile("ambient", 0).unwrap().to_vec();
    let raw: Vec<f64> = (medoid * STEPS..(medoid + 1) * STEPS).map(|t| t as f64).collect();
    assert_eq!(ambient, raw);
    assert!((set.weighted_total("b0.demand.heat").unwrap() - 160.0).abs() < 1e-9);
}

#[test]
fn test_more_clusters_than_periods_is_rejected() {
    let input = ClusteringInput::from_series(&[("b0.demand.heat".to_string(), vec![1.0; 2 * STEPS])], STEPS).unwrap();
    let clusterer = TimeSeriesClusterer::new(
        ClusterSettings {
            clusters: 3,
            ..Default::default()
        },
        Box::new(MicroLpBackend),
    );
    assert!(clusterer.cluster(&input).is_err());
}
