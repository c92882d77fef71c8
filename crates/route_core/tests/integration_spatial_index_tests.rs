//! Spatial index contract: H3 against brute force, grid against H3.

mod support;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use route_core::config::SpatialConfig;
use route_core::geo::Coordinate;
use route_core::spatial::grid::GridSpatialIndex;
use route_core::spatial::h3::H3SpatialIndex;
use route_core::spatial::{SpatialEntity, SpatialIndex};

use support::coord;

/// 1000 entities uniform in a ~10 km box around central Tashkent.
fn seeded_entities() -> Vec<SpatialEntity> {
    let mut rng = StdRng::seed_from_u64(4242);
    (0..1000)
        .map(|i| {
            let lat = 41.26 + rng.gen::<f64>() * 0.09;
            let lon = 69.20 + rng.gen::<f64>() * 0.12;
            SpatialEntity::new(format!("e{i:04}"), coord(lat, lon))
        })
        .collect()
}

fn brute_force(entities: &[SpatialEntity], center: Coordinate, meters: f64) -> Vec<String> {
    let mut ids: Vec<String> = entities
        .iter()
        .filter(|e| center.haversine_m(&e.position) <= meters)
        .map(|e| e.id.clone())
        .collect();
    ids.sort();
    ids
}

/// S6 / property 3: the radius result set equals the exact Haversine
/// filter, for both implementations.
#[test]
fn radius_matches_brute_force_filter() {
    let entities = seeded_entities();
    let h3 = H3SpatialIndex::new(SpatialConfig::default()).unwrap();
    let grid = GridSpatialIndex::new();
    for entity in &entities {
        h3.add(entity.clone()).unwrap();
        grid.add(entity.clone()).unwrap();
    }

    let center = coord(41.305, 69.26);
    for radius in [250.0, 500.0, 1500.0] {
        let expected = brute_force(&entities, center, radius);

        let mut from_h3: Vec<String> =
            h3.radius(center, radius).into_iter().map(|(e, _)| e.id).collect();
        from_h3.sort();
        assert_eq!(from_h3, expected, "h3 radius {radius}");

        let mut from_grid: Vec<String> =
            grid.radius(center, radius).into_iter().map(|(e, _)| e.id).collect();
        from_grid.sort();
        assert_eq!(from_grid, expected, "grid radius {radius}");

        // Soundness: every hit is inside the radius.
        for (entity, distance) in h3.radius(center, radius) {
            assert!(distance <= radius);
            assert!(center.haversine_m(&entity.position) <= radius);
        }
    }
}

/// k-NN agrees across implementations on both membership and order.
#[test]
fn k_nearest_is_stable_across_implementations() {
    let entities = seeded_entities();
    let h3 = H3SpatialIndex::new(SpatialConfig::default()).unwrap();
    let grid = GridSpatialIndex::new();
    for entity in &entities {
        h3.add(entity.clone()).unwrap();
        grid.add(entity.clone()).unwrap();
    }

    let center = coord(41.30, 69.27);
    for k in [1, 5, 25] {
        let from_h3: Vec<String> =
            h3.k_nearest(center, k).into_iter().map(|(e, _)| e.id).collect();
        let from_grid: Vec<String> =
            grid.k_nearest(center, k).into_iter().map(|(e, _)| e.id).collect();
        assert_eq!(from_h3.len(), k);
        assert_eq!(from_h3, from_grid, "k={k}");

        // Distances are non-decreasing.
        let distances: Vec<f64> = h3.k_nearest(center, k).into_iter().map(|(_, d)| d).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }
}

/// Removal and updates reflect immediately in queries.
#[test]
fn mutations_apply_to_subsequent_queries() {
    let h3 = H3SpatialIndex::new(SpatialConfig::default()).unwrap();
    let center = coord(41.30, 69.26);
    h3.add(SpatialEntity::new("near", coord(41.3005, 69.2605))).unwrap();
    h3.add(SpatialEntity::new("mover", coord(41.3010, 69.2610))).unwrap();

    assert_eq!(h3.radius(center, 300.0).len(), 2);

    assert!(h3.remove("near"));
    h3.update(SpatialEntity::new("mover", coord(41.40, 69.40))).unwrap();
    assert!(h3.radius(center, 300.0).is_empty());
    assert_eq!(h3.len(), 1);
}
