use attribution_schema::ActivityRecord;
use core_attribution::config::{ExposureConfig, LinkAttributionConfig};
use core_attribution::{
    attribute_and_price, ActivityTiles, Bounds, ConcentrationField, CostFactors, Grid,
    GridLayout, Link, LinkAttributor, Network, Species,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use geo::Coord;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const CELL_SIZE: f64 = 10.0;

fn layout(cells: usize) -> GridLayout {
    let extent = (cells - 1) as f64 * CELL_SIZE;
    GridLayout::new(Bounds::new(0.0, 0.0, extent, extent).unwrap(), CELL_SIZE).unwrap()
}

/// Street grid with one horizontal and one vertical link every `spacing` cells.
fn street_grid(cells: usize, spacing: usize) -> Network {
    let extent = (cells - 1) as f64 * CELL_SIZE;
    let mut links = Vec::new();
    for line in (0..cells).step_by(spacing) {
        let offset = line as f64 * CELL_SIZE + CELL_SIZE / 2.0;
        links.push(Link::new(
            format!("h{line}"),
            Coord { x: 0.0, y: offset },
            Coord { x: extent, y: offset },
            extent,
        ));
        links.push(Link::new(
            format!("v{line}"),
            Coord { x: offset, y: 0.0 },
            Coord { x: offset, y: extent },
            extent,
        ));
    }
    Network::new(links).unwrap()
}

fn random_field(layout: GridLayout, buckets: usize, seed: u64) -> ConcentrationField {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut field = ConcentrationField::new(layout, 3600.0, 0.0);
    for bucket in 0..buckets {
        for species in ["NO2", "PM10"] {
            let values = (0..layout.len())
                .map(|_| {
                    // Roughly one cell in ten is a building.
                    if rng.gen_bool(0.1) {
                        -1.0
                    } else {
                        rng.gen_range(0.0_f64..80.0)
                    }
                })
                .collect();
            field
                .insert(
                    bucket as f64 * 3600.0,
                    Species::from(species),
                    Grid::from_values(layout, values).unwrap(),
                )
                .unwrap();
        }
    }
    field
}

fn settings() -> LinkAttributionConfig {
    LinkAttributionConfig {
        smoothing_radius: 20.0,
        search_radius: 60.0,
        buffer_segments: 8,
    }
}

fn bench_link_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_cache");
    for cells in [32usize, 64, 128] {
        let network = street_grid(cells, 8);
        group.bench_with_input(BenchmarkId::new("build", cells), &cells, |b, &cells| {
            b.iter(|| LinkAttributor::build(&network, layout(cells), &settings()).unwrap());
        });
    }
    group.finish();
}

fn bench_attribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribution");
    let factors = CostFactors::from_config(&Default::default()).unwrap();

    for cells in [32usize, 64] {
        let network = street_grid(cells, 8);
        let attributor = LinkAttributor::build(&network, layout(cells), &settings()).unwrap();
        let field = random_field(layout(cells), 6, 0xA11CE);

        group.bench_with_input(BenchmarkId::new("links", cells), &cells, |b, _| {
            b.iter(|| attribute_and_price(&attributor, &field, &factors).unwrap());
        });

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let extent = (cells - 1) as f64 * CELL_SIZE;
        let activities: Vec<ActivityRecord> = (0..2_000)
            .map(|idx| {
                let start = rng.gen_range(0.0_f64..18_000.0);
                ActivityRecord {
                    person_id: format!("p{}", idx % 500),
                    x: rng.gen_range(0.0_f64..extent),
                    y: rng.gen_range(0.0_f64..extent),
                    start_time: Some(start),
                    end_time: Some(start + rng.gen_range(600.0_f64..7200.0)),
                }
            })
            .collect();
        let tiles = ActivityTiles::from_records(
            layout(cells),
            &activities,
            None,
            &ExposureConfig::default(),
        );
        group.bench_with_input(BenchmarkId::new("exposure_field", cells), &cells, |b, _| {
            b.iter(|| tiles.exposure_field(&field).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_link_cache, bench_attribution);
criterion_main!(benches);
