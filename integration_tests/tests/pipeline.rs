mod common;

use attribution_schema::{
    render_link_values_csv, render_person_exposure_csv, ActivityLog, FieldRecord, LocationSet,
    NetworkRecord,
};
use core_attribution::{
    attribute_and_price, attribute_exposure, load_attribution_config_from_env, ActivityTiles,
    ConcentrationField, CostFactors, LinkAttributor, LinkId, Network, PersonId, Species,
};

use common::{ensure_test_config, load_fixture};

struct Inputs {
    network: Network,
    field: ConcentrationField,
}

fn load_inputs(bin_size: f64, origin: f64) -> Inputs {
    let network: NetworkRecord = load_fixture("network.json").expect("network fixture");
    let field: FieldRecord = load_fixture("field.json").expect("field fixture");
    Inputs {
        network: Network::from_records(&network.links).expect("valid network"),
        field: ConcentrationField::from_records(&field.rasters, bin_size, origin)
            .expect("valid field"),
    }
}

#[test]
fn config_override_is_picked_up_from_env() {
    ensure_test_config();
    let (config, metadata) = load_attribution_config_from_env();
    assert!(metadata.path().is_some());
    assert_eq!(config.link_attribution.smoothing_radius, 15.0);
    assert_eq!(config.costs.scale_factor, 10.0);
}

#[test]
fn fixture_field_is_attributed_and_priced() {
    ensure_test_config();
    let (config, _) = load_attribution_config_from_env();
    let inputs = load_inputs(config.time_bin_size, config.time_bin_start);
    let attributor =
        LinkAttributor::build(&inputs.network, *inputs.field.layout(), &config.link_attribution)
            .expect("attributor");
    let factors = CostFactors::from_config(&config.costs).expect("factors");

    let outcome = attribute_and_price(&attributor, &inputs.field, &factors).expect("attribution");

    assert_eq!(outcome.ledger.bins().len(), 2);
    assert!(outcome.schedule.windows(&LinkId::from("bypass")).is_empty());
    for id in ["main_east", "north_lane"] {
        let windows = outcome.schedule.windows(&LinkId::from(id));
        assert_eq!(windows.len(), 2, "{id}");
        assert!(windows.iter().all(|w| w.amount > 0.0));
        assert_eq!(windows[0].end, windows[1].start);
        assert!(windows.windows(2).all(|pair| pair[0].end <= pair[1].start));
    }

    // amount = sum(ledger * cell_size^3 * factor) * scale
    for (link, windows) in outcome.schedule.iter() {
        for window in windows {
            let expected: f64 = config
                .costs
                .factors
                .iter()
                .map(|(species, factor)| {
                    outcome.ledger.value(window.start, link, species) * 1000.0 * factor
                })
                .sum::<f64>()
                * config.costs.scale_factor;
            assert!(
                (window.amount - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "{link} at {}",
                window.start
            );
        }
    }

    // Halved concentrations in the second bucket halve the attributed mass.
    let no2 = Species::from("NO2");
    let main = LinkId::from("main_east");
    let early = outcome.ledger.value(0.0, &main, &no2);
    let late = outcome.ledger.value(3600.0, &main, &no2);
    assert!((early - 2.0 * late).abs() <= 1e-9 * early);

    let species: Vec<String> = outcome.ledger.species().iter().map(|s| s.to_string()).collect();
    let csv = render_link_values_csv(&outcome.ledger.rows(), &species);
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("link_id,time,NO2,PM10"));
    assert_eq!(lines.count(), 4);
}

#[test]
fn activities_produce_person_and_link_exposure() {
    ensure_test_config();
    let (config, _) = load_attribution_config_from_env();
    let inputs = load_inputs(config.time_bin_size, config.time_bin_start);
    let log: ActivityLog = load_fixture("activities.json").expect("activities fixture");
    let locations: LocationSet = load_fixture("locations.json").expect("locations fixture");

    let tiles = ActivityTiles::from_records(
        *inputs.field.layout(),
        &log.activities,
        Some(&locations),
        &config.exposure,
    );
    // With snapping every activity lands on a known location inside the grid.
    assert_eq!(tiles.located(), 4);
    assert_eq!(tiles.skipped(), 0);

    let attributor =
        LinkAttributor::build(&inputs.network, *inputs.field.layout(), &config.link_attribution)
            .expect("attributor");
    let factors = CostFactors::from_config(&config.costs).expect("factors");
    let outcome =
        attribute_exposure(&attributor, &inputs.field, &tiles, &factors).expect("exposure");

    let no2 = Species::from("NO2");
    let alice = PersonId::from("alice");
    // Home cell (40) until 1800, then the office cell (48, halved after 3600).
    assert_eq!(outcome.persons.value(0.0, &alice, &no2), 40.0 * 1800.0 + 48.0 * 1800.0);
    assert_eq!(outcome.persons.value(3600.0, &alice, &no2), 24.0 * 1800.0);

    assert!(outcome.links.schedule.total() > 0.0);
    assert!(outcome
        .links
        .schedule
        .windows(&LinkId::from("bypass"))
        .is_empty());

    let species: Vec<String> = outcome.persons.species().iter().map(|s| s.to_string()).collect();
    let csv = render_person_exposure_csv(&outcome.persons.rows(), &species);
    assert!(csv.starts_with("person_id,time,NO2,PM10\n"));
    assert!(csv.contains("\nalice,0,"));
}

#[test]
fn without_snapping_outlying_activities_are_skipped() {
    ensure_test_config();
    let (config, _) = load_attribution_config_from_env();
    let inputs = load_inputs(config.time_bin_size, config.time_bin_start);
    let log: ActivityLog = load_fixture("activities.json").expect("activities fixture");

    let mut exposure = config.exposure.clone();
    exposure.snap_to_locations = false;
    let tiles = ActivityTiles::from_records(*inputs.field.layout(), &log.activities, None, &exposure);
    assert_eq!(tiles.located(), 3);
    assert_eq!(tiles.skipped(), 1);
}
