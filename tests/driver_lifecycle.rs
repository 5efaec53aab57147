mod util;

use approx::assert_relative_eq;
use atmos_driver::algs::communicator::NoComm;
use atmos_driver::atm_error::AtmError;
use atmos_driver::config::AtmParams;
use atmos_driver::control::{AtmosphereDriver, DriverStage, SurfaceCoupling};
use atmos_driver::field::FieldRepository;
use atmos_driver::time_stamp::TimeStamp;
use parking_lot::Mutex;
use serde_json::{Value, json};
use serial_test::serial;
use std::sync::Arc;
use util::Probe;

fn params(v: Value) -> AtmParams {
    serde_json::from_value(v).unwrap()
}

fn physics_grid() -> Value {
    json!({
        "reference_grid": "physics",
        "grids": { "physics": { "num_global_dofs": 4, "num_levels": 2 } }
    })
}

fn probe_driver() -> AtmosphereDriver<NoComm> {
    let mut d = AtmosphereDriver::new();
    d.process_factory_mut().unwrap().register("probe", Probe::create);
    d
}

fn t0() -> TimeStamp {
    TimeStamp::new(2000, 1, 1, 0.0)
}

#[test]
fn stages_are_ordered_and_monotonic() {
    let mut d = probe_driver();
    assert!(matches!(d.run(60.0), Err(AtmError::StatusCheckFailed { .. })));
    assert!(d.create_grids().is_err());
    assert!(d.create_atm_processes().is_err());

    d.set_params(params(json!({
        "atmosphere_processes": {
            "type": "probe", "grid": "physics",
            "requires": [{ "name": "ps", "units": "Pa", "layout": "scalar2d" }],
            "computes": [{ "name": "T_mid", "units": "K" }]
        },
        "grids_manager": physics_grid(),
        "initial_conditions": { "ps": 1.0e5 }
    })))
    .unwrap();
    assert!(d.create_atm_processes().is_err(), "comm is not set yet");
    d.set_comm(NoComm).unwrap();
    assert!(d.set_comm(NoComm).is_err());
    assert!(d.status().is_set(DriverStage::CommSet));

    d.create_atm_processes().unwrap();
    assert!(d.create_fields().is_err(), "grids come first");
    d.create_grids().unwrap();
    d.create_fields().unwrap();
    assert!(d.initialize_atm_procs().is_err(), "fields are not initialized");
    d.initialize_fields(t0()).unwrap();
    d.initialize_output_manager().unwrap();
    assert!(d.run(60.0).is_err(), "processes are not initialized");
    d.initialize_atm_procs().unwrap();

    let before: Vec<DriverStage> = d.status().stages().collect();
    assert!(d.status().is_fully_initialized());
    assert!(matches!(d.run(0.0), Err(AtmError::InvalidTimeStep(_))));
    assert!(d.create_grids().is_err());
    d.run(60.0).unwrap();
    assert_eq!(d.status().stages().collect::<Vec<_>>(), before);
    assert_relative_eq!(d.current_ts().seconds(), 60.0);

    let repo = d.field_repo();
    let t = repo.get_field("T_mid", "physics").unwrap();
    assert_eq!(repo.read(t).unwrap(), vec![1.0; 8]);
    assert_eq!(
        repo.header(t).unwrap().tracking().time_stamp(),
        Some(d.current_ts())
    );

    d.finalize().unwrap();
    assert_eq!(d.status().stages().count(), 0);
    assert!(d.field_repo().is_empty());
}

#[test]
fn vector_and_scalar_initial_conditions() {
    let mut d = probe_driver();
    d.initialize(
        NoComm,
        params(json!({
            "atmosphere_processes": {
                "type": "probe", "grid": "physics",
                "requires": [
                    { "name": "qv", "units": "kg/kg", "layout": { "vector3d_mid": 3 } },
                    { "name": "ps", "units": "Pa", "layout": "scalar2d" }
                ]
            },
            "grids_manager": physics_grid(),
            "initial_conditions": { "qv": [0.1, 0.2, 0.3], "ps": 1.0e5 }
        })),
        t0(),
    )
    .unwrap();

    let repo: &mut FieldRepository = d.field_repo_mut();
    let qv = repo.get_field("qv", "physics").unwrap();
    for (i, expected) in [0.1, 0.2, 0.3].into_iter().enumerate() {
        let c = repo.get_component(qv, i).unwrap();
        assert_eq!(repo.read(c).unwrap(), vec![expected; 8]);
    }
    let ps = repo.get_field("ps", "physics").unwrap();
    assert_eq!(repo.read(ps).unwrap(), vec![1.0e5; 4]);
    d.finalize().unwrap();
}

#[test]
fn wrong_vector_length_is_a_shape_error() {
    let mut d = probe_driver();
    let err = d
        .initialize(
            NoComm,
            params(json!({
                "atmosphere_processes": {
                    "type": "probe", "grid": "physics",
                    "requires": [{ "name": "qv", "units": "kg/kg", "layout": { "vector3d_mid": 3 } }]
                },
                "grids_manager": physics_grid(),
                "initial_conditions": { "qv": [0.1, 0.2] }
            })),
            t0(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        AtmError::InitialConditionShape { expected: 3, got: 2, .. }
    ));
    assert!(!d.status().is_set(DriverStage::FieldsInitialized));
}

#[test]
fn missing_inputs_dump_the_dependency_graph() {
    let dag_file = util::temp_path("missing_ic.dot");
    let _ = std::fs::remove_file(&dag_file);
    let mut d = probe_driver();
    let err = d
        .initialize(
            NoComm,
            params(json!({
                "atmosphere_processes": {
                    "type": "group",
                    "processes": [
                        { "type": "probe", "name": "producer", "grid": "physics",
                          "requires": [{ "name": "ps", "units": "Pa", "layout": "scalar2d" }],
                          "computes": [{ "name": "qc", "units": "kg/kg" }] },
                        { "type": "probe", "name": "consumer", "grid": "physics",
                          "requires": [
                              { "name": "qc", "units": "kg/kg" },
                              { "name": "T_mid", "units": "K" }
                          ] }
                    ]
                },
                "grids_manager": physics_grid(),
                "initial_conditions": { "ps": 1.0e5 },
                "debug": { "dag_verbosity": 1, "dag_file": dag_file }
            })),
            t0(),
        )
        .unwrap_err();
    match err {
        AtmError::MissingInitialConditions(missing) => assert_eq!(missing, vec!["T_mid[physics]"]),
        other => panic!("unexpected error {other}"),
    }
    let dot = std::fs::read_to_string(&dag_file).unwrap();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("consumer"));
    assert!(dot.contains("MISSING: T_mid[physics]"));
    assert!(dot.contains("label=\"qc\""));
    assert!(d.status().is_set(DriverStage::FieldsCreated));
    assert!(!d.status().is_set(DriverStage::FieldsInitialized));
    let _ = std::fs::remove_file(&dag_file);
}

#[test]
fn processes_cannot_write_their_inputs() {
    let mut d = probe_driver();
    d.initialize(
        NoComm,
        params(json!({
            "atmosphere_processes": {
                "type": "probe", "grid": "physics",
                "requires": [{ "name": "ps", "units": "Pa", "layout": "scalar2d" }],
                "write_to": "ps"
            },
            "grids_manager": physics_grid(),
            "initial_conditions": { "ps": 1.0e5 },
            "debug": { "check_field_mutation": true }
        })),
        t0(),
    )
    .unwrap();
    match d.run(60.0) {
        Err(AtmError::ReadOnlyField { field }) => assert_eq!(field, "ps"),
        other => panic!("expected a read-only violation, got {other:?}"),
    }
    let repo = d.field_repo();
    let ps = repo.get_field("ps", "physics").unwrap();
    assert_eq!(repo.read(ps).unwrap(), vec![1.0e5; 4]);
}

#[test]
fn later_processes_read_what_earlier_ones_compute() {
    let mut d = probe_driver();
    d.initialize(
        NoComm,
        params(json!({
            "atmosphere_processes": {
                "type": "group",
                "processes": [
                    { "type": "probe", "name": "a", "grid": "physics",
                      "computes": [{ "name": "qc", "units": "kg/kg" }] },
                    { "type": "probe", "name": "b", "grid": "physics",
                      "requires": [{ "name": "qc", "units": "kg/kg" }],
                      "computes": [{ "name": "qr", "units": "kg/kg" }] }
                ]
            },
            "grids_manager": physics_grid(),
            "debug": { "check_field_mutation": true }
        })),
        t0(),
    )
    .unwrap();
    d.run(60.0).unwrap();
    d.run(60.0).unwrap();
    let repo = d.field_repo();
    let qc = repo.get_field("qc", "physics").unwrap();
    assert_eq!(repo.read(qc).unwrap(), vec![2.0; 8]);
    d.finalize().unwrap();
}

#[derive(Clone, Default)]
struct RecordingCoupler {
    exported: Arc<Mutex<Vec<Vec<f64>>>>,
    imports: Arc<Mutex<usize>>,
}

impl SurfaceCoupling for RecordingCoupler {
    fn import_fields(&self) -> Vec<String> {
        vec!["surf_flux".into()]
    }

    fn export_fields(&self) -> Vec<String> {
        vec!["T_mid".into()]
    }

    fn do_import(&mut self, repo: &mut FieldRepository) -> Result<(), AtmError> {
        let h = repo.get_field("surf_flux", "physics")?;
        let mut n = self.imports.lock();
        *n += 1;
        repo.set_value(h, *n as f64)
    }

    fn do_export(&mut self, repo: &FieldRepository) -> Result<(), AtmError> {
        let h = repo.get_field("T_mid", "physics")?;
        self.exported.lock().push(repo.read(h)?);
        Ok(())
    }
}

#[test]
fn surface_coupling_wraps_each_step() {
    let coupler = RecordingCoupler::default();
    let mut d = probe_driver();
    d.set_surface_coupling(Box::new(coupler.clone())).unwrap();
    d.initialize(
        NoComm,
        params(json!({
            "atmosphere_processes": {
                "type": "probe", "grid": "physics",
                "requires": [{ "name": "surf_flux", "units": "W/m2", "layout": "scalar2d" }],
                "computes": [{ "name": "T_mid", "units": "K" }]
            },
            "grids_manager": physics_grid()
        })),
        t0(),
    )
    .unwrap();
    for _ in 0..3 {
        d.run(300.0).unwrap();
    }
    assert_eq!(*coupler.imports.lock(), 3);
    let exported = coupler.exported.lock();
    assert_eq!(exported.len(), 3);
    assert_eq!(exported[2], vec![3.0; 8]);
}

#[test]
#[serial]
fn built_in_processes_step_and_coarsen() {
    let map = util::write_temp("builtin.map", util::FOUR_TO_TWO_TEXT);
    let out = util::temp_path("builtin_h0.jsonl");
    let mut d = AtmosphereDriver::<NoComm>::new();
    d.initialize(
        NoComm,
        params(json!({
            "atmosphere_processes": {
                "type": "group",
                "name": "physics",
                "processes": [
                    { "type": "column_diagnostics", "grid": "fine", "z_surf": 0.0 },
                    { "type": "iop_nudging", "grid": "fine",
                      "tscale": 3600.0, "p_low": 50000.0, "p_high": 90000.0,
                      "t_obs": [290.0, 290.0], "q_obs": [0.01, 0.01] },
                    { "type": "coarsen", "grid": "fine", "tgt_grid": "coarse",
                      "fields": [
                          { "name": "T_mid", "units": "K" },
                          { "name": "theta", "units": "K" }
                      ] }
                ]
            },
            "grids_manager": {
                "reference_grid": "fine",
                "grids": {
                    "fine": { "num_global_dofs": 4, "num_levels": 2 },
                    "coarse": { "num_global_dofs": 2, "num_levels": 2 }
                },
                "remaps": [{ "src": "fine", "tgt": "coarse", "map_file": map }]
            },
            "initial_conditions": {
                "p_mid": 80000.0, "T_mid": 300.0, "qv": 0.01, "pseudo_density": 1000.0
            },
            "output_manager": {
                "streams": [{ "name": "h0", "grid": "coarse", "fields": ["T_mid"], "path": out }]
            },
            "debug": { "check_field_mutation": true }
        })),
        t0(),
    )
    .unwrap();
    assert!(d.owns_io_subsystem());
    d.run(600.0).unwrap();

    let repo = d.field_repo();
    let read = |name: &str, grid: &str| repo.read(repo.get_field(name, grid).unwrap()).unwrap();
    let expected_t = 300.0 - 10.0 * 600.0 / 3600.0;
    for v in read("T_mid", "coarse") {
        assert_relative_eq!(v, expected_t, max_relative = 1e-12);
    }
    let theta = 300.0 / atmos_driver::physics::exner_function(80000.0);
    for v in read("theta", "coarse") {
        assert_relative_eq!(v, theta, max_relative = 1e-12);
    }
    let z_int = read("z_int", "fine");
    assert_eq!(z_int.len(), 12);
    assert_relative_eq!(z_int[2], 0.0);
    assert!(z_int[0] > z_int[1] && z_int[1] > 0.0);

    d.finalize().unwrap();
    assert!(!atmos_driver::control::io_subsystem::is_io_subsystem_initialized());
    let lines: Vec<Value> = std::fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["fields"]["T_mid"], json!(vec![300.0; 4]));
    let _ = std::fs::remove_file(&map);
    let _ = std::fs::remove_file(&out);
}

#[test]
fn groups_are_synthesized_and_bundled_on_other_grids() {
    let map = util::write_temp("groups.map", util::FOUR_TO_TWO_TEXT);
    let mut d = probe_driver();
    d.initialize(
        NoComm,
        params(json!({
            "atmosphere_processes": {
                "type": "group",
                "processes": [
                    { "type": "probe", "name": "tracer_source", "grid": "fine",
                      "requires": [
                          { "name": "qv", "units": "kg/kg", "group": "tracers" },
                          { "name": "qc", "units": "kg/kg", "group": "tracers" }
                      ] },
                    { "type": "probe", "name": "coarse_user", "grid": "coarse",
                      "groups": [["tracers", "coarse", true]] }
                ]
            },
            "grids_manager": {
                "reference_grid": "fine",
                "grids": {
                    "fine": { "num_global_dofs": 4, "num_levels": 2 },
                    "coarse": { "num_global_dofs": 2, "num_levels": 2 }
                },
                "remaps": [{ "src": "fine", "tgt": "coarse", "map_file": map }]
            },
            "initial_conditions": { "qv": 0.4, "qc": 2.0 }
        })),
        t0(),
    )
    .unwrap();

    let repo = d.field_repo();
    assert!(repo.has_field_on("qv", "coarse"));
    assert!(repo.bundle_of("tracers", "coarse").is_some());
    assert!(repo.bundle_of("tracers", "fine").is_none());
    let qv = repo.get_field("qv", "coarse").unwrap();
    assert_eq!(repo.ancestors(qv), vec![repo.bundle_of("tracers", "coarse").unwrap()]);
    for v in repo.read(qv).unwrap() {
        assert_relative_eq!(v, 0.4, max_relative = 1e-12);
    }
    let qc = repo.get_field("qc", "coarse").unwrap();
    assert_eq!(repo.read(qc).unwrap(), vec![2.0; 4]);

    // Copies are refreshed from the fine grid at the start of each step.
    let repo = d.field_repo_mut();
    let fine_qv = repo.get_field("qv", "fine").unwrap();
    repo.write(fine_qv, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]).unwrap();
    d.run(60.0).unwrap();
    let repo = d.field_repo();
    let got = repo.read(repo.get_field("qv", "coarse").unwrap()).unwrap();
    for (g, e) in got.iter().zip([0.2, 0.3, 0.6, 0.7]) {
        assert_relative_eq!(*g, e, max_relative = 1e-12);
    }
    d.finalize().unwrap();
    let _ = std::fs::remove_file(&map);
}
