//! The atmosphere driver: staged initialization, time stepping, teardown.
//!
//! Initialization runs through the stages of [`DriverStage`] in order:
//!
//! 1. [`set_comm`](AtmosphereDriver::set_comm) and
//!    [`set_params`](AtmosphereDriver::set_params), in either order;
//! 2. [`create_atm_processes`](AtmosphereDriver::create_atm_processes) builds
//!    the process tree;
//! 3. [`create_grids`](AtmosphereDriver::create_grids) builds the grids the
//!    processes need and hands them to the tree;
//! 4. [`create_fields`](AtmosphereDriver::create_fields) registers and
//!    allocates every field and binds them to the processes;
//! 5. [`initialize_fields`](AtmosphereDriver::initialize_fields) loads the
//!    initial conditions;
//! 6. [`initialize_output_manager`](AtmosphereDriver::initialize_output_manager)
//!    and [`initialize_atm_procs`](AtmosphereDriver::initialize_atm_procs).
//!
//! Each stage fails with [`AtmError::StatusCheckFailed`] if a prerequisite
//! is missing or if it already ran.

use crate::algs::communicator::Communicator;
use crate::atm_error::AtmError;
use crate::config::AtmParams;
use crate::control::atm_process::{AtmosphereProcess, GroupRequest};
use crate::control::dag::AtmProcDag;
use crate::control::factory::ProcessFactory;
use crate::control::field_guard::FieldMutationGuard;
use crate::control::initial_conditions::{IcLookup, IcSource, JsonIcSource, apply_initial_condition};
use crate::control::io_subsystem::{finalize_io_subsystem, init_io_subsystem};
use crate::control::output::OutputManager;
use crate::control::process_group::AtmosphereProcessGroup;
use crate::control::status::{DriverStage, DriverStatus};
use crate::control::surface_coupling::SurfaceCoupling;
use crate::field::access::FieldAccess;
use crate::field::identifier::FieldIdentifier;
use crate::field::repository::{FieldHandle, FieldRepository};
use crate::grid::GridsManager;
use crate::remap::Remapper;
use crate::time_stamp::TimeStamp;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use DriverStage::*;

static NEXT_DRIVER_ID: AtomicU64 = AtomicU64::new(1);

/// Copies of group members synthesized on a grid other than their own,
/// refreshed from the originals before every step.
struct GroupRemap {
    remapper: Box<dyn Remapper>,
    pairs: Vec<(FieldIdentifier, FieldIdentifier)>,
}

fn not_ready(status: DriverStatus, operation: &'static str, stage: DriverStage) -> AtmError {
    AtmError::StatusCheckFailed {
        operation,
        missing: stage.to_string(),
        forbidden: String::new(),
        status: status.to_string(),
    }
}

pub struct AtmosphereDriver<C: Communicator + Clone> {
    id: u64,
    status: DriverStatus,
    comm: Option<C>,
    params: Option<AtmParams>,
    factory: ProcessFactory,
    procs: Option<AtmosphereProcessGroup>,
    grids: Option<GridsManager<C>>,
    repo: FieldRepository,
    /// Handles the process tree may write.
    writable: BTreeSet<FieldHandle>,
    group_remaps: Vec<GroupRemap>,
    ic_source: Option<Box<dyn IcSource>>,
    coupling: Option<Box<dyn SurfaceCoupling>>,
    output: OutputManager,
    guard: Option<FieldMutationGuard>,
    current_ts: TimeStamp,
    owns_io: bool,
}

impl<C: Communicator + Clone> Default for AtmosphereDriver<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Communicator + Clone> AtmosphereDriver<C> {
    pub fn new() -> Self {
        Self {
            id: NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed),
            status: DriverStatus::new(),
            comm: None,
            params: None,
            factory: ProcessFactory::with_builtins(),
            procs: None,
            grids: None,
            repo: FieldRepository::new(),
            writable: BTreeSet::new(),
            group_remaps: Vec::new(),
            ic_source: None,
            coupling: None,
            output: OutputManager::new(),
            guard: None,
            current_ts: TimeStamp::default(),
            owns_io: false,
        }
    }

    /// Run `work` as stage `stage` of operation `op`. The stage is marked
    /// complete only if `work` succeeds.
    fn stage<R>(
        &mut self,
        op: &'static str,
        required: &[DriverStage],
        stage: DriverStage,
        work: impl FnOnce(&mut Self) -> Result<R, AtmError>,
    ) -> Result<R, AtmError> {
        self.status.check(op, required, &[stage])?;
        let out = work(self)?;
        self.status.transition(op, required, &[stage], stage)?;
        log::info!("[atm driver] {op} done, status {}", self.status);
        Ok(out)
    }

    // ----- configuration -----

    pub fn set_comm(&mut self, comm: C) -> Result<(), AtmError> {
        self.stage("set_comm", &[], CommSet, |d| {
            log::debug!("communicator: rank {} of {}", comm.rank(), comm.size());
            d.comm = Some(comm);
            Ok(())
        })
    }

    pub fn set_params(&mut self, params: AtmParams) -> Result<(), AtmError> {
        self.stage("set_params", &[], ParamsSet, |d| {
            d.params = Some(params);
            Ok(())
        })
    }

    /// Factory used by [`create_atm_processes`](Self::create_atm_processes),
    /// for registering additional process types.
    pub fn process_factory_mut(&mut self) -> Result<&mut ProcessFactory, AtmError> {
        self.status
            .check("process_factory_mut", &[], &[ProcessesCreated])?;
        Ok(&mut self.factory)
    }

    /// Source consulted for inputs not set by configuration constants.
    /// Takes precedence over `initial_conditions.file`.
    pub fn set_ic_source(&mut self, source: Box<dyn IcSource>) -> Result<(), AtmError> {
        self.status
            .check("set_ic_source", &[], &[FieldsInitialized])?;
        self.ic_source = Some(source);
        Ok(())
    }

    pub fn set_surface_coupling(&mut self, coupling: Box<dyn SurfaceCoupling>) -> Result<(), AtmError> {
        self.status
            .check("set_surface_coupling", &[], &[FieldsInitialized])?;
        self.coupling = Some(coupling);
        Ok(())
    }

    // ----- initialization stages -----

    pub fn create_atm_processes(&mut self) -> Result<(), AtmError> {
        self.stage("create_atm_processes", &[CommSet, ParamsSet], ProcessesCreated, |d| {
            let params = d
                .params
                .as_ref()
                .ok_or_else(|| not_ready(d.status, "create_atm_processes", ParamsSet))?;
            let procs = d.factory.create_group(&params.atmosphere_processes)?;
            log::info!("created process tree `{}` with {} top-level processes", procs.name(), procs.len());
            d.procs = Some(procs);
            Ok(())
        })
    }

    pub fn create_grids(&mut self) -> Result<(), AtmError> {
        self.stage("create_grids", &[ProcessesCreated], GridsCreated, |d| {
            let (Some(comm), Some(params), Some(procs)) = (&d.comm, &d.params, &mut d.procs) else {
                return Err(not_ready(d.status, "create_grids", ProcessesCreated));
            };
            let required = procs.required_grids();
            let mut gm = GridsManager::new(comm.clone(), params.grids_manager.clone());
            gm.build_grids(required.iter().map(String::as_str))?;
            procs.set_grids(&gm)?;
            d.grids = Some(gm);
            Ok(())
        })
    }

    pub fn create_fields(&mut self) -> Result<(), AtmError> {
        self.stage("create_fields", &[GridsCreated], FieldsCreated, |d| {
            let (Some(gm), Some(procs)) = (&d.grids, &mut d.procs) else {
                return Err(not_ready(d.status, "create_fields", GridsCreated));
            };
            let repo = &mut d.repo;
            repo.registration_begins()?;
            procs.register_fields(repo)?;

            let requests = procs.required_groups();
            let mut remaps: BTreeMap<(String, String), GroupRemap> = BTreeMap::new();
            for req in &requests {
                synthesize_group(repo, gm, req, &mut remaps)?;
            }
            let bundled: BTreeSet<&str> = requests
                .iter()
                .filter(|r| r.bundled)
                .map(|r| r.name.as_str())
                .collect();
            let bundle_on: BTreeSet<(&str, &str)> = requests
                .iter()
                .filter(|r| bundled.contains(r.name.as_str()))
                .map(|r| (r.name.as_str(), r.grid.as_str()))
                .collect();
            for (group, grid) in bundle_on {
                repo.request_bundle(group, grid)?;
            }
            repo.registration_ends()?;

            for id in procs.required_fields() {
                let h = repo.handle_of(&id)?;
                procs.set_required_field(h, &id)?;
            }
            d.writable.clear();
            for id in procs.computed_fields() {
                let h = repo.handle_of(&id)?;
                procs.set_computed_field(h, &id)?;
                d.writable.insert(h);
            }
            for req in &requests {
                let members = repo.group_fields(&req.name, &req.grid)?;
                procs.set_required_group(req, &members)?;
            }

            for ((src, tgt), mut gr) in remaps {
                for (i, (s, t)) in gr.pairs.iter().enumerate() {
                    gr.remapper.bind_field(i, repo.handle_of(s)?, repo.handle_of(t)?)?;
                }
                gr.remapper.registration_ends()?;
                log::debug!("group remap {src} -> {tgt}: {} fields", gr.pairs.len());
                d.group_remaps.push(gr);
            }
            log::info!("field repository holds {} fields", repo.len());
            Ok(())
        })
    }

    /// Load initial conditions and stamp every field with `t0`.
    ///
    /// Configuration constants apply to every field of that name. Remaining
    /// process inputs come from the initial-condition source; surface
    /// coupling imports are exempt.
    ///
    /// # Errors
    /// `MissingInitialConditions` listing every input left unset, after the
    /// dependency graph has been written (when `debug.dag_verbosity >= 0`).
    pub fn initialize_fields(&mut self, t0: TimeStamp) -> Result<(), AtmError> {
        self.stage("initialize_fields", &[FieldsCreated], FieldsInitialized, |d| {
            let (Some(params), Some(procs)) = (&d.params, &d.procs) else {
                return Err(not_ready(d.status, "initialize_fields", FieldsCreated));
            };
            let repo = &mut d.repo;
            let mut initialized: BTreeSet<FieldHandle> = BTreeSet::new();

            // Group copies on other grids are filled by their remap.
            let remapped: BTreeSet<(&str, &str)> = d
                .group_remaps
                .iter()
                .flat_map(|gr| gr.pairs.iter().map(|(_, t)| (t.name(), t.grid_name())))
                .collect();
            let constants = &params.initial_conditions.constants;
            for name in constants.keys() {
                let handles = repo.aliases(name);
                if handles.is_empty() {
                    log::warn!("initial condition `{name}` matches no registered field");
                }
                let value = constants.lookup(name);
                for h in handles {
                    let id = repo.identifier(h)?;
                    if remapped.contains(&(id.name(), id.grid_name())) {
                        continue;
                    }
                    apply_initial_condition(repo, h, &value)?;
                    initialized.insert(h);
                }
            }

            if d.ic_source.is_none() {
                if let Some(file) = &params.initial_conditions.file {
                    d.ic_source = Some(Box::new(JsonIcSource::from_path(file)?));
                }
            }
            let (imports, exports) = match &d.coupling {
                Some(c) => (c.import_fields(), c.export_fields()),
                None => (Vec::new(), Vec::new()),
            };

            let mut unresolved = false;
            for id in procs.required_fields() {
                let h = repo.handle_of(&id)?;
                let covered = initialized.contains(&h)
                    || repo.ancestors(h).iter().any(|a| initialized.contains(a));
                if covered || imports.iter().any(|n| n == id.name()) {
                    continue;
                }
                let value = d
                    .ic_source
                    .as_ref()
                    .map_or(IcLookup::Missing, |s| s.lookup(id.name()));
                if apply_initial_condition(repo, h, &value)? {
                    initialized.insert(h);
                } else {
                    unresolved = true;
                }
            }

            if unresolved {
                let available: BTreeSet<(String, String)> = repo
                    .fields()
                    .filter(|&(h, _)| {
                        initialized.contains(&h) || repo.ancestors(h).iter().any(|a| initialized.contains(a))
                    })
                    .map(|(_, id)| (id.name().to_string(), id.grid_name().to_string()))
                    .collect();
                let dag = AtmProcDag::build(procs, &available, &imports, &exports);
                let dbg = &params.debug;
                if let Err(e) = dag.write_dot_file(&dbg.dag_file, dbg.dag_verbosity) {
                    log::warn!("could not write dependency graph: {e}");
                }
                if dag.has_unmet_dependencies() {
                    let missing = dag.missing_fields();
                    log::error!("missing initial conditions: {}", missing.join(", "));
                    return Err(AtmError::MissingInitialConditions(missing));
                }
            }

            let handles: Vec<FieldHandle> = repo.fields().map(|(h, _)| h).collect();
            for h in handles {
                repo.update_time_stamp(h, t0)?;
            }
            d.current_ts = t0;
            for gr in &mut d.group_remaps {
                gr.remapper.remap(&mut *repo, true)?;
            }
            Ok(())
        })
    }

    pub fn initialize_output_manager(&mut self) -> Result<(), AtmError> {
        self.stage("initialize_output_manager", &[FieldsInitialized], OutputInitialized, |d| {
            let (Some(comm), Some(params)) = (&d.comm, &d.params) else {
                return Err(not_ready(d.status, "initialize_output_manager", CommSet));
            };
            let Some(om) = &params.output_manager else {
                log::debug!("no output streams configured");
                return Ok(());
            };
            d.owns_io = init_io_subsystem(comm.handle_id(), d.id)?;
            d.output = OutputManager::from_params(om, &d.repo)?;
            d.output.write_initial(&d.repo, d.current_ts)?;
            log::info!("output manager has {} streams", d.output.num_streams());
            Ok(())
        })
    }

    pub fn initialize_atm_procs(&mut self) -> Result<(), AtmError> {
        self.stage("initialize_atm_procs", &[FieldsInitialized], ProcessesInitialized, |d| {
            let (Some(params), Some(procs)) = (&d.params, &mut d.procs) else {
                return Err(not_ready(d.status, "initialize_atm_procs", ProcessesCreated));
            };
            procs.initialize(d.current_ts)?;
            if params.debug.check_field_mutation {
                d.guard = Some(FieldMutationGuard::snapshot(&d.repo));
                log::debug!("field mutation checks enabled");
            }
            Ok(())
        })
    }

    /// Every initialization stage in order.
    pub fn initialize(&mut self, comm: C, params: AtmParams, t0: TimeStamp) -> Result<(), AtmError> {
        self.set_comm(comm)?;
        self.set_params(params)?;
        self.create_atm_processes()?;
        self.create_grids()?;
        self.create_fields()?;
        self.initialize_fields(t0)?;
        self.initialize_output_manager()?;
        self.initialize_atm_procs()
    }

    // ----- time stepping -----

    /// Advance the model by `dt` seconds.
    pub fn run(&mut self, dt: f64) -> Result<(), AtmError> {
        self.status.check("run", &DriverStage::ALL, &[])?;
        if !(dt > 0.0) {
            return Err(AtmError::InvalidTimeStep(dt));
        }
        let procs = self
            .procs
            .as_mut()
            .ok_or_else(|| not_ready(self.status, "run", ProcessesCreated))?;

        if let Some(c) = self.coupling.as_mut() {
            c.do_import(&mut self.repo)?;
        }
        for gr in &mut self.group_remaps {
            gr.remapper.remap(&mut self.repo, true)?;
        }
        if let Some(g) = self.guard.as_mut() {
            g.refresh(&self.repo);
        }

        {
            let mut access = FieldAccess::new(&mut self.repo, &self.writable);
            procs.run_checked(&mut access, dt, self.guard.as_mut())?;
        }

        self.current_ts += dt;
        for &h in &self.writable {
            self.repo.update_time_stamp(h, self.current_ts)?;
        }
        self.output.run(&self.repo, self.current_ts)?;
        if let Some(c) = self.coupling.as_mut() {
            c.do_export(&self.repo)?;
        }
        log::debug!("[atm driver] step done, time {}", self.current_ts);
        Ok(())
    }

    /// Tear everything down. The driver returns to its freshly constructed
    /// state and may be initialized again.
    ///
    /// Every teardown step runs even if an earlier one fails; the first
    /// error is returned.
    pub fn finalize(&mut self) -> Result<(), AtmError> {
        let procs_done = match self.procs.take() {
            Some(mut procs) => procs.finalize(),
            None => Ok(()),
        };
        let output_done = self.output.finalize();
        self.output = OutputManager::new();
        self.repo.clean_up();
        self.writable.clear();
        self.group_remaps.clear();
        self.guard = None;
        self.grids = None;
        if self.owns_io {
            finalize_io_subsystem(self.id);
            self.owns_io = false;
        }
        self.status.reset();
        log::info!("[atm driver] finalized");
        procs_done.and(output_done)
    }

    // ----- accessors -----

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    pub fn current_ts(&self) -> TimeStamp {
        self.current_ts
    }

    pub fn field_repo(&self) -> &FieldRepository {
        &self.repo
    }

    pub fn field_repo_mut(&mut self) -> &mut FieldRepository {
        &mut self.repo
    }

    pub fn grids_manager(&self) -> Option<&GridsManager<C>> {
        self.grids.as_ref()
    }

    pub fn atm_procs(&self) -> Option<&AtmosphereProcessGroup> {
        self.procs.as_ref()
    }

    pub fn owns_io_subsystem(&self) -> bool {
        self.owns_io
    }
}

/// Make every member of `req.name` available on `req.grid`, registering a
/// remapped copy of each member that only exists elsewhere.
fn synthesize_group<C: Communicator + Clone>(
    repo: &mut FieldRepository,
    gm: &GridsManager<C>,
    req: &GroupRequest,
    remaps: &mut BTreeMap<(String, String), GroupRemap>,
) -> Result<(), AtmError> {
    let members = repo.group(&req.name)?.fields_names.clone();
    for name in members {
        if repo.has_field_on(&name, &req.grid) {
            continue;
        }
        let origin = repo
            .aliases(&name)
            .into_iter()
            .min()
            .ok_or_else(|| AtmError::UnknownField {
                name: name.clone(),
                grid: req.grid.clone(),
            })?;
        let src_id = repo.identifier(origin)?.clone();
        let key = (src_id.grid_name().to_string(), req.grid.clone());
        let gr = match remaps.entry(key) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                let mut remapper = gm.create_remapper(src_id.grid_name(), &req.grid)?;
                remapper.registration_begins()?;
                e.insert(GroupRemap {
                    remapper,
                    pairs: Vec::new(),
                })
            }
        };
        let tgt_id = src_id.on_grid(&req.grid, gr.remapper.create_tgt_layout(src_id.layout()));
        repo.register_field(tgt_id.clone(), &[req.name.as_str()])?;
        gr.remapper.register_field(src_id.clone(), tgt_id.clone())?;
        gr.pairs.push((src_id, tgt_id));
        log::debug!("synthesized `{name}` of group `{}` on grid `{}`", req.name, req.grid);
    }
    Ok(())
}
