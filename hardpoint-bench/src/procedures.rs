//! Test procedures run on the stand
//!
//! Each procedure opens the connections its profile needs, samples, writes
//! the result file and closes every connection, also when sampling fails.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use hardware::{ControllerInterface, InterferometerInterface, PlcType, SymbolValue};
use tracing::{info, warn};

use crate::config::StandConfig;
use crate::fit_plots::{render_fit_report, FitPage, FitPlot, FitReportConfig};
use crate::profile::{ColumnSource, ProfileKind, StandProfile};
use crate::record_writer::{RecordTable, RecordWriter};
use crate::sampler::SensorFusionSampler;
use crate::sampling::{Clock, RecordSink, SampleRecord, SamplingSession, TerminationPolicy};
use crate::stand::{connect_controller, connect_interferometers, DeviceFactory};
use crate::SamplingError;

/// Name of the hardpoint under test.
pub const HPT_NAME_SYMBOL: &str = "MAIN.sSelHPT";
/// Actuator encoder position, the initial repeatability setpoint.
pub const ACTUATOR_COUNT_SYMBOL: &str = "GVL_TS.ActEncCount";
/// Position-loop setpoint, written as a string.
pub const SETPOINT_SYMBOL: &str = "MAIN.sSetpoint";
/// Cleared when the repeatability run completes.
pub const REPEATABILITY_BUTTON_SYMBOL: &str = "MAIN.btnPyPosRep";
pub const KP_SYMBOL: &str = "MAIN.fbPLOOP.stCTRL_PID_PARAMS.fKp";
pub const TN_SYMBOL: &str = "MAIN.fbPLOOP.stCTRL_PID_PARAMS.tTn";

/// How long an interferometer may take to enter measurement mode.
pub const MEASUREMENT_START_TIMEOUT: Duration = Duration::from_secs(30);

type StandSampler<F> = SensorFusionSampler<
    <F as DeviceFactory>::Interferometer,
    <F as DeviceFactory>::Controller,
>;

/// Outcome of one procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub kind: ProfileKind,
    pub records: usize,
    pub csv_path: Option<PathBuf>,
    /// One fit-report page per plotted pair
    pub report_pages: Vec<PathBuf>,
    /// Setpoint held during each phase, in counts
    pub setpoints: Vec<i64>,
}

impl RunSummary {
    fn new(kind: ProfileKind, records: usize) -> Self {
        Self {
            kind,
            records,
            csv_path: None,
            report_pages: Vec::new(),
            setpoints: Vec::new(),
        }
    }
}

/// `<HPT>-<YYYYMMDD>_<HH>h<MM>m.csv`
pub fn results_file_name(hpt: &str, started: &DateTime<Local>) -> String {
    format!("{hpt}-{}.csv", started.format("%Y%m%d_%Hh%Mm"))
}

/// `<HPT>-PosRep-Kp<kp>Ki<ki>_<YYYYMMDD>_<HH>h<MM>m.csv`, gains rounded.
pub fn repeatability_file_name(hpt: &str, kp: f64, ki: f64, started: &DateTime<Local>) -> String {
    format!(
        "{hpt}-PosRep-Kp{}Ki{}_{}.csv",
        kp.round() as i64,
        ki.round() as i64,
        started.format("%Y%m%d_%Hh%Mm")
    )
}

/// Comment lines heading a repeatability file.
pub fn repeatability_preamble(hpt: &str, kp: f64, ki: f64, started: &DateTime<Local>) -> Vec<String> {
    vec![
        hpt.to_string(),
        format!("Date: {}", started.format("%B %d %Y")),
        format!("Start time: {}", started.format("%Hh%Mm%Ss")),
        format!("Kp = {kp}  Ki= {ki}"),
    ]
}

/// Runs procedures against the devices of one stand.
pub struct Bench<'a, F: DeviceFactory, C: Clock + Clone> {
    factory: &'a F,
    config: &'a StandConfig,
    clock: C,
    report: Option<FitReportConfig>,
}

impl<'a, F: DeviceFactory, C: Clock + Clone> Bench<'a, F, C> {
    pub fn new(factory: &'a F, config: &'a StandConfig, clock: C) -> Self {
        Self {
            factory,
            config,
            clock,
            report: Some(FitReportConfig::default()),
        }
    }

    pub fn with_report_config(mut self, report: FitReportConfig) -> Self {
        self.report = Some(report);
        self
    }

    /// Skip the fit report of load tests.
    pub fn without_report(mut self) -> Self {
        self.report = None;
        self
    }

    fn open(&self, profile: StandProfile) -> Result<StandSampler<F>, SamplingError> {
        let interferometers = connect_interferometers(self.factory, self.config)?;
        let controller = if profile.needs_controller() {
            Some(connect_controller(self.factory, self.config)?)
        } else {
            None
        };
        SensorFusionSampler::new(
            interferometers,
            controller,
            profile,
            self.config.pose_transform(),
        )
    }

    fn session(&self) -> SamplingSession<C> {
        SamplingSession::new(self.clock.clone()).with_poll_interval(self.config.poll_interval())
    }

    fn output_path(&self, file_name: &str) -> Result<PathBuf, SamplingError> {
        fs::create_dir_all(&self.config.output_dir)?;
        Ok(self.config.output_dir.join(file_name))
    }

    /// Load-cell or stiffness readout, sampled until the controller clears
    /// its busy flag. Writes the CSV and the fit-report pages beside it.
    pub fn run_load_test(&self, kind: ProfileKind) -> Result<RunSummary, SamplingError> {
        if !matches!(kind, ProfileKind::LoadCell | ProfileKind::Stiffness) {
            return Err(SamplingError::Config(format!("{kind} is not a load test")));
        }
        let profile = StandProfile::for_stand(kind, self.config)?;
        let plots = profile.fit_plots.clone();

        let mut sampler = self.open(profile)?;
        let result = self.sample_until_idle(&mut sampler);
        let (records, csv_path) = finish(sampler, result)?;

        let mut summary = RunSummary::new(kind, records);
        summary.report_pages = self.fit_report(&csv_path, &plots);
        summary.csv_path = Some(csv_path);
        Ok(summary)
    }

    fn sample_until_idle(
        &self,
        sampler: &mut StandSampler<F>,
    ) -> Result<(usize, PathBuf), SamplingError> {
        let flag = sampler
            .profile()
            .flag_symbol
            .clone()
            .ok_or_else(|| SamplingError::Config("load test without a flag symbol".into()))?;
        let started = Local::now();
        let hpt = hpt_name(sampler)?;
        let path = self.output_path(&results_file_name(&hpt, &started))?;

        let writer = RecordWriter::create(&path, sampler.profile().column_names(), &[])?;
        let mut session = self.session().with_sink(Box::new(writer));
        let mut policy =
            TerminationPolicy::external_flag(move |s: &mut StandSampler<F>| s.flag(&flag));

        info!("Recording {} test of {hpt} to {}", sampler.profile().kind, path.display());
        let records = session.run(sampler, &mut policy)?;
        Ok((records, path))
    }

    fn fit_report(&self, csv_path: &Path, plots: &[FitPlot]) -> Vec<PathBuf> {
        let Some(report) = self.report.as_ref() else {
            return Vec::new();
        };
        let report_path = csv_path.with_extension("svg");
        let rendered = RecordTable::read(csv_path)
            .and_then(|table| render_fit_report(&table, plots, &report_path, report));

        match rendered {
            Ok(pages) => pages.into_iter().map(|page| page.path).collect(),
            Err(e) => {
                warn!("Fit report not written: {e}");
                Vec::new()
            }
        }
    }

    /// Five-phase position repeatability: hold the current actuator
    /// position, step up, back, down and back, one phase each.
    pub fn run_position_repeatability(&self) -> Result<RunSummary, SamplingError> {
        let profile = StandProfile::for_stand(ProfileKind::PositionRepeatability, self.config)?;
        let mut sampler = self.open(profile)?;
        let result = self.sample_steps(&mut sampler);
        let (records, csv_path, setpoints) = finish(sampler, result)?;

        let mut summary = RunSummary::new(ProfileKind::PositionRepeatability, records);
        summary.csv_path = Some(csv_path);
        summary.setpoints = setpoints;
        Ok(summary)
    }

    fn sample_steps(
        &self,
        sampler: &mut StandSampler<F>,
    ) -> Result<(usize, PathBuf, Vec<i64>), SamplingError> {
        let repeat = &self.config.position_repeatability;
        let phases = repeat.phases()?;

        let initial = sampler
            .read_symbol(ACTUATOR_COUNT_SYMBOL)?
            .as_i64()
            .ok_or_else(|| SamplingError::missing_field(ACTUATOR_COUNT_SYMBOL, "not an integer count"))?;
        repeat.check_setpoint(initial)?;
        write_setpoint(sampler, initial)?;

        let hpt = hpt_name(sampler)?;
        let kp = read_number(sampler, KP_SYMBOL)?;
        let ki = read_number(sampler, TN_SYMBOL)?;
        let started = Local::now();
        let path = self.output_path(&repeatability_file_name(&hpt, kp, ki, &started))?;
        let preamble = repeatability_preamble(&hpt, kp, ki, &started);
        let writer = RecordWriter::create(&path, sampler.profile().column_names(), &preamble)?;

        sampler.capture_baselines()?;

        let mut setpoint = initial;
        let mut setpoints = Vec::with_capacity(phases.len());
        let mut session = self.session().with_sink(Box::new(writer));

        info!(
            "Position repeatability on {hpt} from {initial} counts, {} phases, recording to {}",
            phases.len(),
            path.display()
        );
        let records = session.run_stepped(sampler, &phases, |s, number, phase| {
            setpoint += phase.setpoint_delta;
            setpoints.push(setpoint);
            info!("Phase {number}: setpoint {setpoint} counts for {:?}", phase.duration);
            write_setpoint(s, setpoint)
        })?;

        sampler.write_symbol(REPEATABILITY_BUTTON_SYMBOL, SymbolValue::Bool(false), PlcType::Bool)?;
        Ok((records, path, setpoints))
    }

    /// Log the pose estimate every tick for `duration`. Nothing is written.
    pub fn run_pose_monitor(&self, duration: Duration) -> Result<RunSummary, SamplingError> {
        let profile = StandProfile::for_stand(ProfileKind::PoseMonitor, self.config)?;
        let pose_columns = profile
            .columns
            .iter()
            .filter(|c| matches!(c.source, ColumnSource::Pose(_)))
            .map(|c| c.name.clone())
            .collect();

        let mut sampler = self.open(profile)?;
        let mut session = self
            .session()
            .with_sink(Box::new(PoseLog { columns: pose_columns }));
        let mut policy = TerminationPolicy::FixedDuration(duration);
        let result = session.run(&mut sampler, &mut policy);
        let records = finish(sampler, result)?;

        Ok(RunSummary::new(ProfileKind::PoseMonitor, records))
    }

    /// Raw displacement of every axis for `duration`, measurement started
    /// before and stopped after.
    pub fn run_raw_displacement(&self, duration: Duration) -> Result<RunSummary, SamplingError> {
        let profile = StandProfile::for_stand(ProfileKind::RawDisplacement, self.config)?;
        let mut sampler = self.open(profile)?;
        let result = self.sample_raw(&mut sampler, duration);
        let (records, csv_path) = finish(sampler, result)?;

        let mut summary = RunSummary::new(ProfileKind::RawDisplacement, records);
        summary.csv_path = Some(csv_path);
        Ok(summary)
    }

    fn sample_raw(
        &self,
        sampler: &mut StandSampler<F>,
        duration: Duration,
    ) -> Result<(usize, PathBuf), SamplingError> {
        sampler.start_measurement(MEASUREMENT_START_TIMEOUT)?;

        let started = Local::now();
        let path = self.output_path(&results_file_name("IDS", &started))?;
        let writer = RecordWriter::create(&path, sampler.profile().column_names(), &[])?;
        let mut session = self.session().with_sink(Box::new(writer));

        info!("Logging displacement for {:?} to {}", duration, path.display());
        let records = session.run(sampler, &mut TerminationPolicy::FixedDuration(duration))?;

        sampler.stop_measurement()?;
        Ok((records, path))
    }
}

/// Rebuild the fit report of a `kind` file recorded on the stand described
/// by `stand`.
///
/// # Errors
/// [`SamplingError::Config`] if `kind` has no fit plots,
/// [`SamplingError::SchemaMismatch`] if the file lacks a column of the
/// profile, plus any read, fit or plot error.
pub fn regenerate_fit_report(
    csv_path: &Path,
    kind: ProfileKind,
    stand: &StandConfig,
    output: &Path,
    report: &FitReportConfig,
) -> Result<Vec<FitPage>, SamplingError> {
    let profile = StandProfile::for_stand(kind, stand)?;
    if profile.fit_plots.is_empty() {
        return Err(SamplingError::Config(format!("{kind} files have no fit plots")));
    }

    let table = RecordTable::read_with_text_columns(csv_path, &profile.text_columns())?;
    table.require_columns(&profile.column_names())?;
    info!("Read {} rows from {}", table.len(), csv_path.display());

    render_fit_report(&table, &profile.fit_plots, output, report)
}

/// Logs selected fields of every record.
struct PoseLog {
    columns: Vec<String>,
}

impl RecordSink for PoseLog {
    fn append(&mut self, record: &SampleRecord) -> Result<(), SamplingError> {
        let fields: Vec<String> = self
            .columns
            .iter()
            .filter_map(|name| record.get(name).map(|value| format!("{name} {value}")))
            .collect();
        info!(
            "#{} {:.3} s: {}",
            record.index(),
            record.elapsed().as_secs_f64(),
            fields.join(", ")
        );
        Ok(())
    }
}

/// Close the sampler, keeping the sampling error if there was one.
fn finish<I, C, T>(
    sampler: SensorFusionSampler<I, C>,
    result: Result<T, SamplingError>,
) -> Result<T, SamplingError>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    match result {
        Ok(value) => {
            sampler.close()?;
            Ok(value)
        }
        Err(e) => {
            warn!("Run aborted: {e}");
            if let Err(close) = sampler.close() {
                warn!("Closing after abort failed: {close}");
            }
            Err(e)
        }
    }
}

fn hpt_name<I, C>(sampler: &mut SensorFusionSampler<I, C>) -> Result<String, SamplingError>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    let name = sampler.read_symbol(HPT_NAME_SYMBOL)?.to_string();
    Ok(name.trim().to_string())
}

fn read_number<I, C>(
    sampler: &mut SensorFusionSampler<I, C>,
    symbol: &str,
) -> Result<f64, SamplingError>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    sampler
        .read_symbol(symbol)?
        .as_f64()
        .ok_or_else(|| SamplingError::missing_field(symbol, "not numeric"))
}

fn write_setpoint<I, C>(
    sampler: &mut SensorFusionSampler<I, C>,
    counts: i64,
) -> Result<(), SamplingError>
where
    I: InterferometerInterface,
    C: ControllerInterface,
{
    sampler.write_symbol(SETPOINT_SYMBOL, SymbolValue::Text(counts.to_string()), PlcType::String)
}
