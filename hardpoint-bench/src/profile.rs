//! Stand profiles: which channels and symbols a session reads and how each
//! output column is derived from them.
//!
//! Column lists are versioned output schemas. Their order and names match the
//! files the stand has always produced, so downstream spreadsheets keep
//! working.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use hardware::{IdsAxis, SymbolBatch, SymbolValue};
use meter_math::{PoseComponent, PoseEstimate};
use serde::{Deserialize, Serialize};

use crate::config::StandConfig;
use crate::fit_plots::FitPlot;
use crate::sampling::{FieldValue, SampleRecord};
use crate::SamplingError;

/// Controller flag that stays true while a PLC-driven load test runs.
pub const LOAD_BUSY_FLAG: &str = "MAIN.PyLoadBusy";

/// Setpoint symbol used as the position-repeatability baseline.
pub const SETPOINT_VALUE_SYMBOL: &str = "MAIN.fbPLOOP.fSetpointValue";

/// Controller time of day, the only text symbol in the stand batch.
pub const PLC_TIME_SYMBOL: &str = "MAIN.sTime";

/// Load cell column every load plot is drawn against.
pub const LOAD_CELL_COLUMN: &str = "loadCell [N]";

const STAND_SYMBOLS: [&str; 21] = [
    "GVL_TS.ActEncCount",
    "MAIN.engActEnc",
    "GVL_TS.MirEncCount",
    "MAIN.engMirEnc",
    "GVL_TS.LC_InR",
    "GVL_TS.mtr_pos",
    "MAIN.mtrRPM",
    "MAIN.mtrCurrent",
    "MAIN.EncTemp",
    "MAIN.MtrTemp",
    "MAIN.BWYPressPSI",
    "MAIN.FlowRate",
    SETPOINT_VALUE_SYMBOL,
    "MAIN.COARSE_VAL",
    PLC_TIME_SYMBOL,
    LOAD_BUSY_FLAG,
    "MAIN.tglSine",
    "MAIN.tglROM",
    "MAIN.tglStiffness",
    "MAIN.tglBWY",
    "MAIN.tglPLoop",
];

/// Columns copied straight from the symbol batch, in file order.
const STAND_COLUMNS: [(&str, &str); 14] = [
    ("ActCount [cts]", "GVL_TS.ActEncCount"),
    ("engAct [mm]", "MAIN.engActEnc"),
    ("MirCount [cts]", "GVL_TS.MirEncCount"),
    ("engMir [mm]", "MAIN.engMirEnc"),
    (LOAD_CELL_COLUMN, "GVL_TS.LC_InR"),
    ("mtrPos [cts]", "GVL_TS.mtr_pos"),
    ("mtrRPM", "MAIN.mtrRPM"),
    ("mtrCurnt [A]", "MAIN.mtrCurrent"),
    ("encTemp [C]", "MAIN.EncTemp"),
    ("mtrTemp [C]", "MAIN.MtrTemp"),
    ("bwyPSI", "MAIN.BWYPressPSI"),
    ("flowRate [slpm]", "MAIN.FlowRate"),
    ("Setpoint [cts]", SETPOINT_VALUE_SYMBOL),
    ("Interfer [mm]", "MAIN.COARSE_VAL"),
];

const POSE_COLUMNS: [(&str, PoseComponent); 6] = [
    ("AttoX [uM]", PoseComponent::X),
    ("AttoY [uM]", PoseComponent::Y),
    ("AttoZ [uM]", PoseComponent::Z),
    ("AttoRotX [uRad]", PoseComponent::RotX),
    ("AttoRotY [uRad]", PoseComponent::RotY),
    ("AttoRotZ [uRad]", PoseComponent::RotZ),
];

/// Test variants the stand runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ProfileKind {
    /// Load-cell readout, four channels, ends when the PLC clears its busy flag
    LoadCell,
    /// Stiffness readout, six channels plus pose, ends on the busy flag
    Stiffness,
    /// Five-phase position repeatability, four channels
    PositionRepeatability,
    /// Raw interferometer displacement only
    RawDisplacement,
    /// Six channels plus pose, no controller
    PoseMonitor,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfileKind::LoadCell => "load cell",
            ProfileKind::Stiffness => "stiffness",
            ProfileKind::PositionRepeatability => "position repeatability",
            ProfileKind::RawDisplacement => "raw displacement",
            ProfileKind::PoseMonitor => "pose monitor",
        };
        f.write_str(name)
    }
}

/// One interferometer axis, by device position in the stand configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRef {
    pub device: usize,
    pub axis: IdsAxis,
}

impl ChannelRef {
    pub fn new(device: usize, axis: IdsAxis) -> Self {
        Self { device, axis }
    }
}

/// Where a column value comes from.
///
/// Channel positions index the profile's channel list, not device axes.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// 1-based record index
    Index,
    /// Elapsed session seconds at tick start
    Seconds,
    /// Controller symbol from the tick's batch read
    Symbol(String),
    /// Raw channel reading
    Channel(usize),
    /// Mean of the listed channels divided by the raw-unit divisor
    ChannelMean(Vec<usize>),
    /// `minuend - subtrahend` of two batch symbols
    SymbolDifference { minuend: String, subtrahend: String },
    /// Pose component, already in reported units
    Pose(PoseComponent),
    /// [`ColumnSource::ChannelMean`] minus its pre-session baseline
    ChannelMeanOffset(Vec<usize>),
    /// `(symbol - baseline) * scale`
    SymbolOffsetScaled { symbol: String, scale: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub source: ColumnSource,
}

impl Column {
    pub fn new(name: impl Into<String>, source: ColumnSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Values gathered during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReadings {
    pub symbols: SymbolBatch,
    pub channels: Vec<i64>,
    pub pose: Option<PoseEstimate>,
}

/// Reference values captured once before sampling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baselines {
    /// Baseline channel mean in reported units
    pub channel_mean: Option<f64>,
    pub symbols: HashMap<String, f64>,
}

/// Complete description of one test variant.
#[derive(Debug, Clone)]
pub struct StandProfile {
    pub kind: ProfileKind,
    pub channels: Vec<ChannelRef>,
    pub columns: Vec<Column>,
    /// Symbols read in one batch each tick
    pub symbols: Vec<String>,
    /// Symbols receiving raw channel `i` after every tick, by position
    pub echo_symbols: Vec<String>,
    /// Symbol ending the session when it reads false
    pub flag_symbol: Option<String>,
    /// Symbols whose pre-session value feeds offset columns
    pub baseline_symbols: Vec<String>,
    pub fit_plots: Vec<FitPlot>,
}

impl StandProfile {
    /// Profile for `kind` on a stand whose interferometers are named
    /// `device_names`, with the default setpoint scale of 5e-3 µm/count.
    ///
    /// # Errors
    /// Every variant except the raw readout needs exactly two devices.
    pub fn new(kind: ProfileKind, device_names: &[String]) -> Result<Self, SamplingError> {
        Self::build(kind, device_names, 5e-3, LOAD_BUSY_FLAG)
    }

    /// Profile for `kind` using names, scale and flag from `config`.
    pub fn for_stand(kind: ProfileKind, config: &StandConfig) -> Result<Self, SamplingError> {
        let names: Vec<String> = config.interferometers.iter().map(|d| d.name.clone()).collect();
        Self::build(
            kind,
            &names,
            config.position_repeatability.setpoint_scale_um_per_count,
            &config.flag_symbol,
        )
    }

    fn build(
        kind: ProfileKind,
        device_names: &[String],
        setpoint_scale: f64,
        flag_symbol: &str,
    ) -> Result<Self, SamplingError> {
        let pair = match (kind, device_names) {
            (ProfileKind::RawDisplacement | ProfileKind::PoseMonitor, _) => None,
            (_, [a, b]) => Some((a.as_str(), b.as_str())),
            (_, names) => {
                return Err(SamplingError::Config(format!(
                    "{kind} profile needs two interferometers, {} configured",
                    names.len()
                )))
            }
        };

        let profile = match (kind, pair) {
            (ProfileKind::LoadCell, Some((a, b))) => Self::load_cell(a, b, flag_symbol),
            (ProfileKind::Stiffness, Some((a, b))) => Self::stiffness(a, b, flag_symbol),
            (ProfileKind::PositionRepeatability, Some((a, b))) => {
                Self::position_repeatability(a, b, setpoint_scale)
            }
            (ProfileKind::PoseMonitor, _) => Self::raw(kind, device_names, true)?,
            _ => Self::raw(kind, device_names, false)?,
        };
        Ok(profile)
    }

    fn load_cell(a: &str, b: &str, flag_symbol: &str) -> Self {
        let channels = axes_of_both(&IdsAxis::ALL);
        let used = [0, 1, 3, 4];

        let mut columns = leading_columns();
        columns.extend(channel_columns(&[(a, 0, 0), (a, 1, 1), (b, 0, 3), (b, 1, 4)]));
        columns.push(Column::new("Atto Avg. [uM]", ColumnSource::ChannelMean(used.to_vec())));
        columns.extend(stand_columns());
        columns.push(Column::new("SA LC [N]", ColumnSource::Symbol("MAIN.rb_x".into())));

        let mut symbols = stand_symbols();
        symbols.push("MAIN.rb_x".to_string());

        Self {
            kind: ProfileKind::LoadCell,
            echo_symbols: echo_symbols(channels.len()),
            channels,
            columns,
            symbols,
            flag_symbol: Some(flag_symbol.to_string()),
            baseline_symbols: Vec::new(),
            fit_plots: load_plots(1, 1, 0.1),
        }
    }

    fn stiffness(a: &str, b: &str, flag_symbol: &str) -> Self {
        let channels = axes_of_both(&IdsAxis::ALL);

        let mut columns = leading_columns();
        columns.extend(channel_columns(&[
            (a, 0, 0),
            (a, 1, 1),
            (a, 2, 2),
            (b, 0, 3),
            (b, 1, 4),
            (b, 2, 5),
        ]));
        columns.push(Column::new("Atto Avg. [uM]", ColumnSource::ChannelMean((0..6).collect())));
        columns.extend(stand_columns());
        columns.extend(pose_columns());
        columns.push(Column::new("SA LC [N]", ColumnSource::Symbol("MAIN.rb_x".into())));
        columns.push(Column::new("Setpoint [N]", ColumnSource::Symbol("MAIN.sp_x".into())));

        let mut symbols = stand_symbols();
        symbols.push("MAIN.rb_x".to_string());
        symbols.push("MAIN.sp_x".to_string());

        let mut fit_plots = load_plots(1, 4, 0.3);
        for (column, component) in POSE_COLUMNS {
            let unit = if component.is_rotation() { "Rotation [uRad]" } else { "Displacement [uM]" };
            let axis = component.to_string().trim_start_matches("Rot").to_string();
            fit_plots.push(
                FitPlot::new(column, LOAD_CELL_COLUMN)
                    .labels(format!("Atto {axis} {unit}"), "Loadcell [N]")
                    .series(format!("Atto {component}"))
                    .precision(4),
            );
        }
        fit_plots.push(
            FitPlot::new("Setpoint [N]", "SA LC [N]")
                .labels("SA Setpoint [N]", "SA LC [N]")
                .series("SA LC")
                .precision(4),
        );

        Self {
            kind: ProfileKind::Stiffness,
            echo_symbols: echo_symbols(channels.len()),
            channels,
            columns,
            symbols,
            flag_symbol: Some(flag_symbol.to_string()),
            baseline_symbols: Vec::new(),
            fit_plots,
        }
    }

    fn position_repeatability(a: &str, b: &str, setpoint_scale: f64) -> Self {
        let channels = axes_of_both(&[IdsAxis::Axis0, IdsAxis::Axis1]);
        let used: Vec<usize> = (0..channels.len()).collect();

        let mut columns = leading_columns();
        columns.extend(channel_columns(&[(a, 0, 0), (a, 1, 1), (b, 0, 2), (b, 1, 3)]));
        columns.push(Column::new("Atto Avg. [uM]", ColumnSource::ChannelMean(used.clone())));
        columns.extend(stand_columns());
        columns.push(Column::new("AttoAdj [um]", ColumnSource::ChannelMeanOffset(used)));
        columns.push(Column::new(
            "SetpointAdj [um]",
            ColumnSource::SymbolOffsetScaled {
                symbol: SETPOINT_VALUE_SYMBOL.to_string(),
                scale: setpoint_scale,
            },
        ));

        Self {
            kind: ProfileKind::PositionRepeatability,
            channels,
            columns,
            symbols: stand_symbols(),
            echo_symbols: Vec::new(),
            flag_symbol: None,
            baseline_symbols: vec![SETPOINT_VALUE_SYMBOL.to_string()],
            fit_plots: Vec::new(),
        }
    }

    fn raw(kind: ProfileKind, device_names: &[String], with_pose: bool) -> Result<Self, SamplingError> {
        if device_names.is_empty() {
            return Err(SamplingError::Config("no interferometers configured".into()));
        }

        let mut channels = Vec::new();
        let mut columns = vec![
            Column::new("Index", ColumnSource::Index),
            Column::new("Seconds", ColumnSource::Seconds),
        ];
        for (device, name) in device_names.iter().enumerate() {
            for axis in IdsAxis::ALL {
                columns.push(Column::new(
                    channel_label(name, axis),
                    ColumnSource::Channel(channels.len()),
                ));
                channels.push(ChannelRef::new(device, axis));
            }
        }
        if with_pose {
            columns.extend(pose_columns());
        }

        Ok(Self {
            kind,
            channels,
            columns,
            symbols: Vec::new(),
            echo_symbols: Vec::new(),
            flag_symbol: None,
            baseline_symbols: Vec::new(),
            fit_plots: Vec::new(),
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns holding text, to be read back verbatim.
    pub fn text_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| matches!(&c.source, ColumnSource::Symbol(s) if s == PLC_TIME_SYMBOL))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn needs_pose(&self) -> bool {
        self.columns
            .iter()
            .any(|c| matches!(c.source, ColumnSource::Pose(_)))
    }

    pub fn needs_controller(&self) -> bool {
        !self.symbols.is_empty()
            || !self.echo_symbols.is_empty()
            || !self.baseline_symbols.is_empty()
            || self.flag_symbol.is_some()
    }

    /// Channels averaged by the first offset column, if any.
    pub fn baseline_channels(&self) -> Option<&[usize]> {
        self.columns.iter().find_map(|c| match &c.source {
            ColumnSource::ChannelMeanOffset(channels) => Some(channels.as_slice()),
            _ => None,
        })
    }

    /// Baselines from one channel read and the baseline symbol values.
    pub fn baselines(
        &self,
        channels: &[i64],
        symbols: HashMap<String, f64>,
        divisor: f64,
    ) -> Baselines {
        let channel_mean = self
            .baseline_channels()
            .and_then(|used| channel_mean(channels, used, divisor));
        Baselines {
            channel_mean,
            symbols,
        }
    }

    /// Build the record for one tick.
    ///
    /// Columns whose inputs are missing are left out of the record, so the
    /// writer reports them instead of writing blanks.
    pub fn build_record(
        &self,
        index: u64,
        elapsed: Duration,
        readings: &TickReadings,
        baselines: &Baselines,
        divisor: f64,
    ) -> SampleRecord {
        let mut record = SampleRecord::new(index, elapsed);
        for column in &self.columns {
            if let Some(value) = column_value(&column.source, index, elapsed, readings, baselines, divisor) {
                record.set(column.name.clone(), value);
            }
        }
        record
    }
}

fn column_value(
    source: &ColumnSource,
    index: u64,
    elapsed: Duration,
    readings: &TickReadings,
    baselines: &Baselines,
    divisor: f64,
) -> Option<FieldValue> {
    let symbol = |name: &str| lookup(readings, name);

    let value = match source {
        ColumnSource::Index => FieldValue::Int(index as i64),
        ColumnSource::Seconds => FieldValue::Real(elapsed.as_secs_f64()),
        ColumnSource::Symbol(name) => FieldValue::from(symbol(name)?),
        ColumnSource::Channel(i) => FieldValue::Int(*readings.channels.get(*i)?),
        ColumnSource::ChannelMean(used) => {
            FieldValue::Real(channel_mean(&readings.channels, used, divisor)?)
        }
        ColumnSource::SymbolDifference {
            minuend,
            subtrahend,
        } => FieldValue::Real(symbol(minuend)?.as_f64()? - symbol(subtrahend)?.as_f64()?),
        ColumnSource::Pose(component) => FieldValue::Real(readings.pose.as_ref()?[*component]),
        ColumnSource::ChannelMeanOffset(used) => FieldValue::Real(
            channel_mean(&readings.channels, used, divisor)? - baselines.channel_mean?,
        ),
        ColumnSource::SymbolOffsetScaled { symbol: name, scale } => {
            let baseline = baselines.symbols.get(name)?;
            FieldValue::Real((symbol(name)?.as_f64()? - baseline) * scale)
        }
    };
    Some(value)
}

fn lookup<'a>(readings: &'a TickReadings, name: &str) -> Option<&'a SymbolValue> {
    readings.symbols.get(name)
}

fn channel_mean(channels: &[i64], used: &[usize], divisor: f64) -> Option<f64> {
    if used.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    for &i in used {
        sum += *channels.get(i)? as f64;
    }
    Some(sum / used.len() as f64 / divisor)
}

fn channel_label(device: &str, axis: IdsAxis) -> String {
    format!("{device}Ch{} [pM]", axis.index() + 1)
}

fn axes_of_both(axes: &[IdsAxis]) -> Vec<ChannelRef> {
    (0..2)
        .flat_map(|device| axes.iter().map(move |&axis| ChannelRef::new(device, axis)))
        .collect()
}

fn leading_columns() -> Vec<Column> {
    vec![
        Column::new("Index", ColumnSource::Index),
        Column::new("Seconds", ColumnSource::Seconds),
        Column::new("PLC Time", ColumnSource::Symbol(PLC_TIME_SYMBOL.into())),
    ]
}

/// `(device name, axis, channel position)` triples.
fn channel_columns(layout: &[(&str, u8, usize)]) -> Vec<Column> {
    layout
        .iter()
        .map(|&(device, axis, position)| {
            Column::new(
                format!("{device}Ch{} [pM]", axis + 1),
                ColumnSource::Channel(position),
            )
        })
        .collect()
}

fn stand_columns() -> Vec<Column> {
    let mut columns: Vec<Column> = STAND_COLUMNS
        .iter()
        .map(|&(name, symbol)| Column::new(name, ColumnSource::Symbol(symbol.to_string())))
        .collect();
    columns.push(Column::new(
        "BWY [mm]",
        ColumnSource::SymbolDifference {
            minuend: "MAIN.engMirEnc".into(),
            subtrahend: "MAIN.engActEnc".into(),
        },
    ));
    columns
}

fn pose_columns() -> Vec<Column> {
    POSE_COLUMNS
        .iter()
        .map(|&(name, component)| Column::new(name, ColumnSource::Pose(component)))
        .collect()
}

fn stand_symbols() -> Vec<String> {
    STAND_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

fn echo_symbols(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("MAIN.atto{i}")).collect()
}

/// Load cell against the averaged channels, encoders and BWY.
fn load_plots(avg_precision: usize, precision: usize, avg_margin: f64) -> Vec<FitPlot> {
    vec![
        FitPlot::new("Atto Avg. [uM]", LOAD_CELL_COLUMN)
            .labels("Attocube Avg. [um]", "Loadcell [N]")
            .series("Attocube Results")
            .precision(avg_precision)
            .y_margin(avg_margin),
        FitPlot::new("engAct [mm]", LOAD_CELL_COLUMN)
            .labels("Actuator [mm]", "Loadcell [N]")
            .series("Actuator Results")
            .precision(precision),
        FitPlot::new("engMir [mm]", LOAD_CELL_COLUMN)
            .labels("Mirror [mm]", "Loadcell [N]")
            .series("Mirror Results")
            .precision(precision),
        FitPlot::new("BWY [mm]", LOAD_CELL_COLUMN)
            .labels("BWY [mm]", "Loadcell [N]")
            .series("BWY Results")
            .precision(precision),
    ]
}
