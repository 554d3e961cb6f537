//! Linear-fit plot report
//!
//! Draws one page per (x column, y column) pair of a persisted table: the
//! data as a scatter, its least-squares line and a `y = mx +b` legend.
//! Page `n` of a report at `run.svg` is written to `run-<n>.svg`; a `.png`
//! report path gives PNG pages.

use std::ops::Range;
use std::path::{Path, PathBuf};

use meter_math::{linear_fit, LinearFit};
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use crate::record_writer::RecordTable;
use crate::SamplingError;

/// One requested panel.
#[derive(Debug, Clone, PartialEq)]
pub struct FitPlot {
    pub x_column: String,
    pub y_column: String,
    pub x_label: String,
    pub y_label: String,
    /// Legend entry for the data series
    pub series_label: String,
    /// Decimal places in the fit legend
    pub precision: usize,
    /// Fraction of the extreme y values added beyond the data range
    pub y_margin: f64,
}

impl FitPlot {
    pub fn new(x_column: impl Into<String>, y_column: impl Into<String>) -> Self {
        let x_column = x_column.into();
        let y_column = y_column.into();
        Self {
            x_label: x_column.clone(),
            y_label: y_column.clone(),
            series_label: y_column.clone(),
            x_column,
            y_column,
            precision: 4,
            y_margin: 0.1,
        }
    }

    pub fn labels(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = x_label.into();
        self.y_label = y_label.into();
        self
    }

    pub fn series(mut self, label: impl Into<String>) -> Self {
        self.series_label = label.into();
        self
    }

    pub fn precision(mut self, digits: usize) -> Self {
        self.precision = digits;
        self
    }

    pub fn y_margin(mut self, margin: f64) -> Self {
        self.y_margin = margin;
        self
    }
}

/// Output size of each report page.
#[derive(Debug, Clone, Copy)]
pub struct FitReportConfig {
    pub width: u32,
    pub panel_height: u32,
}

impl Default for FitReportConfig {
    fn default() -> Self {
        Self {
            width: 1400,
            panel_height: 700,
        }
    }
}

/// Data and fit behind one panel.
#[derive(Debug, Clone)]
pub struct FitPanel {
    pub plot: FitPlot,
    pub points: Vec<(f64, f64)>,
    pub fit: LinearFit,
    pub x_range: Range<f64>,
    pub y_range: Range<f64>,
}

/// A panel written to its own page.
#[derive(Debug, Clone)]
pub struct FitPage {
    pub path: PathBuf,
    pub panel: FitPanel,
}

/// Path of page `number` (1-based) of the report at `report`.
pub fn page_path(report: &Path, number: usize) -> PathBuf {
    let stem = report
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    let extension = report
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "svg".to_string());
    report.with_file_name(format!("{stem}-{number}.{extension}"))
}

/// Fit every requested pair without drawing anything.
///
/// # Errors
/// [`SamplingError::SchemaMismatch`] for a missing or non-numeric column,
/// [`SamplingError::Fit`] when a pair cannot be fitted.
pub fn prepare_panels(table: &RecordTable, plots: &[FitPlot]) -> Result<Vec<FitPanel>, SamplingError> {
    plots
        .iter()
        .map(|plot| {
            let xs = table.numeric_column(&plot.x_column)?;
            let ys = table.numeric_column(&plot.y_column)?;
            let fit = linear_fit(&xs, &ys).map_err(|source| SamplingError::Fit {
                x: plot.x_column.clone(),
                y: plot.y_column.clone(),
                source,
            })?;

            Ok(FitPanel {
                x_range: x_range(&xs),
                y_range: y_range(&ys, plot.y_margin),
                points: xs.into_iter().zip(ys).collect(),
                fit,
                plot: plot.clone(),
            })
        })
        .collect()
}

/// Fit and draw `plots` from `table`, one page per pair, next to `path`.
///
/// Every pair is fitted before any page is drawn, so a bad column leaves no
/// partial report behind.
pub fn render_fit_report(
    table: &RecordTable,
    plots: &[FitPlot],
    path: &Path,
    config: &FitReportConfig,
) -> Result<Vec<FitPage>, SamplingError> {
    let panels = prepare_panels(table, plots)?;

    let size = (config.width, config.panel_height);
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));

    let mut pages = Vec::with_capacity(panels.len());
    for (index, panel) in panels.into_iter().enumerate() {
        let page = page_path(path, index + 1);
        if is_png {
            draw_page(BitMapBackend::new(&page, size).into_drawing_area(), &panel)?;
        } else {
            draw_page(SVGBackend::new(&page, size).into_drawing_area(), &panel)?;
        }

        info!(
            "{} vs {}: {} (R² {:.4}, {} points) -> {}",
            panel.plot.y_column,
            panel.plot.x_column,
            panel.fit.label(panel.plot.precision),
            panel.fit.r_squared,
            panel.points.len(),
            page.display()
        );
        pages.push(FitPage { path: page, panel });
    }
    Ok(pages)
}

fn draw_page<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    panel: &FitPanel,
) -> Result<(), SamplingError> {
    root.fill(&WHITE).map_err(plot_error)?;
    draw_panel(&root, panel)?;
    root.present().map_err(plot_error)
}

fn draw_panel<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &FitPanel,
) -> Result<(), SamplingError> {
    let plot = &panel.plot;
    let mut chart = ChartBuilder::on(area)
        .caption(format!("{} vs {}", plot.y_label, plot.x_label), ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(panel.x_range.clone(), panel.y_range.clone())
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc(plot.x_label.as_str())
        .y_desc(plot.y_label.as_str())
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(
            panel
                .points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, BLUE.filled())),
        )
        .map_err(plot_error)?
        .label(plot.series_label.as_str())
        .legend(|(x, y)| Circle::new((x + 10, y), 3, BLUE.filled()));

    let (x0, x1) = (panel.x_range.start, panel.x_range.end);
    chart
        .draw_series(LineSeries::new(
            vec![(x0, panel.fit.predict(x0)), (x1, panel.fit.predict(x1))],
            &RED,
        ))
        .map_err(plot_error)?
        .label(panel.fit.label(plot.precision))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_error)
}

fn plot_error(err: impl std::fmt::Display) -> SamplingError {
    SamplingError::Plot(err.to_string())
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Data extent on x.
fn x_range(xs: &[f64]) -> Range<f64> {
    let (lo, hi) = bounds(xs);
    if hi > lo {
        lo..hi
    } else {
        lo - 0.5..hi + 0.5
    }
}

/// Data extent on y widened by `margin` times the magnitude of each end.
fn y_range(ys: &[f64], margin: f64) -> Range<f64> {
    let (lo, hi) = bounds(ys);
    let lo = lo - margin * lo.abs();
    let hi = hi + margin * hi.abs();
    if hi > lo {
        lo..hi
    } else {
        lo - 1.0..hi + 1.0
    }
}
