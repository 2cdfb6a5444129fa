//! Positioning collaborators
//!
//! The fleet engine never interprets lighthouse samples itself. It hands raw
//! sample batches to a [`CalibrationSink`] while capturing calibration data and
//! to a [`PositionSolver`] once a [`CalibrationModel`] is loaded.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::protocol::Lh2RawData;
use crate::{GatewayError, Result};

/// File name of the calibration model inside the calibration directory.
pub const CALIBRATION_MODEL_FILE: &str = "calibration.out";
/// File name raw samples are captured to while calibrating.
pub const CALIBRATION_CAPTURE_FILE: &str = "calibration.csv";

/// Opaque calibration parameters.
///
/// The byte layout belongs to the solver that produced it; the gateway only
/// loads it and passes it along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationModel {
    data: Arc<[u8]>,
}

impl CalibrationModel {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Load the model from `dir`, if one has been saved there.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CALIBRATION_MODEL_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No calibration model found");
            return Ok(None);
        }
        let data = std::fs::read(&path)
            .map_err(|e| GatewayError::io(format!("reading {}", path.display()), e))?;
        info!(path = %path.display(), bytes = data.len(), "Loaded calibration model");
        Ok(Some(Self::new(data)))
    }
}

/// Turns a raw sample batch into planar coordinates.
pub trait PositionSolver: Send + Sync + 'static {
    fn solve(&self, samples: &Lh2RawData, model: &CalibrationModel) -> Option<(f64, f64)>;
}

/// Solver used when no geometric solver is plugged in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSolver;

impl PositionSolver for NoSolver {
    fn solve(&self, _samples: &Lh2RawData, _model: &CalibrationModel) -> Option<(f64, f64)> {
        None
    }
}

impl<F> PositionSolver for F
where
    F: Fn(&Lh2RawData, &CalibrationModel) -> Option<(f64, f64)> + Send + Sync + 'static,
{
    fn solve(&self, samples: &Lh2RawData, model: &CalibrationModel) -> Option<(f64, f64)> {
        self(samples, model)
    }
}

/// Records raw sample batches for offline calibration.
///
/// Failures are reported to the caller, which logs them and carries on.
pub trait CalibrationSink: Send + Sync + 'static {
    fn capture(&self, samples: &Lh2RawData, destination: &Path) -> Result<()>;
}

/// Appends one CSV line per batch: `bits,polynomial_index,offset` per sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvCalibrationSink;

impl CalibrationSink for CsvCalibrationSink {
    fn capture(&self, samples: &Lh2RawData, destination: &Path) -> Result<()> {
        let line = samples
            .locations
            .iter()
            .map(|l| format!("{},{},{}", l.bits, l.polynomial_index, l.offset))
            .collect::<Vec<_>>()
            .join(",");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .map_err(|e| GatewayError::io(format!("opening {}", destination.display()), e))?;
        writeln!(file, "{line}")
            .map_err(|e| GatewayError::io(format!("writing {}", destination.display()), e))
    }
}

/// Positioning collaborators and calibration state used by the fleet engine.
#[derive(Clone)]
pub struct Positioning {
    pub solver: Arc<dyn PositionSolver>,
    pub sink: Arc<dyn CalibrationSink>,
    pub model: Option<CalibrationModel>,
    /// Where raw samples go when capture is enabled, `None` disables capture
    pub capture_path: Option<PathBuf>,
}

impl Default for Positioning {
    fn default() -> Self {
        Self {
            solver: Arc::new(NoSolver),
            sink: Arc::new(CsvCalibrationSink),
            model: None,
            capture_path: None,
        }
    }
}

impl std::fmt::Debug for Positioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Positioning")
            .field("model_loaded", &self.model.is_some())
            .field("capture_path", &self.capture_path)
            .finish()
    }
}

impl Positioning {
    pub fn with_solver(mut self, solver: impl PositionSolver) -> Self {
        self.solver = Arc::new(solver);
        self
    }

    pub fn with_sink(mut self, sink: impl CalibrationSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn with_model(mut self, model: CalibrationModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_capture_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture_path = Some(path.into());
        self
    }
}
