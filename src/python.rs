//! Python binding
//!
//! NOTE: this module is the interface between Rust and Python. The real work
//! happens in the other modules, they do not use `pyo3`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use ndarray::{Array2, Axis};
use num_complex::Complex64;
use numpy::prelude::*;
use numpy::{PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyKeyboardInterrupt, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::atmosphere::{Atmosphere, SimpleIsotropicAtmosphere};
use crate::batch::{Batch, Monitor, Request};
use crate::config::DortOptions;
use crate::emmodel::Iba;
use crate::error::RtmError;
use crate::microstructure::Microstructure;
use crate::rtm::Dort;
use crate::sensor::Sensor;
use crate::snowpack::{Layer, Snowpack};
use crate::substrate;

impl From<RtmError> for PyErr {
    fn from(e: RtmError) -> Self {
        match e {
            RtmError::Configuration(_) | RtmError::Domain { .. } | RtmError::InconsistentInputs => {
                PyValueError::new_err(e.to_string())
            }
            RtmError::NumericalInstability { .. } | RtmError::IllConditionedStack(_) => {
                PyRuntimeError::new_err(e.to_string())
            }
            RtmError::Cancelled => PyKeyboardInterrupt::new_err(e.to_string()),
        }
    }
}

/// Checks for Ctrl-C while the pool works.
struct Signals<'py>(Python<'py>);

impl Monitor for Signals<'_> {
    type Error = PyErr;

    fn check(&mut self) -> PyResult<()> {
        self.0.check_signals()
    }

    fn wait(&mut self, interval: Duration) {
        self.0.allow_threads(|| std::thread::sleep(interval));
    }
}

/// Brightness temperatures, each dimensioned as (`num_points`, `num_angles`).
#[pyclass]
struct BrightnessTemperatures {
    tbv: Array2<f64>,
    tbh: Array2<f64>,
}

#[pymethods]
impl BrightnessTemperatures {
    #[getter]
    fn tbv<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.tbv.to_pyarray(py)
    }

    #[getter]
    fn tbh<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        self.tbh.to_pyarray(py)
    }
}

/// Compute the brightness temperature of dry snowpacks over soil.
///
/// The layer profiles have shape (`num_points`, `num_layers`), the first layer
/// being at the top:
///
/// `thickness`: layer thickness in m
///
/// `temperature`: physical temperature in K
///
/// `density`: snow density in kg/m³
///
/// `radius`: radius of the sticky hard spheres in m
///
/// `stickiness`: stickiness of the sticky hard spheres
///
/// The following have shape (`num_points`, ):
///
/// `soil_temperature`: physical temperature of the soil in K
///
/// `sky_tbdown`, `sky_tbup`, `sky_trans`: isotropic atmosphere
///
/// `soil_permittivity` is the complex permittivity of the soil as a
/// `(real, imaginary)` pair, `frequency` is in Hz and `incidence_angle`, in
/// degrees, has shape (`num_angles`, ).
///
/// Scattering is computed with IBA. `options` is an optional TOML table of
/// solver options. The number of worker threads is controlled by
/// `num_threads`, `None` to choose automatically.
#[pyfunction]
#[pyo3(signature = (thickness, temperature, density, radius, stickiness, soil_temperature, soil_permittivity, sky_tbdown, sky_tbup, sky_trans, frequency, incidence_angle, options=None, num_threads=None))]
#[allow(clippy::too_many_arguments)]
fn compute_tb(
    py: Python<'_>,
    thickness: PyReadonlyArray2<'_, f64>,
    temperature: PyReadonlyArray2<'_, f64>,
    density: PyReadonlyArray2<'_, f64>,
    radius: PyReadonlyArray2<'_, f64>,
    stickiness: PyReadonlyArray2<'_, f64>,
    soil_temperature: PyReadonlyArray1<'_, f64>,
    soil_permittivity: (f64, f64),
    sky_tbdown: PyReadonlyArray1<'_, f64>,
    sky_tbup: PyReadonlyArray1<'_, f64>,
    sky_trans: PyReadonlyArray1<'_, f64>,
    frequency: f64,
    incidence_angle: PyReadonlyArray1<'_, f64>,
    options: Option<&str>,
    num_threads: Option<usize>,
) -> PyResult<BrightnessTemperatures> {
    let num_points = thickness.shape()[0];
    let num_layers = thickness.shape()[1];

    // Check shapes of all inputs
    {
        let two_dims = &[
            temperature.dims(),
            density.dims(),
            radius.dims(),
            stickiness.dims(),
        ];
        let one_dim = &[
            soil_temperature.len(),
            sky_tbdown.len(),
            sky_tbup.len(),
            sky_trans.len(),
        ];
        if two_dims.iter().any(|d| d != &[num_points, num_layers]) {
            return Err(RtmError::InconsistentInputs.into());
        }
        if one_dim.iter().any(|&d| d != num_points) {
            return Err(RtmError::InconsistentInputs.into());
        }
    }
    debug!("input shapes are consistent");

    let options = match options {
        Some(text) => DortOptions::from_toml_str(text)?,
        None => DortOptions::default(),
    };
    let sensor = Sensor::passive(frequency, incidence_angle.as_slice()?)?;
    let soil_permittivity = Complex64::new(soil_permittivity.0, soil_permittivity.1);

    let thickness = thickness.as_array();
    let temperature = temperature.as_array();
    let density = density.as_array();
    let radius = radius.as_array();
    let stickiness = stickiness.as_array();
    let soil_temperature = soil_temperature.as_slice()?;
    let (sky_tbdown, sky_tbup, sky_trans) =
        (sky_tbdown.as_slice()?, sky_tbup.as_slice()?, sky_trans.as_slice()?);

    let iba = Arc::new(Iba);
    let requests = (0..num_points)
        .map(|point| -> Result<_, RtmError> {
            let layers = (0..num_layers)
                .map(|l| {
                    Layer::snow(
                        thickness[[point, l]],
                        temperature[[point, l]],
                        density[[point, l]],
                        Microstructure::StickyHardSpheres {
                            radius: radius[[point, l]],
                            stickiness: stickiness[[point, l]],
                        },
                        iba.clone(),
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            let soil = substrate::Flat::new(soil_permittivity, soil_temperature[point])?;
            let sky: Arc<dyn Atmosphere> = Arc::new(SimpleIsotropicAtmosphere::new(
                sky_tbdown[point],
                sky_tbup[point],
                sky_trans[point],
            )?);
            Ok(Request::new(
                Snowpack::new(layers)?.with_substrate(Arc::new(soil)),
                sensor.clone(),
            )
            .with_atmosphere(sky))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let batch = Batch::new(Dort::new(options)?).with_threads(num_threads.unwrap_or(0));
    let results = batch.run_with_cancel(&requests, &AtomicBool::new(false), &mut Signals(py))?;

    // Copy the intermediate results to the output arrays
    debug!("copying RTM output");
    let num_angles = sensor.theta_deg().len();
    let mut output = BrightnessTemperatures {
        tbv: Array2::zeros([num_points, num_angles]),
        tbh: Array2::zeros([num_points, num_angles]),
    };
    results
        .into_iter()
        .enumerate()
        .try_for_each(|(index, result)| -> Result<_, RtmError> {
            let tb = result?.into_passive()?;
            output.tbv.index_axis_mut(Axis(0), index).assign(&tb.tbv());
            output.tbh.index_axis_mut(Axis(0), index).assign(&tb.tbh());
            Ok(())
        })?;

    Ok(output)
}

/// A Python module implemented in Rust.
#[pymodule]
fn snowpack_rtm(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();

    m.add_function(wrap_pyfunction!(compute_tb, m)?)?;
    m.add_class::<BrightnessTemperatures>()?;
    Ok(())
}
