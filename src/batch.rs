//! Many independent solves on a thread pool.
//!
//! Requests are distributed with rayon while the calling thread reports
//! progress and watches for cancellation. A failing request does not stop the
//! others: every request gets its own result.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rayon::prelude::*;

use crate::atmosphere::Atmosphere;
use crate::error::{RtmError, RtmResult};
use crate::result::SolveResult;
use crate::rtm::Dort;
use crate::sensor::Sensor;
use crate::snowpack::Snowpack;

/// One snowpack observed by one sensor.
#[derive(Debug, Clone)]
pub struct Request {
    /// Medium to solve
    pub snowpack: Snowpack,
    /// Sensor configuration
    pub sensor: Sensor,
    /// Atmosphere above the snowpack, cold and transparent if `None`
    pub atmosphere: Option<Arc<dyn Atmosphere>>,
}

impl Request {
    /// A request without atmosphere.
    pub fn new(snowpack: Snowpack, sensor: Sensor) -> Self {
        Self {
            snowpack,
            sensor,
            atmosphere: None,
        }
    }

    /// Add an atmosphere.
    pub fn with_atmosphere(self, atmosphere: Arc<dyn Atmosphere>) -> Self {
        Self {
            atmosphere: Some(atmosphere),
            ..self
        }
    }
}

/// Hooks called from the submitting thread while the pool works.
pub trait Monitor {
    /// Error that aborts the batch.
    type Error: From<RtmError>;

    /// Called before each progress report. An error cancels the requests
    /// that have not started and is returned by the batch.
    fn check(&mut self) -> Result<(), Self::Error>;

    /// Block until the next progress report.
    fn wait(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Monitor that never interrupts the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Monitor for Unattended {
    type Error = RtmError;

    fn check(&mut self) -> Result<(), RtmError> {
        Ok(())
    }
}

/// Solver applied to many requests in parallel.
#[derive(Debug, Clone)]
pub struct Batch {
    dort: Dort,
    num_threads: usize,
    progress_interval: Duration,
}

impl Batch {
    /// Batch with an automatic number of threads and a progress report every
    /// 5 seconds.
    pub fn new(dort: Dort) -> Self {
        Self {
            dort,
            num_threads: 0,
            progress_interval: Duration::from_secs(5),
        }
    }

    /// Number of worker threads, 0 to let rayon decide.
    pub fn with_threads(self, num_threads: usize) -> Self {
        Self {
            num_threads,
            ..self
        }
    }

    /// Time between two progress reports.
    pub fn with_progress_interval(self, progress_interval: Duration) -> Self {
        Self {
            progress_interval,
            ..self
        }
    }

    /// Solve every request, in order.
    pub fn run(&self, requests: &[Request]) -> RtmResult<Vec<RtmResult<SolveResult>>> {
        self.run_with_cancel(requests, &AtomicBool::new(false), &mut Unattended)
    }

    /// Solve every request, in order, until `cancelled` is set.
    ///
    /// Requests that had not started when the flag was raised fail with
    /// [`RtmError::Cancelled`]. Running ones complete.
    pub fn run_with_cancel<M: Monitor>(
        &self,
        requests: &[Request],
        cancelled: &AtomicBool,
        monitor: &mut M,
    ) -> Result<Vec<RtmResult<SolveResult>>, M::Error> {
        let total = requests.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| RtmError::config(e.to_string()))?;

        let num_completed = AtomicUsize::new(0);
        let mut results = Vec::new();

        info!(
            "Solving {total} snowpacks on {} threads",
            pool.current_num_threads()
        );

        pool.in_place_scope(|s| -> Result<(), M::Error> {
            s.spawn(|_| {
                requests
                    .par_iter()
                    .map(|request| {
                        if cancelled.load(Ordering::Relaxed) {
                            return Err(RtmError::Cancelled);
                        }
                        self.dort.solve(
                            &request.snowpack,
                            &request.sensor,
                            request.atmosphere.as_deref(),
                        )
                    })
                    .inspect(|_| {
                        num_completed.fetch_add(1, Ordering::Relaxed);
                    })
                    .collect_into_vec(&mut results);
            });

            // Workers run in the pool, this thread reports progress and
            // relays cancellation
            while !cancelled.load(Ordering::Relaxed) {
                if let Err(e) = monitor.check() {
                    cancelled.store(true, Ordering::Relaxed);
                    return Err(e);
                }

                let num_completed = num_completed.load(Ordering::Relaxed);
                let progress = num_completed as f32 / total.max(1) as f32 * 100.;
                info!("Completed {num_completed}/{total} snowpacks ({progress:0.2}%)");

                if num_completed == total {
                    break;
                }
                monitor.wait(self.progress_interval);
            }
            Ok(())
        })?;

        let failures = results.iter().filter(|r| r.is_err()).count();
        debug!("batch finished with {failures} failed requests");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atmosphere::SimpleIsotropicAtmosphere;
    use crate::config::DortOptions;
    use crate::emmodel::{PhaseShape, Prescribed};
    use crate::snowpack::Layer;
    use num_complex::Complex64;

    fn request(temperature: f64, thickness: f64, ks: f64) -> Request {
        let model = Arc::new(Prescribed {
            ks,
            ka: 0.,
            permittivity: Complex64::new(1.5, 0.),
            shape: PhaseShape::Rayleigh,
        });
        let layer = Layer::new(thickness, temperature, model).unwrap();
        let sky = SimpleIsotropicAtmosphere::new(temperature, 0., 1.).unwrap();
        Request::new(
            Snowpack::new(vec![layer]).unwrap(),
            Sensor::passive(19e9, &[40., 55.]).unwrap(),
        )
        .with_atmosphere(Arc::new(sky))
    }

    fn batch() -> Batch {
        let dort = Dort::new(DortOptions {
            n_max_stream: 6,
            ..Default::default()
        })
        .unwrap();
        Batch::new(dort)
            .with_threads(2)
            .with_progress_interval(Duration::from_millis(10))
    }

    #[test]
    fn results_follow_the_requests() {
        let batch = batch();
        let requests: Vec<_> = [230., 250., 270.]
            .iter()
            .map(|&t| request(t, 1., 0.))
            .collect();
        let results = batch.run(&requests).unwrap();

        assert_eq!(results.len(), 3);
        for (request, result) in requests.iter().zip(results) {
            let single = batch
                .dort
                .solve(
                    &request.snowpack,
                    &request.sensor,
                    request.atmosphere.as_deref(),
                )
                .unwrap();
            assert_eq!(result.unwrap(), single);
        }
    }

    #[test]
    fn failures_stay_with_their_request() {
        // A transparent layer cannot be infinitely thick
        let requests = vec![request(250., 1., 0.), request(250., f64::INFINITY, 0.)];
        let results = batch().run(&requests).unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(RtmError::NumericalInstability { layer: 0, .. })
        ));
    }

    #[test]
    fn cancelled_before_start() {
        let requests = vec![request(250., 1., 0.); 4];
        let cancelled = AtomicBool::new(true);
        let results = batch()
            .run_with_cancel(&requests, &cancelled, &mut Unattended)
            .unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r == &Err(RtmError::Cancelled)));
    }

    #[derive(Debug)]
    struct Interrupt;

    impl Monitor for Interrupt {
        type Error = RtmError;

        fn check(&mut self) -> Result<(), RtmError> {
            Err(RtmError::Cancelled)
        }
    }

    #[test]
    fn monitor_errors_abort_the_batch() {
        let requests = vec![request(250., 1., 0.); 2];
        let cancelled = AtomicBool::new(false);
        let result = batch().run_with_cancel(&requests, &cancelled, &mut Interrupt);
        assert_eq!(result.unwrap_err(), RtmError::Cancelled);
        assert!(cancelled.load(Ordering::Relaxed));
    }

    #[test]
    fn empty_batch() {
        assert!(batch().run(&[]).unwrap().is_empty());
    }
}
