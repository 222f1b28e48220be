use crate::network::Network;
use crate::recorders::RunOutput;
use crate::scenario::ScenarioDomain;
use crate::timestep::{TimeDomain, Timestepper};
use crate::CtmError;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Instant;
use tracing::{debug, info};

/// The combined time and scenario domains a model is simulated over.
#[derive(Debug, Clone)]
pub struct ModelDomain {
    time: TimeDomain,
    scenarios: ScenarioDomain,
}

impl ModelDomain {
    pub fn new(time: TimeDomain, scenarios: ScenarioDomain) -> Self {
        Self { time, scenarios }
    }

    /// A domain of `num_steps` steps of the given duration with a single
    /// scenario.
    pub fn from_timestepper(timestepper: Timestepper) -> Result<Self, CtmError> {
        Ok(Self {
            time: timestepper.try_into()?,
            scenarios: ScenarioDomain::default(),
        })
    }

    pub fn time(&self) -> &TimeDomain {
        &self.time
    }

    pub fn scenarios(&self) -> &ScenarioDomain {
        &self.scenarios
    }

    /// `(num_steps, state_len)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.time.len(), self.scenarios.len())
    }
}

/// A simulation model: a network bound to the domain it will be run over.
pub struct Model {
    domain: ModelDomain,
    network: Network,
}

impl Model {
    pub fn new(domain: ModelDomain, network: Network) -> Self {
        Self { domain, network }
    }

    pub fn domain(&self) -> &ModelDomain {
        &self.domain
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    /// Run the model over its domain with a non-deterministic seed.
    pub fn run(&self) -> Result<RunOutput, CtmError> {
        let mut rng = ChaCha8Rng::from_entropy();
        self.run_with_rng(&mut rng)
    }

    /// Run the model with a fixed seed. Two runs with the same seed produce
    /// identical output.
    pub fn run_with_seed(&self, seed: u64) -> Result<RunOutput, CtmError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.run_with_rng(&mut rng)
    }

    pub fn run_with_rng<R: RngCore>(&self, rng: &mut R) -> Result<RunOutput, CtmError> {
        let (num_steps, state_len) = self.domain.shape();
        info!(num_steps, state_len, "starting run");
        let started = Instant::now();

        let mut state = self.network.setup(&self.domain.time, &self.domain.scenarios)?;
        let mut output = RunOutput::new(&self.network, num_steps, state_len);
        output.save_initial(&state);

        for timestep in self.domain.time.timesteps() {
            debug!(step = timestep.index, "stepping");
            self.network.step(timestep, &mut state, rng)?;
            output.save_step(timestep, &state);
        }

        info!(
            "run of {} steps over {} scenarios complete in {}ms",
            num_steps,
            state_len,
            started.elapsed().as_millis()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::{Model, ModelDomain};
    use crate::cell::CellIndex;
    use crate::control::AlineaController;
    use crate::test_utils::{default_domain, ramp_corridor, simple_corridor};
    use float_cmp::assert_approx_eq;
    use ndarray::Axis;

    #[test]
    fn test_domain_shape() {
        let domain = default_domain(10, 4);
        assert_eq!(domain.shape(), (10, 4));
    }

    #[test]
    fn test_run_records_all_outputs() {
        let domain = default_domain(5, 1);
        let model = Model::new(domain, simple_corridor());

        let output = model.run_with_seed(0).unwrap();

        let density = &output.cell_output("link").unwrap().density;
        assert_eq!(density.shape(), &[6, 1]);
        assert_approx_eq!(f64, density[[0, 0]], 10.0);

        let speed = &output.cell_output("link").unwrap().speed;
        assert_eq!(speed.shape(), &[5, 1]);

        // An uncontrolled junction records no control input.
        assert!(output.node_output("upstream").unwrap().control_input.is_none());
    }

    #[test]
    fn test_fixed_seed_reproducibility() {
        let model = Model::new(default_domain(5, 3), simple_corridor());

        let first = model.run_with_seed(42).unwrap();
        let second = model.run_with_seed(42).unwrap();

        for (a, b) in first.cell_outputs().iter().zip(second.cell_outputs()) {
            assert_eq!(a.density, b.density);
            assert_eq!(a.outflow, b.outflow);
        }
    }

    #[test]
    fn test_density_stays_within_bounds() {
        let model = Model::new(default_domain(20, 1), simple_corridor());
        let output = model.run_with_seed(7).unwrap();

        let density = &output.cell_output("link").unwrap().density;
        for row in density.axis_iter(Axis(0)) {
            for &value in row {
                assert!((0.0..=150.0).contains(&value));
            }
        }
    }

    #[test]
    fn test_ramp_metering_limits_onramp_outflow() {
        // The controller monitors the downstream mainline cell, which is the
        // third cell added by the builder.
        let controller = AlineaController::new(1.0, 30.0, 0.0, 5.0, CellIndex::new(2));
        let network = ramp_corridor(Some(Box::new(controller)));
        let model = Model::new(default_domain(10, 1), network);

        let output = model.run_with_seed(0).unwrap();

        let control = output.node_output("ramp").unwrap().control_input.as_ref().unwrap();
        let outflow = &output.cell_output("onramp").unwrap().outflow;

        // The empty corridor starts at the maximum control input, and the
        // metered flow never exceeds the input.
        assert_approx_eq!(f64, control[[0, 0]], 5.0);
        for step in 0..10 {
            assert!(outflow[[step, 0]] <= control[[step, 0]] + 1e-12);
        }
    }

    #[test]
    fn test_model_domain_from_timestepper() {
        let domain = ModelDomain::from_timestepper(crate::timestep::Timestepper::new(3, 0.5)).unwrap();
        assert_eq!(domain.shape(), (3, 1));
        assert_eq!(domain.time().step_duration(), 0.5);
    }
}
