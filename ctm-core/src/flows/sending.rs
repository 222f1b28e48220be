use crate::flows::{FlowContext, FlowFunction, Profile};
use crate::state::{downcast_internal_state_mut, downcast_internal_state_ref, ComponentState, ScenarioVector};
use crate::utils::vmin;
use crate::CtmError;
use ndarray::{Array2, Zip};
use rand::distributions::{Distribution, WeightedIndex};
use rand::RngCore;

/// Sending flow of a holding buffer whose stored mass can discharge in
/// addition to the raw demand: `min(demand + queue_len / dt, capacity)`,
/// where `queue_len = density * cell_len`.
pub struct BufferSendingFlow {
    demand: Profile,
    capacity: Profile,
    ignore_queue: bool,
}

impl BufferSendingFlow {
    pub fn new<P: Into<Profile>>(demand: P) -> Self {
        Self {
            demand: demand.into(),
            capacity: Profile::Scalar(f64::INFINITY),
            ignore_queue: false,
        }
    }

    pub fn with_capacity<P: Into<Profile>>(mut self, capacity: P) -> Self {
        self.capacity = capacity.into();
        self
    }

    /// Pass the raw demand through, ignoring the stored queue.
    pub fn ignoring_queue(mut self) -> Self {
        self.ignore_queue = true;
        self
    }
}

impl FlowFunction for BufferSendingFlow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.demand.validate(state_len, num_steps)?;
        self.capacity.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let demand = self.demand.value(ctx.timestep, ctx.state_len);
        if self.ignore_queue {
            return Ok(demand);
        }

        let capacity = self.capacity.value(ctx.timestep, ctx.state_len);
        let queue_discharge = ctx.density * (ctx.cell_len / ctx.timestep.duration);
        Ok(vmin(&(&demand + &queue_discharge), &capacity))
    }
}

/// The sending branch of the triangular fundamental diagram:
/// `min(free_flow_speed * density, capacity)`.
pub struct PiecewiseLinearSendingFlow {
    free_flow_speed: Profile,
    capacity: Profile,
}

impl PiecewiseLinearSendingFlow {
    pub fn new<S, C>(free_flow_speed: S, capacity: C) -> Self
    where
        S: Into<Profile>,
        C: Into<Profile>,
    {
        Self {
            free_flow_speed: free_flow_speed.into(),
            capacity: capacity.into(),
        }
    }
}

impl FlowFunction for PiecewiseLinearSendingFlow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.free_flow_speed.validate(state_len, num_steps)?;
        self.capacity.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let speed = self.free_flow_speed.value(ctx.timestep, ctx.state_len);
        let capacity = self.capacity.value(ctx.timestep, ctx.state_len);
        Ok(vmin(&(&speed * ctx.density), &capacity))
    }
}

/// Triangular sending flow whose capacity switches to a reduced value once
/// density exceeds a threshold.
///
/// The trigger is evaluated fresh every step from the current density; it is
/// not sticky, so the full capacity is recovered if density falls back below
/// the threshold.
pub struct CapacityDropPiecewiseLinearSendingFlow {
    free_flow_speed: Profile,
    capacity: Profile,
    dropped_capacity: Profile,
    density_threshold: Profile,
}

impl CapacityDropPiecewiseLinearSendingFlow {
    pub fn new<S, C, D, T>(free_flow_speed: S, capacity: C, dropped_capacity: D, density_threshold: T) -> Self
    where
        S: Into<Profile>,
        C: Into<Profile>,
        D: Into<Profile>,
        T: Into<Profile>,
    {
        Self {
            free_flow_speed: free_flow_speed.into(),
            capacity: capacity.into(),
            dropped_capacity: dropped_capacity.into(),
            density_threshold: density_threshold.into(),
        }
    }
}

impl FlowFunction for CapacityDropPiecewiseLinearSendingFlow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.free_flow_speed.validate(state_len, num_steps)?;
        self.capacity.validate(state_len, num_steps)?;
        self.dropped_capacity.validate(state_len, num_steps)?;
        self.density_threshold.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let speed = self.free_flow_speed.value(ctx.timestep, ctx.state_len);
        let capacity = self.capacity.value(ctx.timestep, ctx.state_len);
        let dropped = self.dropped_capacity.value(ctx.timestep, ctx.state_len);
        let threshold = self.density_threshold.value(ctx.timestep, ctx.state_len);

        let effective_capacity = Zip::from(ctx.density)
            .and(&threshold)
            .and(&dropped)
            .and(&capacity)
            .map_collect(|&density, &threshold, &dropped, &capacity| {
                if density > threshold {
                    dropped
                } else {
                    capacity
                }
            });

        Ok(vmin(&(&speed * ctx.density), &effective_capacity))
    }
}

/// Per-scenario discrete modes of a Markov-modulated capacity process.
pub struct MarkovModes {
    pub modes: Vec<usize>,
}

/// Triangular sending flow whose capacity and free-flow speed are indexed by
/// a per-scenario discrete mode evolving as a Markov chain.
///
/// The next mode is sampled from the transition-probability matrix after
/// each flow computation. With multiple regimes the matrix is chosen by
/// thresholding the current density against the regime bounds.
pub struct MarkovianPiecewiseLinearSendingFlow {
    free_flow_speed: Vec<f64>,
    capacity: Vec<f64>,
    regime_bounds: Vec<f64>,
    initial_mode: usize,
    /// One pre-built sampler per `[regime][mode]` transition row.
    samplers: Vec<Vec<WeightedIndex<f64>>>,
}

impl MarkovianPiecewiseLinearSendingFlow {
    /// A single-regime chain with one `num_modes x num_modes` transition
    /// matrix.
    pub fn new(
        free_flow_speed: Vec<f64>,
        capacity: Vec<f64>,
        transition_matrix: Array2<f64>,
        initial_mode: usize,
    ) -> Result<Self, CtmError> {
        Self::with_regimes(free_flow_speed, capacity, vec![transition_matrix], Vec::new(), initial_mode)
    }

    /// A regime-dependent chain: `transition_matrices[r]` applies when the
    /// current density falls in the half-open interval delimited by
    /// `regime_bounds` (one more matrix than bounds).
    pub fn with_regimes(
        free_flow_speed: Vec<f64>,
        capacity: Vec<f64>,
        transition_matrices: Vec<Array2<f64>>,
        regime_bounds: Vec<f64>,
        initial_mode: usize,
    ) -> Result<Self, CtmError> {
        let num_modes = free_flow_speed.len();

        if capacity.len() != num_modes {
            return Err(CtmError::ModeParameterLength {
                expected: num_modes,
                found: capacity.len(),
            });
        }
        if initial_mode >= num_modes {
            return Err(CtmError::InvalidInitialMode {
                mode: initial_mode,
                num_modes,
            });
        }
        if transition_matrices.len() != regime_bounds.len() + 1 {
            return Err(CtmError::RegimeCount {
                expected: regime_bounds.len() + 1,
                found: transition_matrices.len(),
            });
        }

        let mut samplers = Vec::with_capacity(transition_matrices.len());
        for matrix in &transition_matrices {
            if matrix.nrows() != num_modes || matrix.ncols() != num_modes {
                return Err(CtmError::InvalidTransitionMatrix(format!(
                    "expected shape ({num_modes}, {num_modes}); found ({}, {})",
                    matrix.nrows(),
                    matrix.ncols()
                )));
            }

            let mut rows = Vec::with_capacity(num_modes);
            for (mode, row) in matrix.rows().into_iter().enumerate() {
                let sum: f64 = row.sum();
                if (sum - 1.0).abs() > 1e-6 {
                    return Err(CtmError::InvalidTransitionMatrix(format!(
                        "row {mode} sums to {sum}; rows must sum to one"
                    )));
                }
                if row.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                    return Err(CtmError::InvalidTransitionMatrix(format!(
                        "row {mode} contains probabilities outside [0, 1]"
                    )));
                }

                let sampler = WeightedIndex::new(row.iter().cloned()).map_err(|e| {
                    CtmError::InvalidTransitionMatrix(format!("row {mode}: {e}"))
                })?;
                rows.push(sampler);
            }
            samplers.push(rows);
        }

        Ok(Self {
            free_flow_speed,
            capacity,
            regime_bounds,
            initial_mode,
            samplers,
        })
    }

    fn regime(&self, density: f64) -> usize {
        self.regime_bounds.partition_point(|&bound| bound <= density)
    }
}

impl FlowFunction for MarkovianPiecewiseLinearSendingFlow {
    fn setup(&self, state_len: usize, _num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        let modes = MarkovModes {
            modes: vec![self.initial_mode; state_len],
        };
        Ok(Some(Box::new(modes)))
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let modes = downcast_internal_state_ref::<MarkovModes>(internal_state);

        let value = ScenarioVector::from_shape_fn(ctx.state_len, |i| {
            let mode = modes.modes[i];
            (self.free_flow_speed[mode] * ctx.density[i]).min(self.capacity[mode])
        });

        Ok(value)
    }

    fn after(
        &self,
        ctx: &FlowContext,
        rng: &mut dyn RngCore,
        internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<(), CtmError> {
        let modes = downcast_internal_state_mut::<MarkovModes>(internal_state);

        for (mode, &density) in modes.modes.iter_mut().zip(ctx.density.iter()) {
            let regime = self.regime(density);
            *mode = self.samplers[regime][*mode].sample(rng);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BufferSendingFlow, CapacityDropPiecewiseLinearSendingFlow, MarkovModes,
        MarkovianPiecewiseLinearSendingFlow, PiecewiseLinearSendingFlow,
    };
    use crate::flows::{FlowContext, FlowFunction};
    use crate::state::downcast_internal_state_ref;
    use crate::timestep::Timestep;
    use crate::CtmError;
    use float_cmp::assert_approx_eq;
    use ndarray::{array, Array1, Array2};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ctx<'a>(timestep: &'a Timestep, density: &'a Array1<f64>, cell_len: f64) -> FlowContext<'a> {
        FlowContext {
            timestep,
            density,
            upstream_density: None,
            cell_len,
            state_len: density.len(),
        }
    }

    #[test]
    fn test_piecewise_linear_sending() {
        let flow = PiecewiseLinearSendingFlow::new(2.0, 50.0);

        let timestep = Timestep::new(0, 1.0);
        let density = array![10.0, 100.0];
        let mut internal = None;

        let value = flow.compute(&ctx(&timestep, &density, 1.0), &mut internal).unwrap();
        assert_eq!(value, array![20.0, 50.0]);
    }

    #[test]
    fn test_buffer_sending() {
        // Queue discharge: min(demand + density * cell_len / dt, capacity).
        let flow = BufferSendingFlow::new(10.0).with_capacity(25.0);

        let timestep = Timestep::new(0, 2.0);
        let density = array![4.0, 100.0];
        let mut internal = None;

        let value = flow.compute(&ctx(&timestep, &density, 3.0), &mut internal).unwrap();
        assert_eq!(value, array![16.0, 25.0]);
    }

    #[test]
    fn test_buffer_sending_ignores_queue() {
        let flow = BufferSendingFlow::new(10.0).ignoring_queue();

        let timestep = Timestep::new(0, 1.0);
        let density = array![500.0];
        let mut internal = None;

        let value = flow.compute(&ctx(&timestep, &density, 1.0), &mut internal).unwrap();
        assert_eq!(value, array![10.0]);
    }

    #[test]
    fn test_capacity_drop_is_recoverable() {
        let flow = CapacityDropPiecewiseLinearSendingFlow::new(1.0, 50.0, 30.0, 100.0);

        let timestep = Timestep::new(0, 1.0);
        let mut internal = None;

        // Above the threshold the dropped capacity binds.
        let congested = array![120.0];
        let value = flow.compute(&ctx(&timestep, &congested, 1.0), &mut internal).unwrap();
        assert_eq!(value, array![30.0]);

        // Back below the threshold the full capacity is restored.
        let recovered = array![60.0];
        let value = flow.compute(&ctx(&timestep, &recovered, 1.0), &mut internal).unwrap();
        assert_eq!(value, array![50.0]);
    }

    #[test]
    fn test_markov_invalid_matrix() {
        let result = MarkovianPiecewiseLinearSendingFlow::new(
            vec![1.0, 1.0],
            vec![50.0, 20.0],
            Array2::from_shape_vec((2, 2), vec![0.9, 0.3, 0.4, 0.6]).unwrap(),
            0,
        );
        assert!(matches!(result.err(), Some(CtmError::InvalidTransitionMatrix(_))));

        let result = MarkovianPiecewiseLinearSendingFlow::new(
            vec![1.0, 1.0],
            vec![50.0, 20.0],
            Array2::eye(2),
            2,
        );
        assert_eq!(
            result.err(),
            Some(CtmError::InvalidInitialMode { mode: 2, num_modes: 2 })
        );
    }

    #[test]
    fn test_markov_mode_indexes_capacity() {
        let flow = MarkovianPiecewiseLinearSendingFlow::new(
            vec![1.0, 1.0],
            vec![50.0, 20.0],
            Array2::eye(2),
            1,
        )
        .unwrap();

        let timestep = Timestep::new(0, 1.0);
        let density = array![100.0];
        let mut internal = flow.setup(1, 10).unwrap();

        // Initial mode 1 selects the reduced capacity.
        let value = flow.compute(&ctx(&timestep, &density, 1.0), &mut internal).unwrap();
        assert_eq!(value, array![20.0]);
    }

    #[test]
    fn test_markov_regime_switching() {
        // Regime 0 (density < 100) holds the mode; regime 1 always toggles it.
        let hold = Array2::eye(2);
        let toggle = Array2::from_shape_vec((2, 2), vec![0.0, 1.0, 1.0, 0.0]).unwrap();

        let flow = MarkovianPiecewiseLinearSendingFlow::with_regimes(
            vec![1.0, 1.0],
            vec![50.0, 20.0],
            vec![hold, toggle],
            vec![100.0],
            0,
        )
        .unwrap();

        let timestep = Timestep::new(0, 1.0);
        let mut internal = flow.setup(1, 10).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let uncongested = array![50.0];
        flow.after(&ctx(&timestep, &uncongested, 1.0), &mut rng, &mut internal).unwrap();
        assert_eq!(downcast_internal_state_ref::<MarkovModes>(&internal).modes, vec![0]);

        let congested = array![150.0];
        flow.after(&ctx(&timestep, &congested, 1.0), &mut rng, &mut internal).unwrap();
        assert_eq!(downcast_internal_state_ref::<MarkovModes>(&internal).modes, vec![1]);

        flow.after(&ctx(&timestep, &congested, 1.0), &mut rng, &mut internal).unwrap();
        assert_eq!(downcast_internal_state_ref::<MarkovModes>(&internal).modes, vec![0]);
    }

    #[test]
    fn test_markov_empirical_transition_frequencies() {
        let transitions = Array2::from_shape_vec((2, 2), vec![0.7, 0.3, 0.4, 0.6]).unwrap();
        let flow = MarkovianPiecewiseLinearSendingFlow::new(
            vec![1.0, 1.0],
            vec![50.0, 20.0],
            transitions.clone(),
            0,
        )
        .unwrap();

        let timestep = Timestep::new(0, 1.0);
        let density = array![10.0];
        let mut internal = flow.setup(1, 1).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let num_steps = 50_000;
        let mut counts = [[0usize; 2]; 2];
        let mut previous = 0usize;

        for _ in 0..num_steps {
            flow.after(&ctx(&timestep, &density, 1.0), &mut rng, &mut internal).unwrap();
            let current = downcast_internal_state_ref::<MarkovModes>(&internal).modes[0];
            counts[previous][current] += 1;
            previous = current;
        }

        for from in 0..2 {
            let total: usize = counts[from].iter().sum();
            for to in 0..2 {
                let frequency = counts[from][to] as f64 / total as f64;
                assert_approx_eq!(f64, frequency, transitions[[from, to]], epsilon = 0.02);
            }
        }
    }
}
