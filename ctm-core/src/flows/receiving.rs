use crate::cell::CellIndex;
use crate::flows::{FlowContext, FlowFunction, Profile};
use crate::state::{ComponentState, ScenarioVector};
use crate::utils::vmin;
use crate::CtmError;
use ndarray::Zip;

/// Receiving flow with no downstream constraint; used by sinks that can
/// absorb any inflow.
pub struct UnboundedReceivingFlow;

impl FlowFunction for UnboundedReceivingFlow {
    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        Ok(ScenarioVector::from_elem(ctx.state_len, f64::INFINITY))
    }
}

/// The receiving branch of the triangular fundamental diagram:
/// `min(congestion_wave_speed * (max_density - density), capacity)`.
pub struct PiecewiseLinearReceivingFlow {
    congestion_wave_speed: Profile,
    max_density: Profile,
    capacity: Profile,
}

impl PiecewiseLinearReceivingFlow {
    pub fn new<W, D>(congestion_wave_speed: W, max_density: D) -> Self
    where
        W: Into<Profile>,
        D: Into<Profile>,
    {
        Self {
            congestion_wave_speed: congestion_wave_speed.into(),
            max_density: max_density.into(),
            capacity: Profile::Scalar(f64::INFINITY),
        }
    }

    pub fn with_capacity<C: Into<Profile>>(mut self, capacity: C) -> Self {
        self.capacity = capacity.into();
        self
    }
}

impl FlowFunction for PiecewiseLinearReceivingFlow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.congestion_wave_speed.validate(state_len, num_steps)?;
        self.max_density.validate(state_len, num_steps)?;
        self.capacity.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let wave_speed = self.congestion_wave_speed.value(ctx.timestep, ctx.state_len);
        let max_density = self.max_density.value(ctx.timestep, ctx.state_len);
        let capacity = self.capacity.value(ctx.timestep, ctx.state_len);

        Ok(vmin(&(&wave_speed * &(&max_density - ctx.density)), &capacity))
    }
}

/// Parameter set of [`LookAheadPiecewiseLinearReceivingFlow`].
#[derive(Debug, Clone)]
pub struct ReceivingParameters {
    pub congestion_wave_speed: Profile,
    pub max_density: Profile,
    pub capacity: Profile,
}

impl ReceivingParameters {
    pub fn new<W, D, C>(congestion_wave_speed: W, max_density: D, capacity: C) -> Self
    where
        W: Into<Profile>,
        D: Into<Profile>,
        C: Into<Profile>,
    {
        Self {
            congestion_wave_speed: congestion_wave_speed.into(),
            max_density: max_density.into(),
            capacity: capacity.into(),
        }
    }

    fn validate(&self, state_len: usize, num_steps: usize) -> Result<(), CtmError> {
        self.congestion_wave_speed.validate(state_len, num_steps)?;
        self.max_density.validate(state_len, num_steps)?;
        self.capacity.validate(state_len, num_steps)
    }
}

/// Triangular receiving flow that switches to a relaxed "look-ahead"
/// parameter set, per scenario, whenever the upstream cell's density falls
/// at or below a threshold.
///
/// The relaxation prevents an uncongested upstream cell from seeing an overly
/// conservative local bottleneck signal. The trigger is evaluated fresh every
/// step; there is no hysteresis.
pub struct LookAheadPiecewiseLinearReceivingFlow {
    base: ReceivingParameters,
    look_ahead: ReceivingParameters,
    density_threshold: Profile,
    upstream_cell: CellIndex,
}

impl LookAheadPiecewiseLinearReceivingFlow {
    pub fn new<T: Into<Profile>>(
        base: ReceivingParameters,
        look_ahead: ReceivingParameters,
        density_threshold: T,
        upstream_cell: CellIndex,
    ) -> Self {
        Self {
            base,
            look_ahead,
            density_threshold: density_threshold.into(),
            upstream_cell,
        }
    }
}

impl FlowFunction for LookAheadPiecewiseLinearReceivingFlow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.base.validate(state_len, num_steps)?;
        self.look_ahead.validate(state_len, num_steps)?;
        self.density_threshold.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let upstream_density = ctx
            .upstream_density
            .expect("upstream cell checked at setup; the scheduler always resolves its density");

        let timestep = ctx.timestep;
        let threshold = self.density_threshold.value(timestep, ctx.state_len);

        let pick = |triggered: &ScenarioVector, on: ScenarioVector, off: ScenarioVector| {
            Zip::from(triggered)
                .and(&on)
                .and(&off)
                .map_collect(|&t, &on, &off| if t != 0.0 { on } else { off })
        };

        let triggered = Zip::from(upstream_density)
            .and(&threshold)
            .map_collect(|&density, &threshold| if density <= threshold { 1.0 } else { 0.0 });

        let wave_speed = pick(
            &triggered,
            self.look_ahead.congestion_wave_speed.value(timestep, ctx.state_len),
            self.base.congestion_wave_speed.value(timestep, ctx.state_len),
        );
        let max_density = pick(
            &triggered,
            self.look_ahead.max_density.value(timestep, ctx.state_len),
            self.base.max_density.value(timestep, ctx.state_len),
        );
        let capacity = pick(
            &triggered,
            self.look_ahead.capacity.value(timestep, ctx.state_len),
            self.base.capacity.value(timestep, ctx.state_len),
        );

        Ok(vmin(&(&wave_speed * &(&max_density - ctx.density)), &capacity))
    }

    fn upstream_cell(&self) -> Option<CellIndex> {
        Some(self.upstream_cell)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        LookAheadPiecewiseLinearReceivingFlow, PiecewiseLinearReceivingFlow, ReceivingParameters,
        UnboundedReceivingFlow,
    };
    use crate::cell::CellIndex;
    use crate::flows::{FlowContext, FlowFunction};
    use crate::timestep::Timestep;
    use ndarray::{array, Array1};

    fn ctx<'a>(
        timestep: &'a Timestep,
        density: &'a Array1<f64>,
        upstream_density: Option<&'a Array1<f64>>,
    ) -> FlowContext<'a> {
        FlowContext {
            timestep,
            density,
            upstream_density,
            cell_len: 1.0,
            state_len: density.len(),
        }
    }

    #[test]
    fn test_unbounded_receiving() {
        let flow = UnboundedReceivingFlow;

        let timestep = Timestep::new(0, 1.0);
        let density = array![10.0, 20.0];
        let mut internal = None;

        let value = flow.compute(&ctx(&timestep, &density, None), &mut internal).unwrap();
        assert_eq!(value, array![f64::INFINITY, f64::INFINITY]);
    }

    #[test]
    fn test_piecewise_linear_receiving() {
        let flow = PiecewiseLinearReceivingFlow::new(0.5, 150.0).with_capacity(50.0);

        let timestep = Timestep::new(0, 1.0);
        let density = array![140.0, 10.0];
        let mut internal = None;

        // min(0.5 * (150 - density), 50)
        let value = flow.compute(&ctx(&timestep, &density, None), &mut internal).unwrap();
        assert_eq!(value, array![5.0, 50.0]);
    }

    #[test]
    fn test_look_ahead_switches_on_upstream_density() {
        let base = ReceivingParameters::new(0.25, 150.0, 40.0);
        let relaxed = ReceivingParameters::new(1.0, 150.0, 60.0);
        let flow = LookAheadPiecewiseLinearReceivingFlow::new(base, relaxed, 50.0, CellIndex::new(0));

        let timestep = Timestep::new(0, 1.0);
        let density = array![100.0, 100.0];
        // First scenario's upstream cell is uncongested, second is congested.
        let upstream = array![30.0, 120.0];
        let mut internal = None;

        let value = flow
            .compute(&ctx(&timestep, &density, Some(&upstream)), &mut internal)
            .unwrap();

        // Relaxed: min(1.0 * (150 - 100), 60) = 50. Base: min(0.25 * 50, 40) = 12.5.
        assert_eq!(value, array![50.0, 12.5]);
        assert_eq!(flow.upstream_cell(), Some(CellIndex::new(0)));
    }
}
