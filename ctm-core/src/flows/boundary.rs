use crate::flows::{FlowContext, FlowFunction, Profile};
use crate::state::{ComponentState, ScenarioVector};
use crate::utils::vmin;
use crate::CtmError;

/// External demand entering the network at a source cell.
pub struct BoundaryInflow {
    demand: Profile,
}

impl BoundaryInflow {
    pub fn new<P: Into<Profile>>(demand: P) -> Self {
        Self { demand: demand.into() }
    }
}

impl FlowFunction for BoundaryInflow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.demand.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        Ok(self.demand.value(ctx.timestep, ctx.state_len))
    }
}

/// Flow leaving the network at a sink cell: `min(speed * density, capacity)`.
///
/// Speed and capacity may each be constant or time-indexed; time-varying
/// series must have the same length.
pub struct BoundaryOutflow {
    speed: Profile,
    capacity: Profile,
}

impl BoundaryOutflow {
    pub fn new<S, C>(speed: S, capacity: C) -> Result<Self, CtmError>
    where
        S: Into<Profile>,
        C: Into<Profile>,
    {
        let speed = speed.into();
        let capacity = capacity.into();

        if let (Some(speed_len), Some(capacity_len)) = (speed.num_steps(), capacity.num_steps()) {
            if speed_len != capacity_len {
                return Err(CtmError::BoundarySeriesLengthMismatch {
                    speed: speed_len,
                    capacity: capacity_len,
                });
            }
        }

        Ok(Self { speed, capacity })
    }
}

impl FlowFunction for BoundaryOutflow {
    fn setup(&self, state_len: usize, num_steps: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        self.speed.validate(state_len, num_steps)?;
        self.capacity.validate(state_len, num_steps)?;
        Ok(None)
    }

    fn compute(
        &self,
        ctx: &FlowContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let speed = self.speed.value(ctx.timestep, ctx.state_len);
        let capacity = self.capacity.value(ctx.timestep, ctx.state_len);
        Ok(vmin(&(&speed * ctx.density), &capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundaryInflow, BoundaryOutflow};
    use crate::flows::{FlowContext, FlowFunction, Profile};
    use crate::timestep::Timestep;
    use crate::CtmError;
    use ndarray::array;

    fn ctx<'a>(timestep: &'a Timestep, density: &'a ndarray::Array1<f64>) -> FlowContext<'a> {
        FlowContext {
            timestep,
            density,
            upstream_density: None,
            cell_len: 1.0,
            state_len: density.len(),
        }
    }

    #[test]
    fn test_boundary_inflow() {
        let flow = BoundaryInflow::new(Profile::PerTimestep(vec![10.0, 20.0]));
        assert!(flow.setup(3, 2).is_ok());

        let timestep = Timestep::new(1, 1.0);
        let density = array![0.0, 0.0, 0.0];
        let mut internal = None;

        let value = flow.compute(&ctx(&timestep, &density), &mut internal).unwrap();
        assert_eq!(value, array![20.0, 20.0, 20.0]);
    }

    #[test]
    fn test_boundary_outflow() {
        let flow = BoundaryOutflow::new(2.0, 30.0).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let density = array![5.0, 100.0];
        let mut internal = None;

        // min(2 * density, 30)
        let value = flow.compute(&ctx(&timestep, &density), &mut internal).unwrap();
        assert_eq!(value, array![10.0, 30.0]);
    }

    #[test]
    fn test_boundary_outflow_series_mismatch() {
        let result = BoundaryOutflow::new(
            Profile::PerTimestep(vec![1.0, 2.0]),
            Profile::PerTimestep(vec![1.0, 2.0, 3.0]),
        );
        assert_eq!(
            result.err(),
            Some(CtmError::BoundarySeriesLengthMismatch { speed: 2, capacity: 3 })
        );
    }
}
