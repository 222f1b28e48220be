use crate::cell::CellIndex;
use crate::state::{downcast_internal_state_mut, ComponentState, ScenarioVector};
use crate::timestep::Timestep;
use crate::CtmError;
use ndarray::Zip;

/// The per-step inputs a controller reads.
pub struct ControlContext<'a> {
    pub timestep: &'a Timestep,
    /// Density of the monitored cell.
    pub density: &'a ScenarioVector,
    pub state_len: usize,
}

/// A local feedback controller attached to a junction.
///
/// The engine only consumes this capability: each step the controller yields
/// one clamped control-input vector, computed from the density of the cell it
/// monitors. Junction variants that support metering (the freeway ramp) use
/// the input as an additional flow cap.
pub trait Controller: Send + Sync {
    /// The cell whose density the controller reads each step.
    fn monitored_cell(&self) -> CellIndex;

    fn setup(
        &self,
        #[allow(unused_variables)] state_len: usize,
    ) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        Ok(None)
    }

    /// Compute the clamped control input for the current step.
    fn compute(
        &self,
        ctx: &ControlContext,
        internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError>;
}

/// ALINEA ramp metering: an integrator tracking a density setpoint.
///
/// `u = clip(u_prev + gain * (setpoint - density), min, max)`, with the
/// previous input persisted across steps and seeded at the maximum.
pub struct AlineaController {
    gain: f64,
    setpoint: f64,
    min_control_input: f64,
    max_control_input: f64,
    cell: CellIndex,
}

impl AlineaController {
    pub fn new(gain: f64, setpoint: f64, min_control_input: f64, max_control_input: f64, cell: CellIndex) -> Self {
        Self {
            gain,
            setpoint,
            min_control_input,
            max_control_input,
            cell,
        }
    }
}

/// Previous control input of an [`AlineaController`].
struct AlineaState {
    previous: ScenarioVector,
}

impl Controller for AlineaController {
    fn monitored_cell(&self) -> CellIndex {
        self.cell
    }

    fn setup(&self, state_len: usize) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        Ok(Some(Box::new(AlineaState {
            previous: ScenarioVector::from_elem(state_len, self.max_control_input),
        })))
    }

    fn compute(
        &self,
        ctx: &ControlContext,
        internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        let state = downcast_internal_state_mut::<AlineaState>(internal_state);

        let control = Zip::from(&state.previous)
            .and(ctx.density)
            .map_collect(|&previous, &density| {
                (previous + self.gain * (self.setpoint - density))
                    .clamp(self.min_control_input, self.max_control_input)
            });

        state.previous = control.clone();
        Ok(control)
    }
}

/// Affine control law `u = max(max_control_input - gain * density, min)`.
pub struct AffineController {
    gain: f64,
    min_control_input: f64,
    max_control_input: f64,
    cell: CellIndex,
}

impl AffineController {
    pub fn new(gain: f64, min_control_input: f64, max_control_input: f64, cell: CellIndex) -> Self {
        Self {
            gain,
            min_control_input,
            max_control_input,
            cell,
        }
    }
}

impl Controller for AffineController {
    fn monitored_cell(&self) -> CellIndex {
        self.cell
    }

    fn compute(
        &self,
        ctx: &ControlContext,
        _internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError> {
        Ok(ctx
            .density
            .mapv(|density| (self.max_control_input - self.gain * density).max(self.min_control_input)))
    }
}
