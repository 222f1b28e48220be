mod boundary;
mod profile;
mod receiving;
mod sending;

use crate::cell::CellIndex;
use crate::state::{ComponentState, ScenarioVector};
use crate::timestep::Timestep;
use crate::CtmError;
pub use boundary::{BoundaryInflow, BoundaryOutflow};
pub use profile::Profile;
use rand::RngCore;
pub use receiving::{
    LookAheadPiecewiseLinearReceivingFlow, PiecewiseLinearReceivingFlow, ReceivingParameters,
    UnboundedReceivingFlow,
};
pub use sending::{
    BufferSendingFlow, CapacityDropPiecewiseLinearSendingFlow, MarkovModes,
    MarkovianPiecewiseLinearSendingFlow, PiecewiseLinearSendingFlow,
};

/// The per-step inputs a flow function reads.
///
/// All densities are those of the *prior* step; the scheduler computes every
/// sending and receiving flow before any cell density is advanced.
pub struct FlowContext<'a> {
    pub timestep: &'a Timestep,
    /// Density of the owning cell.
    pub density: &'a ScenarioVector,
    /// Density of the extra upstream cell a look-ahead flow reads, resolved
    /// by the scheduler from [`FlowFunction::upstream_cell`].
    pub upstream_density: Option<&'a ScenarioVector>,
    /// Length of the owning cell.
    pub cell_len: f64,
    pub state_len: usize,
}

/// A pluggable numeric strategy computing one flow quantity per step.
///
/// Implementations are immutable during a run; any state that persists across
/// steps lives in the boxed internal state created by [`setup`](Self::setup)
/// and owned by the run's [`State`](crate::state::State).
pub trait FlowFunction: Send + Sync {
    /// Validate the flow against the run dimensions and allocate internal
    /// state where the variant carries any.
    fn setup(
        &self,
        #[allow(unused_variables)] state_len: usize,
        #[allow(unused_variables)] num_steps: usize,
    ) -> Result<Option<Box<dyn ComponentState>>, CtmError> {
        Ok(None)
    }

    /// Compute the current flow value.
    fn compute(
        &self,
        ctx: &FlowContext,
        internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<ScenarioVector, CtmError>;

    /// Advance any internal stochastic state after the flow value for this
    /// step has been computed.
    fn after(
        &self,
        #[allow(unused_variables)] ctx: &FlowContext,
        #[allow(unused_variables)] rng: &mut dyn RngCore,
        #[allow(unused_variables)] internal_state: &mut Option<Box<dyn ComponentState>>,
    ) -> Result<(), CtmError> {
        Ok(())
    }

    /// The upstream cell whose density this flow additionally reads, if any.
    fn upstream_cell(&self) -> Option<CellIndex> {
        None
    }
}
