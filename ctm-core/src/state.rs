use ndarray::{Array1, Array3, Axis};
use std::any::Any;

/// One floating-point value per independent parallel scenario.
pub type ScenarioVector = Array1<f64>;

/// Opaque internal state for a flow function or controller that persists
/// across time steps (e.g. the current Markov mode of a stochastic capacity
/// process, or a controller's previous control input).
pub trait ComponentState: Any + Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> ComponentState for T
where
    T: Any + Send,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Helper function to downcast to internal component state and print a
/// helpful panic message if this fails.
pub fn downcast_internal_state_ref<T: 'static>(internal_state: &Option<Box<dyn ComponentState>>) -> &T {
    match internal_state {
        Some(internal) => match internal.as_ref().as_any().downcast_ref::<T>() {
            Some(state) => state,
            None => panic!("Internal state did not downcast to the correct type!"),
        },
        None => panic!("No internal state defined when one was expected!"),
    }
}

/// Helper function to downcast to internal component state and print a
/// helpful panic message if this fails.
pub fn downcast_internal_state_mut<T: 'static>(internal_state: &mut Option<Box<dyn ComponentState>>) -> &mut T {
    match internal_state {
        Some(internal) => match internal.as_mut().as_any_mut().downcast_mut::<T>() {
            Some(state) => state,
            None => panic!("Internal state did not downcast to the correct type!"),
        },
        None => panic!("No internal state defined when one was expected!"),
    }
}

/// Dynamic state of a single cell.
///
/// `density` is the conserved state carried across steps; the remaining
/// quantities are co-state recomputed every step from the prior density.
#[derive(Debug)]
pub struct CellState {
    pub density: ScenarioVector,
    pub speed: ScenarioVector,
    pub inflow: ScenarioVector,
    pub outflow: ScenarioVector,
    pub sending: ScenarioVector,
    pub receiving: ScenarioVector,
}

impl CellState {
    pub(crate) fn new(initial_density: ScenarioVector) -> Self {
        let state_len = initial_density.len();
        Self {
            density: initial_density,
            speed: ScenarioVector::from_elem(state_len, f64::NAN),
            inflow: ScenarioVector::from_elem(state_len, f64::NAN),
            outflow: ScenarioVector::from_elem(state_len, f64::NAN),
            sending: ScenarioVector::from_elem(state_len, f64::NAN),
            receiving: ScenarioVector::from_elem(state_len, f64::NAN),
        }
    }
}

/// Per-cell internal states for the cell's attached flow functions.
#[derive(Default)]
pub struct CellInternalStates {
    pub boundary: Option<Box<dyn ComponentState>>,
    pub sending: Option<Box<dyn ComponentState>>,
    pub receiving: Option<Box<dyn ComponentState>>,
}

/// Dynamic state of a single junction node.
pub struct NodeState {
    /// Resolved inter-cell flows for the current step, indexed by
    /// `[incoming, outgoing, scenario]`.
    pub inter_cell_flow: Array3<f64>,
    /// The controller's clamped control input for the current step, if a
    /// controller is attached.
    pub control_input: Option<ScenarioVector>,
    pub controller_internal: Option<Box<dyn ComponentState>>,
}

impl NodeState {
    pub(crate) fn new(num_incoming: usize, num_outgoing: usize, state_len: usize) -> Self {
        Self {
            inter_cell_flow: Array3::zeros((num_incoming, num_outgoing, state_len)),
            control_input: None,
            controller_internal: None,
        }
    }

    /// Total outflow of the node's i-th incoming cell: the sum of that cell's
    /// resolved flows over all outgoing cells.
    pub fn incoming_cell_outflow(&self, i: usize) -> ScenarioVector {
        self.inter_cell_flow.index_axis(Axis(0), i).sum_axis(Axis(0))
    }

    /// Total inflow of the node's j-th outgoing cell: the sum of the resolved
    /// flows into it over all incoming cells.
    pub fn outgoing_cell_inflow(&self, j: usize) -> ScenarioVector {
        self.inter_cell_flow.index_axis(Axis(1), j).sum_axis(Axis(0))
    }
}

/// The complete dynamic state of a network, owned separately from the static
/// topology so that the network itself stays immutable during a run.
pub struct State {
    pub(crate) cells: Vec<CellState>,
    pub(crate) cell_internal: Vec<CellInternalStates>,
    pub(crate) nodes: Vec<NodeState>,
    state_len: usize,
}

impl State {
    pub(crate) fn new(
        cells: Vec<CellState>,
        cell_internal: Vec<CellInternalStates>,
        nodes: Vec<NodeState>,
        state_len: usize,
    ) -> Self {
        Self {
            cells,
            cell_internal,
            nodes,
            state_len,
        }
    }

    /// The number of scenarios every vector in this state is sized for.
    pub fn state_len(&self) -> usize {
        self.state_len
    }

    pub fn cell(&self, index: usize) -> &CellState {
        &self.cells[index]
    }

    pub fn node(&self, index: usize) -> &NodeState {
        &self.nodes[index]
    }

    /// Split into cell states and their flow internal states so that a flow
    /// can read densities while mutating its own internal state.
    pub(crate) fn split_cells_mut(&mut self) -> (&[CellState], &mut [CellInternalStates]) {
        (&self.cells, &mut self.cell_internal)
    }

    /// Split into cell states and node states so that a controller can read
    /// the monitored cell's density while mutating its node's state.
    pub(crate) fn split_nodes_mut(&mut self) -> (&[CellState], &mut [NodeState]) {
        (&self.cells, &mut self.nodes)
    }
}
