use crate::network::Network;
use crate::state::State;
use crate::timestep::Timestep;
use crate::CtmError;
use ndarray::{Array2, Axis};

/// Recorded time series for one cell.
///
/// Density holds one extra leading row for the initial condition; the
/// remaining quantities are only defined once a step has run.
pub struct CellOutput {
    name: String,
    /// Shape `[num_steps + 1, state_len]`; row 0 is the initial condition.
    pub density: Array2<f64>,
    /// Shape `[num_steps, state_len]`.
    pub speed: Array2<f64>,
    pub inflow: Array2<f64>,
    pub outflow: Array2<f64>,
}

impl CellOutput {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Recorded time series for one junction node.
pub struct NodeOutput {
    name: String,
    /// Shape `[num_steps, state_len]`; `None` when no controller is attached.
    pub control_input: Option<Array2<f64>>,
}

impl NodeOutput {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory output of a completed run, indexed the same way as the
/// network's cell and node arenas.
pub struct RunOutput {
    cells: Vec<CellOutput>,
    nodes: Vec<NodeOutput>,
}

impl RunOutput {
    pub(crate) fn new(network: &Network, num_steps: usize, state_len: usize) -> Self {
        let cells = network
            .cells()
            .iter()
            .map(|cell| CellOutput {
                name: cell.name().to_string(),
                density: Array2::zeros((num_steps + 1, state_len)),
                speed: Array2::zeros((num_steps, state_len)),
                inflow: Array2::zeros((num_steps, state_len)),
                outflow: Array2::zeros((num_steps, state_len)),
            })
            .collect();

        let nodes = network
            .nodes()
            .iter()
            .map(|node| NodeOutput {
                name: node.name().to_string(),
                control_input: node
                    .controller()
                    .map(|_| Array2::zeros((num_steps, state_len))),
            })
            .collect();

        Self { cells, nodes }
    }

    /// Record the initial densities into row 0.
    pub(crate) fn save_initial(&mut self, state: &State) {
        for (index, output) in self.cells.iter_mut().enumerate() {
            output
                .density
                .index_axis_mut(Axis(0), 0)
                .assign(&state.cell(index).density);
        }
    }

    /// Record the post-step state of every cell and node.
    pub(crate) fn save_step(&mut self, timestep: &Timestep, state: &State) {
        let row = timestep.index;
        for (index, output) in self.cells.iter_mut().enumerate() {
            let cell_state = state.cell(index);
            output.density.index_axis_mut(Axis(0), row + 1).assign(&cell_state.density);
            output.speed.index_axis_mut(Axis(0), row).assign(&cell_state.speed);
            output.inflow.index_axis_mut(Axis(0), row).assign(&cell_state.inflow);
            output.outflow.index_axis_mut(Axis(0), row).assign(&cell_state.outflow);
        }
        for (index, output) in self.nodes.iter_mut().enumerate() {
            if let Some(control_input) = &mut output.control_input {
                if let Some(value) = &state.node(index).control_input {
                    control_input.index_axis_mut(Axis(0), row).assign(value);
                }
            }
        }
    }

    pub fn cell_outputs(&self) -> &[CellOutput] {
        &self.cells
    }

    pub fn node_outputs(&self) -> &[NodeOutput] {
        &self.nodes
    }

    pub fn cell_output(&self, name: &str) -> Result<&CellOutput, CtmError> {
        self.cells
            .iter()
            .find(|output| output.name == name)
            .ok_or_else(|| CtmError::CellNotFound(name.to_string()))
    }

    pub fn node_output(&self, name: &str) -> Result<&NodeOutput, CtmError> {
        self.nodes
            .iter()
            .find(|output| output.name == name)
            .ok_or_else(|| CtmError::NodeNotFound(name.to_string()))
    }
}
