use crate::cell::{Cell, CellIndex, CellParameters, CellVec, InitialDensity};
use crate::control::{ControlContext, Controller};
use crate::flows::{FlowContext, FlowFunction, Profile};
use crate::node::{Node, NodeIndex, NodeVec};
use crate::scenario::ScenarioDomain;
use crate::state::{CellInternalStates, CellState, NodeState, ScenarioVector, State};
use crate::timestep::{TimeDomain, Timestep};
use crate::CtmError;
use rand::RngCore;
use tracing::debug;

/// The static topology of a corridor: cells joined by junction nodes.
///
/// A network is immutable during a run; all dynamic quantities live in a
/// [`State`] created by [`Network::setup`]. One simulation step advances
/// the state through a fixed sequence of phases and no phase reads a
/// density written in the same step, so the update order of cells within a
/// phase is irrelevant.
#[derive(Default)]
pub struct Network {
    cells: CellVec,
    nodes: NodeVec,
}

impl Network {
    pub fn cells(&self) -> &CellVec {
        &self.cells
    }

    pub fn nodes(&self) -> &NodeVec {
        &self.nodes
    }

    pub fn get_cell(&self, index: &CellIndex) -> Result<&Cell, CtmError> {
        self.cells.get(index)
    }

    pub fn get_node(&self, index: &NodeIndex) -> Result<&Node, CtmError> {
        self.nodes.get(index)
    }

    pub fn get_cell_index_by_name(&self, name: &str) -> Result<CellIndex, CtmError> {
        self.cells
            .iter()
            .find(|cell| cell.name() == name)
            .map(|cell| cell.index())
            .ok_or_else(|| CtmError::CellNotFound(name.to_string()))
    }

    pub fn get_node_index_by_name(&self, name: &str) -> Result<NodeIndex, CtmError> {
        self.nodes
            .iter()
            .find(|node| node.name() == name)
            .map(|node| node.index())
            .ok_or_else(|| CtmError::NodeNotFound(name.to_string()))
    }

    fn check_cell_name(&self, name: &str) -> Result<(), CtmError> {
        if self.cells.iter().any(|cell| cell.name() == name) {
            return Err(CtmError::CellNameAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    pub fn add_source_cell(
        &mut self,
        name: &str,
        parameters: CellParameters,
        initial_density: InitialDensity,
        boundary_inflow: Box<dyn FlowFunction>,
        sending: Box<dyn FlowFunction>,
    ) -> Result<CellIndex, CtmError> {
        self.check_cell_name(name)?;
        Ok(self
            .cells
            .push_source(name, parameters, initial_density, boundary_inflow, sending))
    }

    pub fn add_link_cell(
        &mut self,
        name: &str,
        parameters: CellParameters,
        initial_density: InitialDensity,
        sending: Box<dyn FlowFunction>,
        receiving: Box<dyn FlowFunction>,
    ) -> Result<CellIndex, CtmError> {
        self.check_cell_name(name)?;
        Ok(self.cells.push_link(name, parameters, initial_density, sending, receiving))
    }

    pub fn add_sink_cell(
        &mut self,
        name: &str,
        parameters: CellParameters,
        initial_density: InitialDensity,
        receiving: Box<dyn FlowFunction>,
        boundary_outflow: Box<dyn FlowFunction>,
    ) -> Result<CellIndex, CtmError> {
        self.check_cell_name(name)?;
        Ok(self
            .cells
            .push_sink(name, parameters, initial_density, receiving, boundary_outflow))
    }

    /// Check that each cell exists, can carry flow in the required direction
    /// and is not already wired to another junction on that side.
    fn check_junction_cells(&self, name: &str, incoming: &[CellIndex], outgoing: &[CellIndex]) -> Result<(), CtmError> {
        if self.nodes.iter().any(|node| node.name() == name) {
            return Err(CtmError::NodeNameAlreadyExists(name.to_string()));
        }
        for index in incoming {
            let cell = self.cells.get(index)?;
            if cell.is_sink() {
                return Err(CtmError::SinkFeedsJunction(cell.name().to_string()));
            }
            if cell.downstream_node().is_some() {
                return Err(CtmError::DownstreamJunctionAlreadyExists(cell.name().to_string()));
            }
        }
        for index in outgoing {
            let cell = self.cells.get(index)?;
            if cell.is_source() {
                return Err(CtmError::SourceFedByJunction(cell.name().to_string()));
            }
            if cell.upstream_node().is_some() {
                return Err(CtmError::UpstreamJunctionAlreadyExists(cell.name().to_string()));
            }
        }
        Ok(())
    }

    fn wire_junction(&mut self, node: NodeIndex, incoming: &[CellIndex], outgoing: &[CellIndex]) -> Result<(), CtmError> {
        for index in incoming {
            self.cells.get_mut(index)?.set_downstream_node(node)?;
        }
        for index in outgoing {
            self.cells.get_mut(index)?.set_upstream_node(node)?;
        }
        Ok(())
    }

    pub fn add_basic_junction(
        &mut self,
        name: &str,
        incoming: CellIndex,
        outgoing: CellIndex,
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        self.check_junction_cells(name, &[incoming], &[outgoing])?;
        let index = self.nodes.push_basic(name, vec![incoming], vec![outgoing], controller)?;
        self.wire_junction(index, &[incoming], &[outgoing])?;
        Ok(index)
    }

    pub fn add_merge_junction(
        &mut self,
        name: &str,
        incoming: [CellIndex; 2],
        outgoing: CellIndex,
        merging_priority: [Profile; 2],
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        self.check_junction_cells(name, &incoming, &[outgoing])?;
        let index = self
            .nodes
            .push_merge(name, incoming.to_vec(), vec![outgoing], merging_priority, controller)?;
        self.wire_junction(index, &incoming, &[outgoing])?;
        Ok(index)
    }

    pub fn add_diverge_junction(
        &mut self,
        name: &str,
        incoming: CellIndex,
        outgoing: [CellIndex; 2],
        split_ratio: [Profile; 2],
        fifo: bool,
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        self.check_junction_cells(name, &[incoming], &outgoing)?;
        let index = self
            .nodes
            .push_diverge(name, vec![incoming], outgoing.to_vec(), split_ratio, fifo, controller)?;
        self.wire_junction(index, &[incoming], &outgoing)?;
        Ok(index)
    }

    /// Add a 2-to-2 freeway junction. `incoming` is `[mainline, on-ramp]`
    /// and `outgoing` is `[mainline, off-ramp]`; `split_ratio` splits the
    /// mainline demand as `[to_mainline, to_offramp]`.
    pub fn add_ramp_junction(
        &mut self,
        name: &str,
        incoming: [CellIndex; 2],
        outgoing: [CellIndex; 2],
        onramp_priority: Profile,
        split_ratio: [Profile; 2],
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        self.check_junction_cells(name, &incoming, &outgoing)?;
        let index = self.nodes.push_ramp(
            name,
            incoming.to_vec(),
            outgoing.to_vec(),
            onramp_priority,
            split_ratio,
            controller,
        )?;
        self.wire_junction(index, &incoming, &outgoing)?;
        Ok(index)
    }

    /// Validate the network against the run dimensions and build the initial
    /// dynamic state.
    pub fn setup(&self, time: &TimeDomain, scenarios: &ScenarioDomain) -> Result<State, CtmError> {
        let state_len = scenarios.len();
        let num_steps = time.len();
        debug!(
            cells = self.cells.len(),
            nodes = self.nodes.len(),
            state_len,
            "setting up network state"
        );

        let mut cell_states = Vec::with_capacity(self.cells.len());
        let mut cell_internal = Vec::with_capacity(self.cells.len());

        for cell in self.cells.iter() {
            cell_states.push(CellState::new(cell.initial_density(state_len)?));

            let mut internal = CellInternalStates::default();
            if let Some(flow) = cell.boundary_inflow().or(cell.boundary_outflow()) {
                internal.boundary = flow.setup(state_len, num_steps)?;
            }
            if let Some(flow) = cell.sending() {
                internal.sending = flow.setup(state_len, num_steps)?;
            }
            if let Some(flow) = cell.receiving() {
                if let Some(upstream) = flow.upstream_cell() {
                    self.cells.get(&upstream)?;
                }
                internal.receiving = flow.setup(state_len, num_steps)?;
            }
            cell_internal.push(internal);
        }

        let mut node_states = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.iter() {
            node.validate(state_len, num_steps)?;

            let mut node_state = NodeState::new(node.incoming_cells().len(), node.outgoing_cells().len(), state_len);
            if let Some(controller) = node.controller() {
                self.cells.get(&controller.monitored_cell())?;
                node_state.controller_internal = controller.setup(state_len)?;
            }
            node_states.push(node_state);
        }

        Ok(State::new(cell_states, cell_internal, node_states, state_len))
    }

    /// Advance the state by one step.
    ///
    /// Phases run in a fixed order: boundary flows, receiving then sending
    /// flows, control inputs, junction resolution, flow propagation, then the
    /// speed and density updates. Every flow is computed from prior-step
    /// densities before any density is advanced, which is what keeps the
    /// scheme explicit and order-independent within each phase.
    pub fn step(&self, timestep: &Timestep, state: &mut State, rng: &mut dyn RngCore) -> Result<(), CtmError> {
        let state_len = state.state_len();
        self.compute_boundary_flows(timestep, state_len, state)?;
        self.compute_receiving_flows(timestep, state_len, state)?;
        self.compute_sending_flows(timestep, state_len, state, rng)?;
        self.compute_control_inputs(timestep, state_len, state)?;
        self.resolve_junctions(timestep, state_len, state)?;
        self.propagate_flows(state);

        for cell in self.cells.iter() {
            cell.update_speed(&mut state.cells[*cell.index()]);
        }
        for cell in self.cells.iter() {
            cell.update_density(&mut state.cells[*cell.index()], timestep.duration);
        }

        Ok(())
    }

    /// Sources compute their inflow and sinks their outflow from the
    /// configured boundary conditions.
    fn compute_boundary_flows(&self, timestep: &Timestep, state_len: usize, state: &mut State) -> Result<(), CtmError> {
        let mut flows: Vec<Option<ScenarioVector>> = Vec::with_capacity(self.cells.len());
        {
            let (cell_states, internals) = state.split_cells_mut();
            for cell in self.cells.iter() {
                let index = *cell.index();
                let flow = match cell.boundary_inflow().or(cell.boundary_outflow()) {
                    Some(flow) => {
                        let ctx = FlowContext {
                            timestep,
                            density: &cell_states[index].density,
                            upstream_density: None,
                            cell_len: cell.parameters().cell_len,
                            state_len,
                        };
                        Some(flow.compute(&ctx, &mut internals[index].boundary)?)
                    }
                    None => None,
                };
                flows.push(flow);
            }
        }

        for (cell, flow) in self.cells.iter().zip(flows) {
            if let Some(flow) = flow {
                let cell_state = &mut state.cells[*cell.index()];
                if cell.is_source() {
                    cell_state.inflow = flow;
                } else {
                    cell_state.outflow = flow;
                }
            }
        }
        Ok(())
    }

    fn compute_receiving_flows(&self, timestep: &Timestep, state_len: usize, state: &mut State) -> Result<(), CtmError> {
        let mut flows: Vec<Option<ScenarioVector>> = Vec::with_capacity(self.cells.len());
        {
            let (cell_states, internals) = state.split_cells_mut();
            for cell in self.cells.iter() {
                let index = *cell.index();
                let flow = match cell.receiving() {
                    Some(flow) => {
                        let upstream_density = flow.upstream_cell().map(|up| &cell_states[*up].density);
                        let ctx = FlowContext {
                            timestep,
                            density: &cell_states[index].density,
                            upstream_density,
                            cell_len: cell.parameters().cell_len,
                            state_len,
                        };
                        Some(flow.compute(&ctx, &mut internals[index].receiving)?)
                    }
                    None => None,
                };
                flows.push(flow);
            }
        }

        for (cell, flow) in self.cells.iter().zip(flows) {
            if let Some(flow) = flow {
                state.cells[*cell.index()].receiving = flow;
            }
        }
        Ok(())
    }

    /// Sending flows run after receiving flows. The stochastic variants also
    /// advance their internal mode here, once the current value is computed.
    fn compute_sending_flows(
        &self,
        timestep: &Timestep,
        state_len: usize,
        state: &mut State,
        rng: &mut dyn RngCore,
    ) -> Result<(), CtmError> {
        let mut flows: Vec<Option<ScenarioVector>> = Vec::with_capacity(self.cells.len());
        {
            let (cell_states, internals) = state.split_cells_mut();
            for cell in self.cells.iter() {
                let index = *cell.index();
                let flow = match cell.sending() {
                    Some(flow) => {
                        let ctx = FlowContext {
                            timestep,
                            density: &cell_states[index].density,
                            upstream_density: None,
                            cell_len: cell.parameters().cell_len,
                            state_len,
                        };
                        let value = flow.compute(&ctx, &mut internals[index].sending)?;
                        flow.after(&ctx, rng, &mut internals[index].sending)?;
                        Some(value)
                    }
                    None => None,
                };
                flows.push(flow);
            }
        }

        for (cell, flow) in self.cells.iter().zip(flows) {
            if let Some(flow) = flow {
                state.cells[*cell.index()].sending = flow;
            }
        }
        Ok(())
    }

    fn compute_control_inputs(&self, timestep: &Timestep, state_len: usize, state: &mut State) -> Result<(), CtmError> {
        let (cell_states, node_states) = state.split_nodes_mut();
        for node in self.nodes.iter() {
            if let Some(controller) = node.controller() {
                let index = *node.index();
                let ctx = ControlContext {
                    timestep,
                    density: &cell_states[*controller.monitored_cell()].density,
                    state_len,
                };
                let control = controller.compute(&ctx, &mut node_states[index].controller_internal)?;
                node_states[index].control_input = Some(control);
            }
        }
        Ok(())
    }

    fn resolve_junctions(&self, timestep: &Timestep, state_len: usize, state: &mut State) -> Result<(), CtmError> {
        let (cell_states, node_states) = state.split_nodes_mut();
        for node in self.nodes.iter() {
            let index = *node.index();

            let sending: Vec<&ScenarioVector> = node
                .incoming_cells()
                .iter()
                .map(|cell| &cell_states[**cell].sending)
                .collect();
            let receiving: Vec<&ScenarioVector> = node
                .outgoing_cells()
                .iter()
                .map(|cell| &cell_states[**cell].receiving)
                .collect();

            let flows = node.resolve(
                timestep,
                &sending,
                &receiving,
                node_states[index].control_input.as_ref(),
                state_len,
            );
            node_states[index].inter_cell_flow = flows;
        }
        Ok(())
    }

    /// Aggregate the resolved inter-cell flows back onto the cells: first
    /// every outflow, then every inflow.
    fn propagate_flows(&self, state: &mut State) {
        for node in self.nodes.iter() {
            let node_state = &state.nodes[*node.index()];
            for (position, cell) in node.incoming_cells().iter().enumerate() {
                state.cells[**cell].outflow = node_state.incoming_cell_outflow(position);
            }
        }
        for node in self.nodes.iter() {
            let node_state = &state.nodes[*node.index()];
            for (position, cell) in node.outgoing_cells().iter().enumerate() {
                state.cells[**cell].inflow = node_state.outgoing_cell_inflow(position);
            }
        }
    }
}
