use crate::flows::FlowFunction;
use crate::node::NodeIndex;
use crate::state::{CellState, ScenarioVector};
use crate::CtmError;
use ndarray::Zip;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct CellIndex(usize);

impl CellIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }
}

impl Deref for CellIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for CellIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Initial density a cell is seeded with when a run's state is built.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialDensity {
    /// A single value broadcast to all scenarios.
    Constant(f64),
    /// One value per scenario; the length must equal the scenario count.
    Vector(Vec<f64>),
}

impl From<f64> for InitialDensity {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl From<Vec<f64>> for InitialDensity {
    fn from(values: Vec<f64>) -> Self {
        Self::Vector(values)
    }
}

/// Static numeric parameters of a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellParameters {
    pub min_density: f64,
    pub max_density: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    pub cell_len: f64,
}

impl Default for CellParameters {
    fn default() -> Self {
        Self {
            min_density: 0.0,
            max_density: f64::INFINITY,
            min_speed: 0.0,
            max_speed: f64::INFINITY,
            cell_len: 1.0,
        }
    }
}

#[derive(Debug)]
pub struct CellMeta {
    pub index: CellIndex,
    pub name: String,
}

/// Identity, parameters and junction back-references common to every cell
/// variant.
pub struct CellCore {
    meta: CellMeta,
    parameters: CellParameters,
    initial_density: InitialDensity,
    /// The junction feeding this cell, if any. A cell is fed by at most one.
    upstream_node: Option<NodeIndex>,
    /// The junction draining this cell, if any. A cell is drained by at most
    /// one.
    downstream_node: Option<NodeIndex>,
}

impl CellCore {
    fn new(index: CellIndex, name: &str, parameters: CellParameters, initial_density: InitialDensity) -> Self {
        Self {
            meta: CellMeta {
                index,
                name: name.to_string(),
            },
            parameters,
            initial_density,
            upstream_node: None,
            downstream_node: None,
        }
    }
}

/// A boundary cell where demand enters the network.
pub struct SourceCell {
    core: CellCore,
    pub(crate) boundary_inflow: Box<dyn FlowFunction>,
    pub(crate) sending: Box<dyn FlowFunction>,
}

/// An interior roadway segment.
pub struct LinkCell {
    core: CellCore,
    pub(crate) sending: Box<dyn FlowFunction>,
    pub(crate) receiving: Box<dyn FlowFunction>,
}

/// A boundary cell where flow leaves the network.
pub struct SinkCell {
    core: CellCore,
    pub(crate) receiving: Box<dyn FlowFunction>,
    pub(crate) boundary_outflow: Box<dyn FlowFunction>,
}

pub enum Cell {
    Source(SourceCell),
    Link(LinkCell),
    Sink(SinkCell),
}

impl Cell {
    fn core(&self) -> &CellCore {
        match self {
            Self::Source(cell) => &cell.core,
            Self::Link(cell) => &cell.core,
            Self::Sink(cell) => &cell.core,
        }
    }

    fn core_mut(&mut self) -> &mut CellCore {
        match self {
            Self::Source(cell) => &mut cell.core,
            Self::Link(cell) => &mut cell.core,
            Self::Sink(cell) => &mut cell.core,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().meta.name
    }

    pub fn index(&self) -> CellIndex {
        self.core().meta.index
    }

    pub fn parameters(&self) -> &CellParameters {
        &self.core().parameters
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link(_))
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Sink(_))
    }

    pub fn upstream_node(&self) -> Option<NodeIndex> {
        self.core().upstream_node
    }

    pub fn downstream_node(&self) -> Option<NodeIndex> {
        self.core().downstream_node
    }

    pub(crate) fn set_upstream_node(&mut self, node: NodeIndex) -> Result<(), CtmError> {
        let core = self.core_mut();
        if core.upstream_node.is_some() {
            return Err(CtmError::UpstreamJunctionAlreadyExists(core.meta.name.clone()));
        }
        core.upstream_node = Some(node);
        Ok(())
    }

    pub(crate) fn set_downstream_node(&mut self, node: NodeIndex) -> Result<(), CtmError> {
        let core = self.core_mut();
        if core.downstream_node.is_some() {
            return Err(CtmError::DownstreamJunctionAlreadyExists(core.meta.name.clone()));
        }
        core.downstream_node = Some(node);
        Ok(())
    }

    pub fn boundary_inflow(&self) -> Option<&dyn FlowFunction> {
        match self {
            Self::Source(cell) => Some(cell.boundary_inflow.as_ref()),
            _ => None,
        }
    }

    pub fn boundary_outflow(&self) -> Option<&dyn FlowFunction> {
        match self {
            Self::Sink(cell) => Some(cell.boundary_outflow.as_ref()),
            _ => None,
        }
    }

    pub fn sending(&self) -> Option<&dyn FlowFunction> {
        match self {
            Self::Source(cell) => Some(cell.sending.as_ref()),
            Self::Link(cell) => Some(cell.sending.as_ref()),
            Self::Sink(_) => None,
        }
    }

    pub fn receiving(&self) -> Option<&dyn FlowFunction> {
        match self {
            Self::Source(_) => None,
            Self::Link(cell) => Some(cell.receiving.as_ref()),
            Self::Sink(cell) => Some(cell.receiving.as_ref()),
        }
    }

    /// Resolve the configured initial condition against the scenario count.
    pub(crate) fn initial_density(&self, state_len: usize) -> Result<ScenarioVector, CtmError> {
        let core = self.core();
        match &core.initial_density {
            InitialDensity::Constant(value) => Ok(ScenarioVector::from_elem(state_len, *value)),
            InitialDensity::Vector(values) => {
                if values.len() != state_len {
                    return Err(CtmError::InitialConditionLength {
                        cell: core.meta.name.clone(),
                        expected: state_len,
                        found: values.len(),
                    });
                }
                Ok(ScenarioVector::from_vec(values.clone()))
            }
        }
    }

    /// `speed = clip(outflow / density, min_speed, max_speed)`; an empty
    /// cell is defined to travel at free flow (`max_speed`), not to fault.
    pub(crate) fn update_speed(&self, state: &mut CellState) {
        let parameters = self.core().parameters;

        Zip::from(&mut state.speed)
            .and(&state.outflow)
            .and(&state.density)
            .for_each(|speed, &outflow, &density| {
                *speed = if density == 0.0 {
                    parameters.max_speed
                } else {
                    (outflow / density).clamp(parameters.min_speed, parameters.max_speed)
                };
            });
    }

    /// The discretised conservation law:
    /// `density += (inflow - outflow) * dt / cell_len`, clamped into the
    /// configured bounds. Clamping silently absorbs transient over- and
    /// under-shoot.
    pub(crate) fn update_density(&self, state: &mut CellState, time_step_size: f64) {
        let parameters = self.core().parameters;
        let scale = time_step_size / parameters.cell_len;

        Zip::from(&mut state.density)
            .and(&state.inflow)
            .and(&state.outflow)
            .for_each(|density, &inflow, &outflow| {
                *density = (*density + (inflow - outflow) * scale)
                    .clamp(parameters.min_density, parameters.max_density);
            });
    }
}

/// Arena of all cells in a network.
#[derive(Default)]
pub struct CellVec {
    cells: Vec<Cell>,
}

impl Deref for CellVec {
    type Target = Vec<Cell>;

    fn deref(&self) -> &Self::Target {
        &self.cells
    }
}

impl DerefMut for CellVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.cells
    }
}

impl CellVec {
    pub fn get(&self, index: &CellIndex) -> Result<&Cell, CtmError> {
        self.cells.get(index.0).ok_or(CtmError::CellIndexNotFound(*index))
    }

    pub fn get_mut(&mut self, index: &CellIndex) -> Result<&mut Cell, CtmError> {
        self.cells.get_mut(index.0).ok_or(CtmError::CellIndexNotFound(*index))
    }

    pub(crate) fn push_source(
        &mut self,
        name: &str,
        parameters: CellParameters,
        initial_density: InitialDensity,
        boundary_inflow: Box<dyn FlowFunction>,
        sending: Box<dyn FlowFunction>,
    ) -> CellIndex {
        let index = CellIndex(self.cells.len());
        self.cells.push(Cell::Source(SourceCell {
            core: CellCore::new(index, name, parameters, initial_density),
            boundary_inflow,
            sending,
        }));
        index
    }

    pub(crate) fn push_link(
        &mut self,
        name: &str,
        parameters: CellParameters,
        initial_density: InitialDensity,
        sending: Box<dyn FlowFunction>,
        receiving: Box<dyn FlowFunction>,
    ) -> CellIndex {
        let index = CellIndex(self.cells.len());
        self.cells.push(Cell::Link(LinkCell {
            core: CellCore::new(index, name, parameters, initial_density),
            sending,
            receiving,
        }));
        index
    }

    pub(crate) fn push_sink(
        &mut self,
        name: &str,
        parameters: CellParameters,
        initial_density: InitialDensity,
        receiving: Box<dyn FlowFunction>,
        boundary_outflow: Box<dyn FlowFunction>,
    ) -> CellIndex {
        let index = CellIndex(self.cells.len());
        self.cells.push(Cell::Sink(SinkCell {
            core: CellCore::new(index, name, parameters, initial_density),
            receiving,
            boundary_outflow,
        }));
        index
    }
}

#[cfg(test)]
mod tests {
    use super::{CellParameters, CellVec, InitialDensity};
    use crate::flows::{BoundaryInflow, BufferSendingFlow};
    use crate::state::CellState;
    use crate::CtmError;
    use ndarray::array;

    fn test_cell_vec() -> CellVec {
        let mut cells = CellVec::default();
        cells.push_source(
            "source",
            CellParameters {
                max_density: 100.0,
                max_speed: 2.0,
                ..Default::default()
            },
            InitialDensity::Vector(vec![10.0, 20.0]),
            Box::new(BoundaryInflow::new(5.0)),
            Box::new(BufferSendingFlow::new(5.0).ignoring_queue()),
        );
        cells
    }

    #[test]
    fn test_initial_density_length_validation() {
        let cells = test_cell_vec();
        let cell = cells.first().unwrap();

        assert_eq!(cell.initial_density(2).unwrap(), array![10.0, 20.0]);
        assert_eq!(
            cell.initial_density(3),
            Err(CtmError::InitialConditionLength {
                cell: "source".to_string(),
                expected: 3,
                found: 2,
            })
        );
    }

    #[test]
    fn test_update_density_clamps() {
        let cells = test_cell_vec();
        let cell = cells.first().unwrap();

        let mut state = CellState::new(array![10.0, 95.0]);
        state.inflow = array![0.0, 50.0];
        state.outflow = array![50.0, 0.0];

        cell.update_density(&mut state, 1.0);

        // -40 is clamped to min_density, 145 to max_density.
        assert_eq!(state.density, array![0.0, 100.0]);
    }

    #[test]
    fn test_update_speed_guards_zero_density() {
        let cells = test_cell_vec();
        let cell = cells.first().unwrap();

        let mut state = CellState::new(array![0.0, 10.0, 10.0]);
        state.outflow = array![5.0, 5.0, 100.0];

        cell.update_speed(&mut state);

        // Empty cell travels at free flow; the congested one is clamped.
        assert_eq!(state.speed, array![2.0, 0.5, 2.0]);
    }
}
