//! A macroscopic traffic-flow simulation engine implementing the cell
//! transmission model family (Daganzo's CTM and Gomes' asymmetric CTM).
//!
//! A roadway corridor is discretised into [`cell::Cell`]s connected by
//! [`node::Node`] junctions. Conserved density is advanced through discrete
//! time steps by a fixed seven-phase update protocol driven by
//! [`network::Network`] and orchestrated by [`models::Model`]. All state
//! quantities are vectors over independent parallel scenarios which never
//! interact, so every per-cell and per-node computation is elementwise.

use crate::cell::CellIndex;
use crate::node::NodeIndex;
use thiserror::Error;

pub mod cell;
pub mod control;
pub mod flows;
pub mod models;
pub mod network;
pub mod node;
pub mod recorders;
pub mod scenario;
pub mod state;
pub mod test_utils;
pub mod timestep;
pub mod utils;

#[derive(Error, Debug, PartialEq)]
pub enum CtmError {
    #[error("cell index {0} not found")]
    CellIndexNotFound(CellIndex),
    #[error("node index {0} not found")]
    NodeIndexNotFound(NodeIndex),
    #[error("cell with name `{0}` not found")]
    CellNotFound(String),
    #[error("node with name `{0}` not found")]
    NodeNotFound(String),
    #[error("cell name `{0}` already exists")]
    CellNameAlreadyExists(String),
    #[error("node name `{0}` already exists")]
    NodeNameAlreadyExists(String),
    #[error("cell `{0}` is already drained by a downstream junction")]
    DownstreamJunctionAlreadyExists(String),
    #[error("cell `{0}` is already fed by an upstream junction")]
    UpstreamJunctionAlreadyExists(String),
    #[error("sink cell `{0}` has no sending flow and cannot feed a junction")]
    SinkFeedsJunction(String),
    #[error("source cell `{0}` has no receiving flow and cannot be fed by a junction")]
    SourceFedByJunction(String),
    #[error("junction `{name}` expects {expected_in} incoming and {expected_out} outgoing cells; found {found_in} and {found_out}")]
    JunctionArity {
        name: String,
        expected_in: usize,
        expected_out: usize,
        found_in: usize,
        found_out: usize,
    },
    #[error("initial condition for cell `{cell}` has length {found}; expected {expected}")]
    InitialConditionLength {
        cell: String,
        expected: usize,
        found: usize,
    },
    #[error("time-varying boundary speed (length {speed}) and boundary capacity (length {capacity}) must have the same length")]
    BoundarySeriesLengthMismatch { speed: usize, capacity: usize },
    #[error("per-scenario profile has length {found}; expected {expected}")]
    ProfileScenarioLength { expected: usize, found: usize },
    #[error("per-timestep profile has length {found}; expected {expected}")]
    ProfileTimestepLength { expected: usize, found: usize },
    #[error("invalid transition probability matrix: {0}")]
    InvalidTransitionMatrix(String),
    #[error("per-mode parameters have length {found}; expected one value per mode ({expected})")]
    ModeParameterLength { expected: usize, found: usize },
    #[error("expected {expected} transition matrices for the configured regime bounds; found {found}")]
    RegimeCount { expected: usize, found: usize },
    #[error("initial mode {mode} is out of range for {num_modes} modes")]
    InvalidInitialMode { mode: usize, num_modes: usize },
    #[error("scenario domain must contain at least one scenario")]
    ZeroScenarios,
    #[error("time domain must contain at least one time step")]
    ZeroTimesteps,
    #[error("time step size must be positive; found {0}")]
    TimestepSizeNotPositive(f64),
}
