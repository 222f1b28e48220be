//! Helpers for building the small networks used across the test suite.
use crate::cell::CellParameters;
use crate::control::Controller;
use crate::flows::{
    BoundaryInflow, BoundaryOutflow, BufferSendingFlow, PiecewiseLinearReceivingFlow, PiecewiseLinearSendingFlow,
    Profile, UnboundedReceivingFlow,
};
use crate::models::ModelDomain;
use crate::network::Network;
use crate::scenario::ScenarioDomain;
use crate::timestep::Timestepper;

/// A domain of `num_steps` unit steps over `state_len` scenarios.
pub fn default_domain(num_steps: usize, state_len: usize) -> ModelDomain {
    let time = Timestepper::new(num_steps, 1.0).try_into().unwrap();
    let scenarios = ScenarioDomain::new(state_len).unwrap();
    ModelDomain::new(time, scenarios)
}

/// A three-cell corridor `source -> link -> sink` joined by the basic
/// junctions `upstream` and `downstream`.
///
/// The source injects a constant demand of 50 through an unlimited buffer.
/// The link has free-flow speed 1, congestion wave speed 1, capacity 50,
/// maximum density 150 and an initial density of 10. The sink is unbounded.
pub fn simple_corridor() -> Network {
    let mut network = Network::default();
    let source = network
        .add_source_cell(
            "source",
            CellParameters::default(),
            0.0.into(),
            Box::new(BoundaryInflow::new(50.0)),
            Box::new(BufferSendingFlow::new(50.0)),
        )
        .unwrap();
    let link = network
        .add_link_cell(
            "link",
            CellParameters {
                max_density: 150.0,
                ..Default::default()
            },
            10.0.into(),
            Box::new(PiecewiseLinearSendingFlow::new(1.0, 50.0)),
            Box::new(PiecewiseLinearReceivingFlow::new(1.0, 150.0)),
        )
        .unwrap();
    let sink = network
        .add_sink_cell(
            "sink",
            CellParameters::default(),
            0.0.into(),
            Box::new(UnboundedReceivingFlow),
            Box::new(BoundaryOutflow::new(1.0, f64::INFINITY).unwrap()),
        )
        .unwrap();
    network.add_basic_junction("upstream", source, link, None).unwrap();
    network.add_basic_junction("downstream", link, sink, None).unwrap();
    network
}

/// A freeway with an on-ramp: `mainline-in` and `onramp` merge at the
/// `ramp` junction into `mainline-out` with an `offramp` taking 20% of the
/// mainline demand. The junction's controller, when given, meters the
/// on-ramp flow.
pub fn ramp_corridor(controller: Option<Box<dyn Controller>>) -> Network {
    let mut network = Network::default();
    let mainline_in = network
        .add_source_cell(
            "mainline-in",
            CellParameters::default(),
            0.0.into(),
            Box::new(BoundaryInflow::new(40.0)),
            Box::new(BufferSendingFlow::new(40.0)),
        )
        .unwrap();
    let onramp = network
        .add_source_cell(
            "onramp",
            CellParameters::default(),
            0.0.into(),
            Box::new(BoundaryInflow::new(20.0)),
            Box::new(BufferSendingFlow::new(20.0)),
        )
        .unwrap();
    let mainline_out = network
        .add_link_cell(
            "mainline-out",
            CellParameters {
                max_density: 150.0,
                ..Default::default()
            },
            0.0.into(),
            Box::new(PiecewiseLinearSendingFlow::new(1.0, 60.0)),
            Box::new(PiecewiseLinearReceivingFlow::new(1.0, 150.0)),
        )
        .unwrap();
    let offramp = network
        .add_sink_cell(
            "offramp",
            CellParameters::default(),
            0.0.into(),
            Box::new(UnboundedReceivingFlow),
            Box::new(BoundaryOutflow::new(1.0, f64::INFINITY).unwrap()),
        )
        .unwrap();
    let sink = network
        .add_sink_cell(
            "sink",
            CellParameters::default(),
            0.0.into(),
            Box::new(UnboundedReceivingFlow),
            Box::new(BoundaryOutflow::new(1.0, f64::INFINITY).unwrap()),
        )
        .unwrap();

    network
        .add_ramp_junction(
            "ramp",
            [mainline_in, onramp],
            [mainline_out, offramp],
            Profile::Scalar(1.0),
            [Profile::Scalar(0.8), Profile::Scalar(0.2)],
            controller,
        )
        .unwrap();
    network.add_basic_junction("exit", mainline_out, sink, None).unwrap();
    network
}
