use crate::cell::CellIndex;
use crate::control::Controller;
use crate::flows::Profile;
use crate::state::ScenarioVector;
use crate::timestep::Timestep;
use crate::utils::{median3, safe_div, vmin};
use crate::CtmError;
use ndarray::{Array3, Axis, Zip};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }
}

impl Deref for NodeIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct NodeMeta {
    pub index: NodeIndex,
    pub name: String,
}

/// Identity, connectivity and optional controller common to every junction
/// variant.
pub struct NodeCore {
    meta: NodeMeta,
    incoming: Vec<CellIndex>,
    outgoing: Vec<CellIndex>,
    controller: Option<Box<dyn Controller>>,
}

impl NodeCore {
    fn new(
        index: NodeIndex,
        name: &str,
        incoming: Vec<CellIndex>,
        outgoing: Vec<CellIndex>,
        controller: Option<Box<dyn Controller>>,
    ) -> Self {
        Self {
            meta: NodeMeta {
                index,
                name: name.to_string(),
            },
            incoming,
            outgoing,
            controller,
        }
    }
}

/// A 1-to-1 junction: `flow = min(sending, receiving)`.
pub struct BasicJunction {
    core: NodeCore,
}

/// A 2-to-1 merge with per-scenario priorities.
///
/// When the combined demand fits, each flow equals its own sending flow.
/// Under contention each flow is the median of its sending flow, the
/// receiving capacity left by the other demand, and its priority share of
/// the receiving capacity. Priorities are normalized to sum to one at
/// resolution time, which keeps the contended flows summing exactly to the
/// receiving capacity.
pub struct TwoToOneMergeJunction {
    core: NodeCore,
    merging_priority: [Profile; 2],
}

/// A 1-to-2 diverge with split ratios.
///
/// Without FIFO each branch is capacity-limited independently and the
/// branches may desynchronise. With FIFO a single bottleneck total flow is
/// shared in the fixed ratio, trading efficiency for order preservation.
pub struct OneToTwoDivergeJunction {
    core: NodeCore,
    split_ratio: [Profile; 2],
    fifo: bool,
}

/// A 2-to-2 freeway junction: mainline and on-ramp in, mainline and
/// off-ramp out. An attached controller meters the on-ramp.
pub struct FreewayRampJunction {
    core: NodeCore,
    onramp_priority: Profile,
    /// Split of the mainline demand: `[to_mainline, to_offramp]`.
    split_ratio: [Profile; 2],
}

pub enum Node {
    Basic(BasicJunction),
    Merge(TwoToOneMergeJunction),
    Diverge(OneToTwoDivergeJunction),
    Ramp(FreewayRampJunction),
}

impl Node {
    fn core(&self) -> &NodeCore {
        match self {
            Self::Basic(node) => &node.core,
            Self::Merge(node) => &node.core,
            Self::Diverge(node) => &node.core,
            Self::Ramp(node) => &node.core,
        }
    }

    pub fn name(&self) -> &str {
        &self.core().meta.name
    }

    pub fn index(&self) -> NodeIndex {
        self.core().meta.index
    }

    pub fn incoming_cells(&self) -> &[CellIndex] {
        &self.core().incoming
    }

    pub fn outgoing_cells(&self) -> &[CellIndex] {
        &self.core().outgoing
    }

    pub fn controller(&self) -> Option<&dyn Controller> {
        self.core().controller.as_deref()
    }

    pub(crate) fn validate(&self, state_len: usize, num_steps: usize) -> Result<(), CtmError> {
        match self {
            Self::Basic(_) => Ok(()),
            Self::Merge(node) => {
                for priority in &node.merging_priority {
                    priority.validate(state_len, num_steps)?;
                }
                Ok(())
            }
            Self::Diverge(node) => {
                for ratio in &node.split_ratio {
                    ratio.validate(state_len, num_steps)?;
                }
                Ok(())
            }
            Self::Ramp(node) => {
                node.onramp_priority.validate(state_len, num_steps)?;
                for ratio in &node.split_ratio {
                    ratio.validate(state_len, num_steps)?;
                }
                Ok(())
            }
        }
    }

    /// Resolve the incoming sending flows and outgoing receiving flows into
    /// conservation-respecting inter-cell flows, indexed by
    /// `[incoming, outgoing, scenario]`.
    pub(crate) fn resolve(
        &self,
        timestep: &Timestep,
        sending: &[&ScenarioVector],
        receiving: &[&ScenarioVector],
        control_input: Option<&ScenarioVector>,
        state_len: usize,
    ) -> Array3<f64> {
        match self {
            Self::Basic(_) => {
                let mut flows = Array3::zeros((1, 1, state_len));
                flows
                    .index_axis_mut(Axis(0), 0)
                    .index_axis_mut(Axis(0), 0)
                    .assign(&vmin(sending[0], receiving[0]));
                flows
            }
            Self::Merge(node) => node.resolve(timestep, sending, receiving, state_len),
            Self::Diverge(node) => node.resolve(timestep, sending, receiving, state_len),
            Self::Ramp(node) => node.resolve(timestep, sending, receiving, control_input, state_len),
        }
    }
}

impl TwoToOneMergeJunction {
    fn resolve(
        &self,
        timestep: &Timestep,
        sending: &[&ScenarioVector],
        receiving: &[&ScenarioVector],
        state_len: usize,
    ) -> Array3<f64> {
        let (sending_0, sending_1) = (sending[0], sending[1]);
        let receiving_0 = receiving[0];

        let priority_0 = self.merging_priority[0].value(timestep, state_len);
        let priority_1 = self.merging_priority[1].value(timestep, state_len);

        // Normalize so the contended flows share the receiving capacity
        // exactly; equal zero priorities fall back to an even split.
        let total_priority = &priority_0 + &priority_1;
        let share_0 = safe_div(&priority_0, &total_priority, 0.5);
        let share_1 = safe_div(&priority_1, &total_priority, 0.5);

        let contended_0 = median3(sending_0, &(receiving_0 - sending_1), &(&share_0 * receiving_0));
        let contended_1 = median3(sending_1, &(receiving_0 - sending_0), &(&share_1 * receiving_0));

        let pick = |own: &ScenarioVector, other: &ScenarioVector, contended: &ScenarioVector| {
            Zip::from(own)
                .and(other)
                .and(receiving_0)
                .and(contended)
                .map_collect(|&own, &other, &receiving, &contended| {
                    if own + other <= receiving {
                        own
                    } else {
                        contended
                    }
                })
        };

        let mut flows = Array3::zeros((2, 1, state_len));
        flows
            .index_axis_mut(Axis(0), 0)
            .index_axis_mut(Axis(0), 0)
            .assign(&pick(sending_0, sending_1, &contended_0));
        flows
            .index_axis_mut(Axis(0), 1)
            .index_axis_mut(Axis(0), 0)
            .assign(&pick(sending_1, sending_0, &contended_1));
        flows
    }
}

impl OneToTwoDivergeJunction {
    fn resolve(
        &self,
        timestep: &Timestep,
        sending: &[&ScenarioVector],
        receiving: &[&ScenarioVector],
        state_len: usize,
    ) -> Array3<f64> {
        let sending_0 = sending[0];
        let (receiving_0, receiving_1) = (receiving[0], receiving[1]);

        let ratio_0 = self.split_ratio[0].value(timestep, state_len);
        let ratio_1 = self.split_ratio[1].value(timestep, state_len);

        let (flow_0, flow_1) = if self.fifo {
            let total = vmin(
                &vmin(sending_0, &safe_div(receiving_0, &ratio_0, f64::INFINITY)),
                &safe_div(receiving_1, &ratio_1, f64::INFINITY),
            );
            (&ratio_0 * &total, &ratio_1 * &total)
        } else {
            (
                vmin(&(&ratio_0 * sending_0), receiving_0),
                vmin(&(&ratio_1 * sending_0), receiving_1),
            )
        };

        let mut flows = Array3::zeros((1, 2, state_len));
        flows
            .index_axis_mut(Axis(0), 0)
            .index_axis_mut(Axis(0), 0)
            .assign(&flow_0);
        flows
            .index_axis_mut(Axis(0), 0)
            .index_axis_mut(Axis(0), 1)
            .assign(&flow_1);
        flows
    }
}

impl FreewayRampJunction {
    fn resolve(
        &self,
        timestep: &Timestep,
        sending: &[&ScenarioVector],
        receiving: &[&ScenarioVector],
        control_input: Option<&ScenarioVector>,
        state_len: usize,
    ) -> Array3<f64> {
        let (sending_mainline, sending_onramp) = (sending[0], sending[1]);
        let (receiving_mainline, receiving_offramp) = (receiving[0], receiving[1]);

        let priority_onramp = self.onramp_priority.value(timestep, state_len);
        let split_to_mainline = self.split_ratio[0].value(timestep, state_len);
        let split_to_offramp = self.split_ratio[1].value(timestep, state_len);

        // On-ramp to mainline, metered by the controller when attached.
        let mut flow_onramp_to_mainline = vmin(sending_onramp, receiving_mainline);
        if let Some(control_input) = control_input {
            flow_onramp_to_mainline = vmin(&flow_onramp_to_mainline, control_input);
        }

        // Mainline to mainline: FIFO-diverge-limited sending, reduced by the
        // receiving capacity reserved for the on-ramp.
        let sending_mainline_to_mainline = &split_to_mainline
            * &vmin(
                sending_mainline,
                &safe_div(receiving_offramp, &split_to_offramp, f64::INFINITY),
            );
        let flow_mainline_to_mainline = vmin(
            &sending_mainline_to_mainline,
            &(receiving_mainline - &(&priority_onramp * &flow_onramp_to_mainline)),
        );

        // Mainline to off-ramp: scale back through the split ratio, falling
        // back to the direct bound where the mainline share is exactly zero.
        let scaled = &flow_mainline_to_mainline * &safe_div(&split_to_offramp, &split_to_mainline, f64::INFINITY);
        let fallback = vmin(sending_mainline, receiving_offramp);
        let flow_mainline_to_offramp = Zip::from(&split_to_mainline)
            .and(&scaled)
            .and(&fallback)
            .map_collect(|&split, &scaled, &fallback| if split != 0.0 { scaled } else { fallback });

        let mut flows = Array3::zeros((2, 2, state_len));
        flows
            .index_axis_mut(Axis(0), 0)
            .index_axis_mut(Axis(0), 0)
            .assign(&flow_mainline_to_mainline);
        flows
            .index_axis_mut(Axis(0), 0)
            .index_axis_mut(Axis(0), 1)
            .assign(&flow_mainline_to_offramp);
        flows
            .index_axis_mut(Axis(0), 1)
            .index_axis_mut(Axis(0), 0)
            .assign(&flow_onramp_to_mainline);
        flows
    }
}

/// Arena of all junction nodes in a network.
#[derive(Default)]
pub struct NodeVec {
    nodes: Vec<Node>,
}

impl Deref for NodeVec {
    type Target = Vec<Node>;

    fn deref(&self) -> &Self::Target {
        &self.nodes
    }
}

impl DerefMut for NodeVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.nodes
    }
}

fn check_arity(
    name: &str,
    incoming: &[CellIndex],
    outgoing: &[CellIndex],
    expected_in: usize,
    expected_out: usize,
) -> Result<(), CtmError> {
    if incoming.len() != expected_in || outgoing.len() != expected_out {
        return Err(CtmError::JunctionArity {
            name: name.to_string(),
            expected_in,
            expected_out,
            found_in: incoming.len(),
            found_out: outgoing.len(),
        });
    }
    Ok(())
}

impl NodeVec {
    pub fn get(&self, index: &NodeIndex) -> Result<&Node, CtmError> {
        self.nodes.get(index.0).ok_or(CtmError::NodeIndexNotFound(*index))
    }

    pub fn get_mut(&mut self, index: &NodeIndex) -> Result<&mut Node, CtmError> {
        self.nodes.get_mut(index.0).ok_or(CtmError::NodeIndexNotFound(*index))
    }

    pub(crate) fn push_basic(
        &mut self,
        name: &str,
        incoming: Vec<CellIndex>,
        outgoing: Vec<CellIndex>,
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        check_arity(name, &incoming, &outgoing, 1, 1)?;
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(Node::Basic(BasicJunction {
            core: NodeCore::new(index, name, incoming, outgoing, controller),
        }));
        Ok(index)
    }

    pub(crate) fn push_merge(
        &mut self,
        name: &str,
        incoming: Vec<CellIndex>,
        outgoing: Vec<CellIndex>,
        merging_priority: [Profile; 2],
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        check_arity(name, &incoming, &outgoing, 2, 1)?;
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(Node::Merge(TwoToOneMergeJunction {
            core: NodeCore::new(index, name, incoming, outgoing, controller),
            merging_priority,
        }));
        Ok(index)
    }

    pub(crate) fn push_diverge(
        &mut self,
        name: &str,
        incoming: Vec<CellIndex>,
        outgoing: Vec<CellIndex>,
        split_ratio: [Profile; 2],
        fifo: bool,
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        check_arity(name, &incoming, &outgoing, 1, 2)?;
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(Node::Diverge(OneToTwoDivergeJunction {
            core: NodeCore::new(index, name, incoming, outgoing, controller),
            split_ratio,
            fifo,
        }));
        Ok(index)
    }

    pub(crate) fn push_ramp(
        &mut self,
        name: &str,
        incoming: Vec<CellIndex>,
        outgoing: Vec<CellIndex>,
        onramp_priority: Profile,
        split_ratio: [Profile; 2],
        controller: Option<Box<dyn Controller>>,
    ) -> Result<NodeIndex, CtmError> {
        check_arity(name, &incoming, &outgoing, 2, 2)?;
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(Node::Ramp(FreewayRampJunction {
            core: NodeCore::new(index, name, incoming, outgoing, controller),
            onramp_priority,
            split_ratio,
        }));
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::NodeVec;
    use crate::cell::CellIndex;
    use crate::flows::Profile;
    use crate::timestep::Timestep;
    use crate::CtmError;
    use float_cmp::assert_approx_eq;
    use ndarray::array;

    fn cells(n: usize) -> Vec<CellIndex> {
        (0..n).map(CellIndex::new).collect()
    }

    #[test]
    fn test_arity_validation() {
        let mut nodes = NodeVec::default();

        let result = nodes.push_basic("junction", cells(2), cells(1), None);
        assert_eq!(
            result.err(),
            Some(CtmError::JunctionArity {
                name: "junction".to_string(),
                expected_in: 1,
                expected_out: 1,
                found_in: 2,
                found_out: 1,
            })
        );

        assert!(nodes.push_merge("merge", cells(1), cells(1), [Profile::Scalar(0.5), Profile::Scalar(0.5)], None).is_err());
        assert!(nodes.push_diverge("diverge", cells(1), cells(1), [Profile::Scalar(0.5), Profile::Scalar(0.5)], true, None).is_err());
        assert!(nodes.push_ramp("ramp", cells(2), cells(1), Profile::Scalar(1.0), [Profile::Scalar(0.8), Profile::Scalar(0.2)], None).is_err());
    }

    #[test]
    fn test_basic_junction_resolution() {
        let mut nodes = NodeVec::default();
        let index = nodes.push_basic("junction", cells(1), cells(1), None).unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending = array![30.0, 80.0];
        let receiving = array![50.0, 50.0];

        let flows = node.resolve(&timestep, &[&sending], &[&receiving], None, 2);
        assert_eq!(flows[[0, 0, 0]], 30.0);
        assert_eq!(flows[[0, 0, 1]], 50.0);
    }

    #[test]
    fn test_merge_passes_demand_when_space_is_enough() {
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_merge(
                "merge",
                cells(2),
                vec![CellIndex::new(2)],
                [Profile::Scalar(0.7), Profile::Scalar(0.3)],
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending_0 = array![10.0];
        let sending_1 = array![20.0];
        let receiving = array![50.0];

        let flows = node.resolve(&timestep, &[&sending_0, &sending_1], &[&receiving], None, 1);
        assert_eq!(flows[[0, 0, 0]], 10.0);
        assert_eq!(flows[[1, 0, 0]], 20.0);
    }

    #[test]
    fn test_merge_contention_respects_receiving_capacity() {
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_merge(
                "merge",
                cells(2),
                vec![CellIndex::new(2)],
                [Profile::Scalar(0.7), Profile::Scalar(0.3)],
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending_0 = array![50.0];
        let sending_1 = array![40.0];
        let receiving = array![60.0];

        let flows = node.resolve(&timestep, &[&sending_0, &sending_1], &[&receiving], None, 1);
        let flow_0 = flows[[0, 0, 0]];
        let flow_1 = flows[[1, 0, 0]];

        // median(50, 20, 42) = 42, median(40, 10, 18) = 18.
        assert_approx_eq!(f64, flow_0, 42.0);
        assert_approx_eq!(f64, flow_1, 18.0);
        assert_approx_eq!(f64, flow_0 + flow_1, 60.0);
    }

    #[test]
    fn test_merge_equal_priorities_split_evenly() {
        // Priorities [1, 1] normalize to an even share.
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_merge(
                "merge",
                cells(2),
                vec![CellIndex::new(2)],
                [Profile::Scalar(1.0), Profile::Scalar(1.0)],
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending = array![40.0];
        let receiving = array![60.0];

        let flows = node.resolve(&timestep, &[&sending, &sending], &[&receiving], None, 1);
        let flow_0 = flows[[0, 0, 0]];
        let flow_1 = flows[[1, 0, 0]];

        assert_approx_eq!(f64, flow_0, flow_1);
        assert_approx_eq!(f64, flow_0 + flow_1, 60.0);
    }

    #[test]
    fn test_fifo_diverge_preserves_split_ratio() {
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_diverge(
                "diverge",
                cells(1),
                vec![CellIndex::new(1), CellIndex::new(2)],
                [Profile::Scalar(0.75), Profile::Scalar(0.25)],
                true,
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending = array![100.0];
        // Branch 1 is the bottleneck: total = min(100, 90/0.75, 10/0.25) = 40.
        let receiving_0 = array![67.5];
        let receiving_1 = array![10.0];

        let flows = node.resolve(&timestep, &[&sending], &[&receiving_0, &receiving_1], None, 1);
        let flow_0 = flows[[0, 0, 0]];
        let flow_1 = flows[[0, 1, 0]];

        assert_approx_eq!(f64, flow_0, 30.0);
        assert_approx_eq!(f64, flow_1, 10.0);
        assert_approx_eq!(f64, flow_0 / flow_1, 3.0);
    }

    #[test]
    fn test_non_fifo_diverge_desynchronises() {
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_diverge(
                "diverge",
                cells(1),
                vec![CellIndex::new(1), CellIndex::new(2)],
                [Profile::Scalar(0.75), Profile::Scalar(0.25)],
                false,
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending = array![100.0];
        let receiving_0 = array![67.5];
        let receiving_1 = array![10.0];

        let flows = node.resolve(&timestep, &[&sending], &[&receiving_0, &receiving_1], None, 1);

        // Each branch is limited independently of the other's bottleneck.
        assert_approx_eq!(f64, flows[[0, 0, 0]], 67.5);
        assert_approx_eq!(f64, flows[[0, 1, 0]], 10.0);
    }

    #[test]
    fn test_ramp_metering_caps_onramp_flow() {
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_ramp(
                "ramp",
                cells(2),
                vec![CellIndex::new(2), CellIndex::new(3)],
                Profile::Scalar(1.0),
                [Profile::Scalar(0.8), Profile::Scalar(0.2)],
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending_mainline = array![50.0];
        let sending_onramp = array![30.0];
        let receiving_mainline = array![60.0];
        let receiving_offramp = array![20.0];
        let control_input = array![10.0];

        let flows = node.resolve(
            &timestep,
            &[&sending_mainline, &sending_onramp],
            &[&receiving_mainline, &receiving_offramp],
            Some(&control_input),
            1,
        );

        // On-ramp is metered down to the control input.
        assert_approx_eq!(f64, flows[[1, 0, 0]], 10.0);

        // Mainline: 0.8 * min(50, 20/0.2) = 40, capped by 60 - 1.0 * 10 = 50.
        assert_approx_eq!(f64, flows[[0, 0, 0]], 40.0);

        // Off-ramp share: 40 * 0.2 / 0.8 = 10.
        assert_approx_eq!(f64, flows[[0, 1, 0]], 10.0);
    }

    #[test]
    fn test_ramp_zero_mainline_split_fallback() {
        let mut nodes = NodeVec::default();
        let index = nodes
            .push_ramp(
                "ramp",
                cells(2),
                vec![CellIndex::new(2), CellIndex::new(3)],
                Profile::Scalar(1.0),
                [Profile::Scalar(0.0), Profile::Scalar(1.0)],
                None,
            )
            .unwrap();
        let node = nodes.get(&index).unwrap();

        let timestep = Timestep::new(0, 1.0);
        let sending_mainline = array![50.0];
        let sending_onramp = array![0.0];
        let receiving_mainline = array![60.0];
        let receiving_offramp = array![20.0];

        let flows = node.resolve(
            &timestep,
            &[&sending_mainline, &sending_onramp],
            &[&receiving_mainline, &receiving_offramp],
            None,
            1,
        );

        // All mainline demand is diverted through the direct off-ramp bound.
        assert_approx_eq!(f64, flows[[0, 0, 0]], 0.0);
        assert_approx_eq!(f64, flows[[0, 1, 0]], 20.0);
    }
}
