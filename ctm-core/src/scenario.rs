use crate::CtmError;

/// The scenario domain over which a model is simulated.
///
/// Scenarios are independent parallel instances of the same topology that
/// vary only in their initial and boundary data. They are advanced in
/// lockstep and never read each other's state, so every quantity in the
/// engine is a vector with one entry per scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDomain {
    len: usize,
}

impl Default for ScenarioDomain {
    fn default() -> Self {
        Self { len: 1 }
    }
}

impl ScenarioDomain {
    pub fn new(len: usize) -> Result<Self, CtmError> {
        if len == 0 {
            return Err(CtmError::ZeroScenarios);
        }
        Ok(Self { len })
    }

    /// The number of scenarios in the domain.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
