use crate::state::ScenarioVector;
use crate::timestep::Timestep;
use crate::CtmError;
use ndarray::Array2;

/// A numeric flow parameter that may be constant, per-scenario, time-varying,
/// or both.
///
/// Every variant broadcasts to one value per scenario when evaluated at a
/// time step. Lengths are validated against the run dimensions during
/// network setup.
#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    /// A single value broadcast to all scenarios and steps.
    Scalar(f64),
    /// One value per scenario, constant in time. Length must equal the
    /// scenario count.
    PerScenario(Vec<f64>),
    /// One value per time step, broadcast to all scenarios. Length must
    /// equal the step count.
    PerTimestep(Vec<f64>),
    /// One value per scenario per time step, shape `[state_len, num_steps]`.
    PerScenarioPerTimestep(Array2<f64>),
}

impl From<f64> for Profile {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f64>> for Profile {
    fn from(values: Vec<f64>) -> Self {
        Self::PerScenario(values)
    }
}

impl Profile {
    /// The length of the time dimension, if this profile is time-varying.
    pub fn num_steps(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) | Self::PerScenario(_) => None,
            Self::PerTimestep(values) => Some(values.len()),
            Self::PerScenarioPerTimestep(values) => Some(values.ncols()),
        }
    }

    pub fn is_time_varying(&self) -> bool {
        self.num_steps().is_some()
    }

    pub(crate) fn validate(&self, state_len: usize, num_steps: usize) -> Result<(), CtmError> {
        match self {
            Self::Scalar(_) => Ok(()),
            Self::PerScenario(values) => {
                if values.len() != state_len {
                    return Err(CtmError::ProfileScenarioLength {
                        expected: state_len,
                        found: values.len(),
                    });
                }
                Ok(())
            }
            Self::PerTimestep(values) => {
                if values.len() != num_steps {
                    return Err(CtmError::ProfileTimestepLength {
                        expected: num_steps,
                        found: values.len(),
                    });
                }
                Ok(())
            }
            Self::PerScenarioPerTimestep(values) => {
                if values.nrows() != state_len {
                    return Err(CtmError::ProfileScenarioLength {
                        expected: state_len,
                        found: values.nrows(),
                    });
                }
                if values.ncols() != num_steps {
                    return Err(CtmError::ProfileTimestepLength {
                        expected: num_steps,
                        found: values.ncols(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Evaluate the profile at a time step, broadcast to all scenarios.
    pub fn value(&self, timestep: &Timestep, state_len: usize) -> ScenarioVector {
        match self {
            Self::Scalar(value) => ScenarioVector::from_elem(state_len, *value),
            Self::PerScenario(values) => ScenarioVector::from_vec(values.clone()),
            Self::PerTimestep(values) => ScenarioVector::from_elem(state_len, values[timestep.index]),
            Self::PerScenarioPerTimestep(values) => values.column(timestep.index).to_owned(),
        }
    }
}
