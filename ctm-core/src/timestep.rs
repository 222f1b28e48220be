use crate::CtmError;

type TimestepIndex = usize;

/// A single discrete time step of the simulation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Timestep {
    pub index: TimestepIndex,
    /// Duration of the step in model time units.
    pub duration: f64,
}

impl Timestep {
    pub fn new(index: TimestepIndex, duration: f64) -> Self {
        Self { index, duration }
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }
}

/// Generates the fixed sequence of time steps a model is simulated over.
#[derive(Debug, Clone)]
pub struct Timestepper {
    num_steps: usize,
    duration: f64,
}

impl Timestepper {
    pub fn new(num_steps: usize, duration: f64) -> Self {
        Self { num_steps, duration }
    }

    fn timesteps(&self) -> Vec<Timestep> {
        (0..self.num_steps).map(|index| Timestep::new(index, self.duration)).collect()
    }
}

/// The time domain that a model will be simulated over.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDomain {
    timesteps: Vec<Timestep>,
}

impl TimeDomain {
    pub fn timesteps(&self) -> &[Timestep] {
        &self.timesteps
    }

    /// The duration of each time step.
    ///
    /// All steps share the same duration; it is fixed by the [`Timestepper`].
    pub fn step_duration(&self) -> f64 {
        self.timesteps[0].duration
    }

    /// The total number of time steps in the domain.
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }
}

impl TryFrom<Timestepper> for TimeDomain {
    type Error = CtmError;

    fn try_from(value: Timestepper) -> Result<Self, Self::Error> {
        if value.num_steps == 0 {
            return Err(CtmError::ZeroTimesteps);
        }
        if value.duration <= 0.0 {
            return Err(CtmError::TimestepSizeNotPositive(value.duration));
        }
        Ok(Self {
            timesteps: value.timesteps(),
        })
    }
}
