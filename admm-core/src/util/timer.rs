use std::time::{Duration, Instant};

use serde_json::{Map, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Load,
    Precheck,
    Solve,
    Prove,
    Score,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Precheck => "precheck",
            Phase::Solve => "solve",
            Phase::Prove => "prove",
            Phase::Score => "score",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PhaseTimers {
    pub load: Duration,
    pub precheck: Duration,
    pub solve: Duration,
    pub prove: Duration,
    pub score: Duration,
}

impl PhaseTimers {
    pub fn scoped(&mut self, phase: Phase) -> PhaseGuard<'_> {
        PhaseGuard { phase, start: Instant::now(), timers: self }
    }

    pub fn add(&mut self, phase: Phase, dt: Duration) {
        match phase {
            Phase::Load => self.load += dt,
            Phase::Precheck => self.precheck += dt,
            Phase::Solve => self.solve += dt,
            Phase::Prove => self.prove += dt,
            Phase::Score => self.score += dt,
        }
    }

    pub fn get(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Load => self.load,
            Phase::Precheck => self.precheck,
            Phase::Solve => self.solve,
            Phase::Prove => self.prove,
            Phase::Score => self.score,
        }
    }

    /// Seconds per phase, for the `timings` artifact.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for phase in [Phase::Load, Phase::Precheck, Phase::Solve, Phase::Prove, Phase::Score] {
            map.insert(phase.as_str().to_string(), Value::from(self.get(phase).as_secs_f64()));
        }
        Value::Object(map)
    }
}

pub struct PhaseGuard<'a> {
    phase: Phase,
    start: Instant,
    timers: &'a mut PhaseTimers,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.timers.add(self.phase, self.start.elapsed());
    }
}
