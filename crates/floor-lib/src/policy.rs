//! Scaling policy
//!
//! Two tiers, evaluated once per controller tick:
//! 1. Floor enforcement: any resource below its minimum is pushed up and
//!    target shaping is skipped for the whole tick.
//! 2. Target adjustment: with every floor satisfied, resources outside the
//!    deadband around their reference are moved toward it.
//!
//! Both tiers sit behind a cooldown gate keyed on the direction of the
//! last action.

use crate::models::{Readings, Resource};
use crate::pools::{CPU_DEADBAND, MEMORY_DEADBAND, NETWORK_DEADBAND};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Headroom added above a CPU or memory floor when enforcing it
pub const FLOOR_HEADROOM_PERCENT: f64 = 10.0;

/// Headroom added above the network floor when enforcing it
pub const FLOOR_HEADROOM_MBPS: f64 = 5.0;

/// Immutable thresholds driving every decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub target_cpu_percent: f64,
    pub target_memory_percent: f64,
    pub min_cpu_p95_percent: f64,
    pub min_memory_percent: f64,
    pub min_network_mbps: f64,
    pub memory_enforcement: bool,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            target_cpu_percent: 80.0,
            target_memory_percent: 80.0,
            min_cpu_p95_percent: 20.0,
            min_memory_percent: 20.0,
            min_network_mbps: 20.0,
            memory_enforcement: true,
            scale_up_cooldown: Duration::from_secs(60),
            scale_down_cooldown: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Last action time and direction, used for cooldown gating
#[derive(Debug, Clone, Copy)]
pub struct ScalingState {
    last_action: Option<Instant>,
    direction: Direction,
}

impl Default for ScalingState {
    fn default() -> Self {
        Self {
            last_action: None,
            direction: Direction::Down,
        }
    }
}

impl ScalingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn last_action(&self) -> Option<Instant> {
        self.last_action
    }

    pub fn record(&mut self, direction: Direction, now: Instant) {
        self.direction = direction;
        self.last_action = Some(now);
    }

    /// Time left before another action is allowed, if any
    pub fn cooldown_remaining(&self, thresholds: &Thresholds, now: Instant) -> Option<Duration> {
        let last = self.last_action?;
        let cooldown = match self.direction {
            Direction::Up => thresholds.scale_up_cooldown,
            Direction::Down => thresholds.scale_down_cooldown,
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed < cooldown {
            Some(cooldown - elapsed)
        } else {
            None
        }
    }
}

/// Instruction for one pool: move toward `target` from `current`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub resource: Resource,
    pub target: f64,
    pub current: f64,
}

impl Adjustment {
    pub fn new(resource: Resource, target: f64, current: f64) -> Self {
        Self {
            resource,
            target,
            current,
        }
    }
}

/// Outcome of evaluating one tick
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The last action is still within its cooldown
    CoolingDown { remaining: Duration },
    /// At least one floor is violated; target shaping is skipped
    EnforceFloors(Vec<Adjustment>),
    /// Floors hold; move deviating resources toward their reference
    Adjust {
        direction: Direction,
        adjustments: Vec<Adjustment>,
    },
    /// Everything is inside its band
    Hold,
}

impl Decision {
    pub fn adjustments(&self) -> &[Adjustment] {
        match self {
            Decision::EnforceFloors(adjustments) => adjustments,
            Decision::Adjust { adjustments, .. } => adjustments,
            Decision::CoolingDown { .. } | Decision::Hold => &[],
        }
    }

    /// Direction to record after applying, if this decision acts
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Decision::EnforceFloors(_) => Some(Direction::Up),
            Decision::Adjust { direction, .. } => Some(*direction),
            Decision::CoolingDown { .. } | Decision::Hold => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::CoolingDown { .. } => "cooling_down",
            Decision::EnforceFloors(_) => "enforce_floors",
            Decision::Adjust { .. } => "adjust",
            Decision::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    thresholds: Thresholds,
}

impl ScalingPolicy {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Decide what to do this tick. Does not mutate `state`.
    pub fn decide(&self, readings: &Readings, state: &ScalingState, now: Instant) -> Decision {
        if let Some(remaining) = state.cooldown_remaining(&self.thresholds, now) {
            return Decision::CoolingDown { remaining };
        }

        let floors = self.floor_violations(readings);
        if !floors.is_empty() {
            return Decision::EnforceFloors(floors);
        }

        self.target_adjustment(readings)
    }

    /// Floor checks are independent; the CPU floor is judged and driven by
    /// the 95th percentile rather than the instantaneous reading.
    fn floor_violations(&self, readings: &Readings) -> Vec<Adjustment> {
        let t = &self.thresholds;
        let mut adjustments = Vec::new();

        if readings.cpu_p95 < t.min_cpu_p95_percent {
            adjustments.push(Adjustment::new(
                Resource::Cpu,
                t.min_cpu_p95_percent + FLOOR_HEADROOM_PERCENT,
                readings.cpu_p95,
            ));
        }

        if t.memory_enforcement && readings.memory_percent < t.min_memory_percent {
            adjustments.push(Adjustment::new(
                Resource::Memory,
                t.min_memory_percent + FLOOR_HEADROOM_PERCENT,
                readings.memory_percent,
            ));
        }

        if readings.network_mbps < t.min_network_mbps {
            adjustments.push(Adjustment::new(
                Resource::Network,
                t.min_network_mbps + FLOOR_HEADROOM_MBPS,
                readings.network_mbps,
            ));
        }

        adjustments
    }

    fn target_adjustment(&self, readings: &Readings) -> Decision {
        let t = &self.thresholds;
        let mut adjustments = Vec::new();

        if (readings.cpu_percent - t.target_cpu_percent).abs() > CPU_DEADBAND {
            adjustments.push(Adjustment::new(
                Resource::Cpu,
                t.target_cpu_percent,
                readings.cpu_percent,
            ));
        }

        if t.memory_enforcement
            && (readings.memory_percent - t.target_memory_percent).abs() > MEMORY_DEADBAND
        {
            adjustments.push(Adjustment::new(
                Resource::Memory,
                t.target_memory_percent,
                readings.memory_percent,
            ));
        }

        // The network has no separate target; its floor is the reference
        if (readings.network_mbps - t.min_network_mbps).abs() > NETWORK_DEADBAND {
            adjustments.push(Adjustment::new(
                Resource::Network,
                t.min_network_mbps,
                readings.network_mbps,
            ));
        }

        if adjustments.is_empty() {
            return Decision::Hold;
        }

        let below_reference = readings.cpu_percent < t.target_cpu_percent
            || readings.memory_percent < t.target_memory_percent
            || readings.network_mbps < t.min_network_mbps;

        Decision::Adjust {
            direction: if below_reference {
                Direction::Up
            } else {
                Direction::Down
            },
            adjustments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(cpu: f64, cpu_p95: f64, memory: f64, network: f64) -> Readings {
        Readings {
            cpu_percent: cpu,
            cpu_p95,
            memory_percent: memory,
            network_mbps: network,
        }
    }

    fn resources(decision: &Decision) -> Vec<Resource> {
        decision.adjustments().iter().map(|a| a.resource).collect()
    }

    #[test]
    fn test_all_below_minimum_enforces_every_floor() {
        let policy = ScalingPolicy::new(Thresholds::default());
        let decision = policy.decide(
            &readings(15.0, 15.0, 15.0, 15.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(
            decision,
            Decision::EnforceFloors(vec![
                Adjustment::new(Resource::Cpu, 30.0, 15.0),
                Adjustment::new(Resource::Memory, 30.0, 15.0),
                Adjustment::new(Resource::Network, 25.0, 15.0),
            ])
        );
        assert_eq!(decision.direction(), Some(Direction::Up));
    }

    #[test]
    fn test_cpu_p95_floor_skips_target_shaping() {
        let policy = ScalingPolicy::new(Thresholds::default());
        // Memory is far above target but only the CPU floor is acted on
        let decision = policy.decide(
            &readings(60.0, 18.0, 95.0, 25.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(
            decision,
            Decision::EnforceFloors(vec![Adjustment::new(Resource::Cpu, 30.0, 18.0)])
        );
    }

    #[test]
    fn test_memory_floor_ignored_when_disabled() {
        let policy = ScalingPolicy::new(Thresholds {
            memory_enforcement: false,
            ..Thresholds::default()
        });
        let decision = policy.decide(
            &readings(80.0, 80.0, 5.0, 20.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(decision, Decision::Hold);
    }

    #[test]
    fn test_at_target_holds() {
        let policy = ScalingPolicy::new(Thresholds::default());
        let decision = policy.decide(
            &readings(80.0, 80.0, 80.0, 20.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(decision, Decision::Hold);
        assert!(decision.direction().is_none());
    }

    #[test]
    fn test_above_minimum_below_target_scales_up() {
        let policy = ScalingPolicy::new(Thresholds::default());
        let decision = policy.decide(
            &readings(25.0, 25.0, 25.0, 25.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(resources(&decision), vec![Resource::Cpu, Resource::Memory]);
        assert_eq!(decision.direction(), Some(Direction::Up));
    }

    #[test]
    fn test_above_target_scales_down() {
        let policy = ScalingPolicy::new(Thresholds::default());
        let decision = policy.decide(
            &readings(95.0, 95.0, 95.0, 40.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(
            decision,
            Decision::Adjust {
                direction: Direction::Down,
                adjustments: vec![
                    Adjustment::new(Resource::Cpu, 80.0, 95.0),
                    Adjustment::new(Resource::Memory, 80.0, 95.0),
                    Adjustment::new(Resource::Network, 20.0, 40.0),
                ],
            }
        );
    }

    #[test]
    fn test_mixed_deviation_is_tagged_up() {
        let policy = ScalingPolicy::new(Thresholds::default());
        let decision = policy.decide(
            &readings(30.0, 30.0, 95.0, 20.0),
            &ScalingState::new(),
            Instant::now(),
        );

        assert_eq!(resources(&decision), vec![Resource::Cpu, Resource::Memory]);
        assert_eq!(decision.direction(), Some(Direction::Up));
    }

    #[test]
    fn test_cooldown_blocks_then_releases() {
        let thresholds = Thresholds::default();
        let policy = ScalingPolicy::new(thresholds.clone());
        let low = readings(15.0, 15.0, 15.0, 15.0);
        let t0 = Instant::now();

        let mut state = ScalingState::new();
        let first = policy.decide(&low, &state, t0);
        state.record(first.direction().unwrap(), t0);

        let blocked = policy.decide(&low, &state, t0 + Duration::from_secs(30));
        assert_eq!(
            blocked,
            Decision::CoolingDown {
                remaining: Duration::from_secs(30)
            }
        );

        let released = policy.decide(&low, &state, t0 + thresholds.scale_up_cooldown);
        assert!(matches!(released, Decision::EnforceFloors(_)));
    }

    #[test]
    fn test_scale_down_uses_its_own_cooldown() {
        let thresholds = Thresholds::default();
        let policy = ScalingPolicy::new(thresholds.clone());
        let high = readings(95.0, 95.0, 95.0, 40.0);
        let t0 = Instant::now();

        let mut state = ScalingState::new();
        state.record(Direction::Down, t0);

        let after_up_window = t0 + thresholds.scale_up_cooldown;
        assert!(matches!(
            policy.decide(&high, &state, after_up_window),
            Decision::CoolingDown { .. }
        ));

        let after_down_window = t0 + thresholds.scale_down_cooldown;
        assert!(matches!(
            policy.decide(&high, &state, after_down_window),
            Decision::Adjust { .. }
        ));
    }

    #[test]
    fn test_fresh_state_is_never_gated() {
        let state = ScalingState::new();
        assert!(state
            .cooldown_remaining(&Thresholds::default(), Instant::now())
            .is_none());
        assert_eq!(state.direction(), Direction::Down);
    }
}
