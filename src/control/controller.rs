//! Closed-loop curtailment state machine.
//!
//! The controller is driven by two serial event streams: device telemetry
//! ([`CurtailmentController::on_device_telemetry`]) and building meter
//! readings ([`CurtailmentController::on_meter_reading`]). All state changes
//! happen inside those handlers.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::criteria::{PointValues, Timestamp};
use crate::devices::{ClusterRegistry, CommandKey};
use crate::error::RankError;

use super::actuator::{Actuator, ScheduleRequest};

/// Scalar policy parameters. Durations are in seconds.
///
/// Read from the `[policy]` table of the agent configuration; every field
/// has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CurtailmentPolicy {
    /// Building demand (kW) above which curtailment starts.
    pub demand_limit: f64,
    /// Length of one curtailment event.
    pub curtail_duration: f64,
    /// Wait between an actuation pass and checking its effect.
    pub curtail_confirm_interval: f64,
    /// Minimum time from one event start to the next.
    pub curtail_break: f64,
    /// Extra reservation time past the event end.
    pub scheduling_buffer: f64,
    /// Zero curtail counts at event end once this much time has passed
    /// since the last reset. `None` never resets.
    pub reset_curtail_count_interval: Option<f64>,
    /// Prefix of every reservation task id.
    pub agent_id: String,
    /// Priority string sent with reservation requests.
    pub schedule_priority: String,
}

impl Default for CurtailmentPolicy {
    fn default() -> Self {
        Self {
            demand_limit: 100.0,
            curtail_duration: 900.0,
            curtail_confirm_interval: 300.0,
            curtail_break: 1800.0,
            scheduling_buffer: 15.0,
            reset_curtail_count_interval: None,
            agent_id: "load-curtail".to_string(),
            schedule_priority: "LOW".to_string(),
        }
    }
}

/// Progress within a curtailment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// An actuation pass ran; its effect is checked at `next_confirm_at`.
    AwaitingConfirm,
    /// Demand fell below the limit; holding until the event ends.
    GoalMet,
    /// Demand is still high and no candidates remain; holding.
    GoalNotMet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Curtailing(Stage),
    /// Event released; new events wait for `break_end`.
    Cooldown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Phase::Idle => "idle",
            Phase::Curtailing(Stage::AwaitingConfirm) => "curtailing/awaiting_confirm",
            Phase::Curtailing(Stage::GoalMet) => "curtailing/goal_met",
            Phase::Curtailing(Stage::GoalNotMet) => "curtailing/goal_not_met",
            Phase::Cooldown => "cooldown",
        })
    }
}

/// Read-only snapshot of controller state.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub phase: Phase,
    pub curtailed: Vec<CommandKey>,
    pub remaining: Vec<CommandKey>,
    pub scheduled: Vec<String>,
    pub curtail_end: Option<Timestamp>,
    pub next_confirm_at: Option<Timestamp>,
    pub break_end: Option<Timestamp>,
}

/// Sheds ranked commands when building demand exceeds the limit and
/// releases them when the event ends.
///
/// Generic over `A: Actuator` for static dispatch.
pub struct CurtailmentController<A: Actuator> {
    policy: CurtailmentPolicy,
    registry: ClusterRegistry,
    actuator: A,
    phase: Phase,
    curtail_end: Option<Timestamp>,
    next_confirm_at: Option<Timestamp>,
    break_end: Option<Timestamp>,
    scheduled: BTreeSet<String>,
    curtailed: BTreeSet<CommandKey>,
    remaining: Vec<CommandKey>,
    saved_off_set: BTreeSet<CommandKey>,
    count_epoch: Option<Timestamp>,
}

impl<A: Actuator> CurtailmentController<A> {
    pub fn new(policy: CurtailmentPolicy, registry: ClusterRegistry, actuator: A) -> Self {
        Self {
            policy,
            registry,
            actuator,
            phase: Phase::Idle,
            curtail_end: None,
            next_confirm_at: None,
            break_end: None,
            scheduled: BTreeSet::new(),
            curtailed: BTreeSet::new(),
            remaining: Vec::new(),
            saved_off_set: BTreeSet::new(),
            count_epoch: None,
        }
    }

    /// Feeds one device telemetry row. Returns `false` for unmanaged devices.
    pub fn on_device_telemetry(
        &mut self,
        device: &str,
        timestamp: Timestamp,
        points: &PointValues,
    ) -> bool {
        let known = self.registry.ingest(device, timestamp, points);
        if !known {
            debug!(device, "telemetry for unmanaged device ignored");
        }
        known
    }

    /// Feeds one building meter reading (kW) and advances the state machine.
    ///
    /// # Errors
    ///
    /// Returns a [`RankError`] if candidate ranking fails; controller state
    /// is left as it was before the ranking attempt.
    pub fn on_meter_reading(&mut self, now: Timestamp, reading: f64) -> Result<(), RankError> {
        self.count_epoch.get_or_insert(now);
        match self.phase {
            Phase::Curtailing(stage) => self.while_curtailing(now, reading, stage),
            Phase::Idle | Phase::Cooldown => {
                if self.break_end.is_some_and(|end| now < end) {
                    debug!(reading, "inside curtailment break, reading ignored");
                    return Ok(());
                }
                self.phase = Phase::Idle;
                if reading > self.policy.demand_limit {
                    self.start_event(now, reading)?;
                }
                Ok(())
            }
        }
    }

    /// Ends a running event immediately, releasing every device.
    pub fn release_all(&mut self, now: Timestamp) {
        if self.is_running() {
            self.end_event(now);
        }
    }

    fn while_curtailing(
        &mut self,
        now: Timestamp,
        reading: f64,
        stage: Stage,
    ) -> Result<(), RankError> {
        if self.curtail_end.is_some_and(|end| now >= end) {
            self.end_event(now);
            return Ok(());
        }
        if self.next_confirm_at.is_some_and(|at| now < at) || stage != Stage::AwaitingConfirm {
            return Ok(());
        }

        let limit = self.policy.demand_limit;
        if reading <= limit {
            info!(event = "curtailment.goal_met", reading, limit);
            self.phase = Phase::Curtailing(Stage::GoalMet);
            return Ok(());
        }

        let turned_on = self
            .registry
            .on_set()
            .intersection(&self.saved_off_set)
            .count();
        if turned_on > 0 {
            info!(event = "curtailment.restart", reading, limit, turned_on);
            return self.rank_candidates(now, reading);
        }

        if !self.remaining.is_empty() {
            info!(
                event = "curtailment.escalate",
                reading,
                limit,
                remaining = self.remaining.len()
            );
            self.curtail_pass(now, reading);
            return Ok(());
        }

        warn!(
            event = "curtailment.goal_not_met",
            reading,
            limit,
            curtailed = self.curtailed.len()
        );
        self.phase = Phase::Curtailing(Stage::GoalNotMet);
        Ok(())
    }

    fn start_event(&mut self, now: Timestamp, reading: f64) -> Result<(), RankError> {
        let saved_off = self.registry.off_set();
        let ranked = self.registry.rank()?;
        if ranked.is_empty() {
            info!(reading, "demand limit exceeded but no candidate is on");
            return Ok(());
        }

        info!(
            event = "curtailment.started",
            reading,
            limit = self.policy.demand_limit,
            candidates = ranked.len()
        );
        self.saved_off_set = saved_off;
        self.remaining = ranked.into_iter().map(|c| c.key).collect();
        self.curtail_end = Some(now + self.policy.curtail_duration);
        self.break_end = Some(now + self.policy.curtail_break);
        self.curtail_pass(now, reading);
        Ok(())
    }

    /// Re-ranks from scratch within the running event.
    fn rank_candidates(&mut self, now: Timestamp, reading: f64) -> Result<(), RankError> {
        let saved_off = self.registry.off_set();
        let ranked = self.registry.rank()?;
        self.saved_off_set = saved_off;
        self.remaining = ranked
            .into_iter()
            .map(|c| c.key)
            .filter(|key| !self.curtailed.contains(key))
            .collect();
        self.curtail_pass(now, reading);
        Ok(())
    }

    /// Actuates remaining candidates in order until their expected load
    /// reduction covers `reading - demand_limit` or the list runs out.
    ///
    /// Candidates that fail reservation or actuation stay in `remaining`
    /// for the next pass; candidates no longer on are dropped.
    fn curtail_pass(&mut self, now: Timestamp, reading: f64) {
        let deficit = reading - self.policy.demand_limit;
        let on = self.registry.on_set();
        let mut failed_reservations = BTreeSet::new();
        let mut kept = Vec::new();
        let mut shed = 0.0;

        let mut pending = std::mem::take(&mut self.remaining).into_iter();
        while shed < deficit {
            let Some(key) = pending.next() else {
                break;
            };
            if !on.contains(&key) {
                debug!(candidate = %key, "candidate no longer on, dropped");
                continue;
            }
            if !self.reserve(&key.device, now, &mut failed_reservations) {
                kept.push(key);
                continue;
            }
            match self.actuate(&key) {
                Some(load) => shed += load,
                None => kept.push(key),
            }
        }
        kept.extend(pending);
        self.remaining = kept;

        self.next_confirm_at = Some(now + self.policy.curtail_confirm_interval);
        self.phase = Phase::Curtailing(Stage::AwaitingConfirm);
        info!(
            event = "curtailment.pass",
            deficit,
            shed,
            curtailed = self.curtailed.len(),
            remaining = self.remaining.len()
        );
    }

    fn task_id(&self, device: &str) -> String {
        format!("{}-{}", self.policy.agent_id, device)
    }

    /// Ensures `device` holds a reservation. A failure is not retried
    /// within the same pass.
    fn reserve(
        &mut self,
        device: &str,
        now: Timestamp,
        failed: &mut BTreeSet<String>,
    ) -> bool {
        if self.scheduled.contains(device) {
            return true;
        }
        if failed.contains(device) {
            return false;
        }

        let request = ScheduleRequest {
            task_id: self.task_id(device),
            device: device.to_string(),
            priority: self.policy.schedule_priority.clone(),
            start: now,
            end: now + self.policy.curtail_duration + self.policy.scheduling_buffer,
        };
        match self.actuator.request_schedule(&request) {
            Ok(response) if response.is_success() => {
                debug!(device, end = request.end, "reservation granted");
                self.scheduled.insert(device.to_string());
                true
            }
            Ok(response) => {
                warn!(device, info = %response.info, "reservation rejected");
                failed.insert(device.to_string());
                false
            }
            Err(e) => {
                warn!(device, error = %e, "reservation request failed");
                failed.insert(device.to_string());
                false
            }
        }
    }

    /// Writes the curtail value for `key`. Returns the expected load
    /// reduction on success.
    fn actuate(&mut self, key: &CommandKey) -> Option<f64> {
        let device = self.registry.device(&key.device)?;
        let directive = device.criteria(&key.command)?.directive();
        let path = format!("{}/{}", key.device, directive.point);
        let Some(value) = directive.target_value(device.points()) else {
            warn!(candidate = %key, point = %path, "no current value to offset from");
            return None;
        };
        let load = directive.expected_load(device.points()).unwrap_or_else(|e| {
            warn!(candidate = %key, error = %e, "expected load unavailable, counting 0");
            0.0
        });

        let task_id = self.task_id(&key.device);
        if let Err(e) = self.actuator.set_point(&task_id, &path, Some(value)) {
            warn!(candidate = %key, point = %path, error = %e, "curtailment write failed");
            return None;
        }

        if let Some(criteria) = self.registry.criteria_mut(key) {
            criteria.increment_curtail();
        }
        self.curtailed.insert(key.clone());
        info!(event = "curtailment.actuated", candidate = %key, point = %path, value, load);
        Some(load)
    }

    fn end_event(&mut self, now: Timestamp) {
        info!(
            event = "curtailment.ended",
            curtailed = self.curtailed.len(),
            scheduled = self.scheduled.len()
        );

        for key in std::mem::take(&mut self.curtailed) {
            let Some(criteria) = self.registry.criteria(&key) else {
                continue;
            };
            let path = format!("{}/{}", key.device, criteria.directive().point);
            let task_id = self.task_id(&key.device);
            if let Err(e) = self.actuator.set_point(&task_id, &path, None) {
                warn!(candidate = %key, point = %path, error = %e, "release write failed");
            }
        }
        for device in std::mem::take(&mut self.scheduled) {
            let task_id = self.task_id(&device);
            if let Err(e) = self.actuator.cancel_schedule(&task_id, &device) {
                warn!(device = %device, error = %e, "reservation cancel failed");
            }
        }

        self.remaining.clear();
        self.saved_off_set.clear();
        self.curtail_end = None;
        self.next_confirm_at = None;
        self.phase = Phase::Cooldown;
        self.reset_counts_if_due(now);
    }

    fn reset_counts_if_due(&mut self, now: Timestamp) {
        let Some(interval) = self.policy.reset_curtail_count_interval else {
            return;
        };
        let epoch = *self.count_epoch.get_or_insert(now);
        if now - epoch >= interval {
            self.registry.reset_curtail_counts();
            self.count_epoch = Some(now);
            info!(event = "curtailment.counts_reset");
        }
    }

    pub fn policy(&self) -> &CurtailmentPolicy {
        &self.policy
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns `true` while an event is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Curtailing(_))
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    /// Commands actuated during the current event.
    pub fn curtailed_items(&self) -> &BTreeSet<CommandKey> {
        &self.curtailed
    }

    /// Devices holding a reservation for the current event.
    pub fn scheduled_devices(&self) -> &BTreeSet<String> {
        &self.scheduled
    }

    /// Ranked candidates not yet actuated in the current event.
    pub fn remaining_candidates(&self) -> &[CommandKey] {
        &self.remaining
    }

    /// Commands that were off when the current ranking was taken.
    pub fn saved_off_set(&self) -> &BTreeSet<CommandKey> {
        &self.saved_off_set
    }

    pub fn curtail_end(&self) -> Option<Timestamp> {
        self.curtail_end
    }

    pub fn next_confirm_at(&self) -> Option<Timestamp> {
        self.next_confirm_at
    }

    pub fn break_end(&self) -> Option<Timestamp> {
        self.break_end
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase,
            curtailed: self.curtailed.iter().cloned().collect(),
            remaining: self.remaining.clone(),
            scheduled: self.scheduled.iter().cloned().collect(),
            curtail_end: self.curtail_end,
            next_confirm_at: self.next_confirm_at,
            break_end: self.break_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::ahp::{AhpWeights, PairwiseMatrix};
    use crate::control::actuator::{ActuatorCall, RecordingActuator};
    use crate::criteria::{
        CriteriaSet, Criterion, CriterionConfig, CurtailDirective, CurtailValue, LoadEstimate,
        MapperTables,
    };
    use crate::devices::{Device, DeviceCluster, StatusRule};

    fn set(point: &str, size: f64) -> CriteriaSet {
        let config = CriterionConfig::Constant {
            value: size,
            minimum: None,
            maximum: None,
        };
        let size = Criterion::from_config("size", &config, &MapperTables::new()).expect("valid");
        CriteriaSet::new(
            BTreeMap::from([("size".to_string(), size)]),
            CurtailDirective {
                point: point.to_string(),
                value: CurtailValue::Absolute(0.0),
                load: LoadEstimate::Fixed(5.0),
            },
        )
    }

    /// One device with two commands, both on.
    fn controller() -> CurtailmentController<RecordingActuator> {
        let device = Device::new("ahu")
            .with_command("fan", set("Fan", 1.0), StatusRule::Point("FanOn".into()))
            .with_command("pump", set("Pump", 2.0), StatusRule::Point("PumpOn".into()));
        let matrix = PairwiseMatrix::new(vec!["size".into()], vec![vec![1.0]]).expect("valid");
        let weights = AhpWeights::derive(&matrix).expect("consistent");
        let cluster = DeviceCluster::new("ahus", 1.0, weights, vec![device]).expect("cluster");
        let registry = ClusterRegistry::new(vec![cluster]).expect("registry");
        let mut c = CurtailmentController::new(
            CurtailmentPolicy::default(),
            registry,
            RecordingActuator::new(),
        );
        let on = PointValues::from([("FanOn".to_string(), 1.0), ("PumpOn".to_string(), 1.0)]);
        assert!(c.on_device_telemetry("ahu", 0.0, &on));
        c
    }

    #[test]
    fn policy_defaults() {
        let p = CurtailmentPolicy::default();
        assert_eq!(p.demand_limit, 100.0);
        assert_eq!(p.curtail_confirm_interval, 300.0);
        assert_eq!(p.reset_curtail_count_interval, None);
    }

    #[test]
    fn policy_reads_partial_toml() {
        let p: CurtailmentPolicy =
            toml::from_str("demand_limit = 250.0\nagent_id = \"bldg7\"").expect("parses");
        assert_eq!(p.demand_limit, 250.0);
        assert_eq!(p.agent_id, "bldg7");
        assert_eq!(p.curtail_break, 1800.0);
    }

    #[test]
    fn phase_display_pads() {
        assert_eq!(format!("{:<6}|", Phase::Idle), "idle  |");
        assert_eq!(
            Phase::Curtailing(Stage::GoalNotMet).to_string(),
            "curtailing/goal_not_met"
        );
    }

    #[test]
    fn unknown_device_telemetry_is_ignored() {
        let mut c = controller();
        assert!(!c.on_device_telemetry("chiller", 0.0, &PointValues::new()));
    }

    #[test]
    fn one_reservation_covers_every_command_on_a_device() {
        let mut c = controller();
        c.on_meter_reading(0.0, 108.0).expect("ranks");
        assert_eq!(c.curtailed_items().len(), 2);
        let schedules = c
            .actuator()
            .calls()
            .iter()
            .filter(|call| matches!(call, ActuatorCall::Schedule { .. }))
            .count();
        assert_eq!(schedules, 1);
    }

    #[test]
    fn rejected_device_is_not_retried_within_a_pass() {
        let mut c = controller();
        c.actuator_mut().reject_schedules_for("ahu");
        c.on_meter_reading(0.0, 108.0).expect("ranks");
        assert!(c.curtailed_items().is_empty());
        assert_eq!(c.remaining_candidates().len(), 2);
        assert_eq!(c.actuator().calls().len(), 1);
        assert_eq!(c.phase(), Phase::Curtailing(Stage::AwaitingConfirm));
    }
}
