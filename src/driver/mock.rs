//! Mock Motion Driver
//!
//! Simulated motion controller for testing and dry runs without a robot attached.
//! Motion is instantaneous; every call is recorded so tests can assert on call
//! count and order.
//!
//! # Behaviour
//!
//! - `move_to` sets the targeted axes to their targets
//! - `home` / `fast_home` put the homed axes at their homed position
//! - `probe_axis` moves the axis by the full movement, or stops at a configured
//!   switch plate (see [`MockDriver::with_probe_switch`])
//! - speed and current stacks behave like the firmware driver's
//!
//! # Example
//!
//! ```
//! use liquid_handler::driver::{DriverCall, MockDriver, MotionDriver};
//!
//! let mut driver = MockDriver::new();
//! driver.probe_axis('Z', -10.0).unwrap();
//! assert_eq!(driver.position()[&'Z'], -10.0);
//! assert_eq!(driver.calls(), vec![DriverCall::Probe('Z', -10.0)]);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::driver::{AxisSet, AxisValues, MotionDriver};
use crate::error::{RobotError, RobotResult};

/// Homed position of the reference gantry.
pub const DEFAULT_HOMED_POSITION: [(char, f64); 6] = [
    ('X', 418.0),
    ('Y', 353.0),
    ('Z', 218.0),
    ('A', 218.0),
    ('B', 19.0),
    ('C', 19.0),
];

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// `move_to(target)`
    Move(AxisValues),
    /// `home(axes)`
    Home(AxisSet),
    /// `fast_home(axes, safety_margin)`
    FastHome(AxisSet, f64),
    /// `set_speed(value)`
    SetSpeed(f64),
    /// `push_speed()`
    PushSpeed,
    /// `pop_speed()`
    PopSpeed,
    /// `set_current(settings)`
    SetCurrent(AxisValues),
    /// `push_current()`
    PushCurrent,
    /// `pop_current()`
    PopCurrent,
    /// `probe_axis(axis, movement)`
    Probe(char, f64),
    /// `delay(seconds)`
    Delay(f64),
}

/// Switch plate centred at `center` with half-width `half_size` along one axis.
#[derive(Debug, Clone, Copy)]
struct ProbeSwitch {
    center: f64,
    half_size: f64,
}

/// Simulated motion driver.
#[derive(Debug)]
pub struct MockDriver {
    position: AxisValues,
    homed_position: AxisValues,
    speed: f64,
    speed_stack: Vec<f64>,
    current: AxisValues,
    current_stack: Vec<AxisValues>,
    probe_switches: BTreeMap<char, ProbeSwitch>,
    calls: Vec<DriverCall>,
    homed_position_queries: AtomicUsize,
}

impl MockDriver {
    /// Create a driver at the origin with the reference homed position.
    pub fn new() -> Self {
        Self::with_homed_position(DEFAULT_HOMED_POSITION.into_iter().collect())
    }

    /// Create a driver with a custom homed position.
    pub fn with_homed_position(homed_position: AxisValues) -> Self {
        Self {
            position: homed_position.keys().map(|axis| (*axis, 0.0)).collect(),
            homed_position,
            speed: 0.0,
            speed_stack: Vec::new(),
            current: AxisValues::new(),
            current_stack: Vec::new(),
            probe_switches: BTreeMap::new(),
            calls: Vec::new(),
            homed_position_queries: AtomicUsize::new(0),
        }
    }

    /// Place a switch plate on `axis`: probes approaching from below stop at
    /// `center - half_size`, probes from above stop at `center + half_size`.
    pub fn with_probe_switch(mut self, axis: char, center: f64, half_size: f64) -> Self {
        self.probe_switches
            .insert(axis, ProbeSwitch { center, half_size });
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// How many times [`homed_position`](MotionDriver::homed_position) was read.
    pub fn homed_position_queries(&self) -> usize {
        self.homed_position_queries.load(Ordering::SeqCst)
    }

    /// Current speed setting.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Current motor current settings.
    pub fn current(&self) -> &AxisValues {
        &self.current
    }

    fn home_axes(&mut self, axes: &AxisSet) {
        for axis in axes {
            let homed = self.homed_position.get(axis).copied().unwrap_or(0.0);
            self.position.insert(*axis, homed);
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionDriver for MockDriver {
    fn move_to(&mut self, target: &AxisValues) -> RobotResult<()> {
        self.calls.push(DriverCall::Move(target.clone()));
        self.position
            .extend(target.iter().map(|(axis, value)| (*axis, *value)));
        Ok(())
    }

    fn home(&mut self, axes: &AxisSet) -> RobotResult<()> {
        self.calls.push(DriverCall::Home(axes.clone()));
        self.home_axes(axes);
        Ok(())
    }

    fn fast_home(&mut self, axes: &AxisSet, safety_margin: f64) -> RobotResult<()> {
        self.calls
            .push(DriverCall::FastHome(axes.clone(), safety_margin));
        self.home_axes(axes);
        Ok(())
    }

    fn set_speed(&mut self, value: f64) -> RobotResult<()> {
        self.calls.push(DriverCall::SetSpeed(value));
        self.speed = value;
        Ok(())
    }

    fn push_speed(&mut self) -> RobotResult<()> {
        self.calls.push(DriverCall::PushSpeed);
        self.speed_stack.push(self.speed);
        Ok(())
    }

    fn pop_speed(&mut self) -> RobotResult<()> {
        self.calls.push(DriverCall::PopSpeed);
        self.speed = self
            .speed_stack
            .pop()
            .ok_or_else(|| RobotError::precondition("speed stack is empty"))?;
        Ok(())
    }

    fn set_current(&mut self, settings: &AxisValues) -> RobotResult<()> {
        self.calls.push(DriverCall::SetCurrent(settings.clone()));
        self.current
            .extend(settings.iter().map(|(axis, value)| (*axis, *value)));
        Ok(())
    }

    fn push_current(&mut self) -> RobotResult<()> {
        self.calls.push(DriverCall::PushCurrent);
        self.current_stack.push(self.current.clone());
        Ok(())
    }

    fn pop_current(&mut self) -> RobotResult<()> {
        self.calls.push(DriverCall::PopCurrent);
        self.current = self
            .current_stack
            .pop()
            .ok_or_else(|| RobotError::precondition("current stack is empty"))?;
        Ok(())
    }

    fn probe_axis(&mut self, axis: char, movement: f64) -> RobotResult<()> {
        self.calls.push(DriverCall::Probe(axis, movement));
        let start = self.position.get(&axis).copied().unwrap_or(0.0);
        let mut end = start + movement;
        if let Some(switch) = self.probe_switches.get(&axis) {
            end = if movement > 0.0 {
                end.min(switch.center - switch.half_size)
            } else {
                end.max(switch.center + switch.half_size)
            };
        }
        self.position.insert(axis, end);
        Ok(())
    }

    fn delay(&mut self, seconds: f64) -> RobotResult<()> {
        self.calls.push(DriverCall::Delay(seconds));
        Ok(())
    }

    fn position(&self) -> AxisValues {
        self.position.clone()
    }

    fn homed_position(&self) -> AxisValues {
        self.homed_position_queries.fetch_add(1, Ordering::SeqCst);
        self.homed_position.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_driver_creation() {
        let driver = MockDriver::new();
        assert_eq!(driver.position()[&'X'], 0.0);
        assert_eq!(driver.homed_position()[&'B'], 19.0);
        assert_eq!(driver.homed_position_queries(), 1);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_speed_stack_restores_previous_value() {
        let mut driver = MockDriver::new();
        driver.set_speed(100.0).unwrap();
        driver.push_speed().unwrap();
        driver.set_speed(5.0).unwrap();
        driver.pop_speed().unwrap();
        assert_eq!(driver.speed(), 100.0);
        assert!(matches!(driver.pop_speed(), Err(RobotError::Precondition(_))));
    }

    #[test]
    fn test_current_stack_restores_previous_settings() {
        let mut driver = MockDriver::new();
        let high: AxisValues = [('X', 1.5)].into_iter().collect();
        let low: AxisValues = [('X', 0.1)].into_iter().collect();
        driver.set_current(&high).unwrap();
        driver.push_current().unwrap();
        driver.set_current(&low).unwrap();
        driver.pop_current().unwrap();
        assert_eq!(driver.current()[&'X'], 1.5);
    }

    #[test]
    fn test_probe_switch_stops_probe() {
        let mut driver = MockDriver::new().with_probe_switch('X', 100.0, 5.0);
        driver.move_to(&[('X', 80.0)].into_iter().collect()).unwrap();
        driver.probe_axis('X', 40.0).unwrap();
        assert_eq!(driver.position()[&'X'], 95.0);

        driver.move_to(&[('X', 120.0)].into_iter().collect()).unwrap();
        driver.probe_axis('X', -40.0).unwrap();
        assert_eq!(driver.position()[&'X'], 105.0);
    }

    #[test]
    fn test_home_moves_only_requested_axes() {
        let mut driver = MockDriver::new();
        driver.home(&['Z'].into_iter().collect()).unwrap();
        let position = driver.position();
        assert_eq!(position[&'Z'], 218.0);
        assert_eq!(position[&'X'], 0.0);
    }
}
