//! Smoothieware G-code motion driver.
//!
//! Every command is sent through [`write_and_return`], so a missing acknowledgment
//! gets exactly one extended-timeout retry before the call fails. Commands are
//! suffixed with `M400` (wait until motion completes) and terminated with `\r\n`;
//! the firmware acknowledges with one `ok` per G-code word group.
//!
//! ## Command Set
//!
//! | Operation | G-code |
//! |---|---|
//! | move | `G0 X.. Y..` |
//! | home | `G28.2 XYZ` |
//! | speed | `G0F<mm/min>` |
//! | current | `M907 X.. Y..` |
//! | probe | `G91 G38.2 X.. G90` |
//! | dwell | `G4P<ms>` |
//! | position | `M114.2` → `MCS: X:0.0000 Y:0.0000 ...` |
//!
//! The driver tracks position open loop after moves and re-reads it from the
//! firmware after homing and probing, when the actual stopping point is unknown.

use std::time::Duration;

use tracing::{debug, info};

use crate::driver::{AxisSet, AxisValues, MotionDriver};
use crate::error::{RobotError, RobotResult};
use crate::serial::{write_and_return, SerialConnection, DEFAULT_WRITE_TIMEOUT, RECOVERY_TIMEOUT};

/// Acknowledgment the firmware sends after `<command> M400`.
pub const DEFAULT_ACK: &str = "ok\r\nok\r\n";

const MOVE: &str = "G0";
const HOME: &str = "G28.2";
const SET_SPEED: &str = "G0F";
const SET_CURRENT: &str = "M907";
const PROBE: &str = "G38.2";
const RELATIVE: &str = "G91";
const ABSOLUTE: &str = "G90";
const DWELL: &str = "G4P";
const CURRENT_POSITION: &str = "M114.2";
const WAIT: &str = "M400";

/// Motion driver for a Smoothieboard reached through `C`.
#[derive(Debug)]
pub struct SmoothieDriver<C> {
    connection: C,
    ack: String,
    timeout: Duration,
    recovery_timeout: Duration,
    position: AxisValues,
    homed_position: AxisValues,
    speed: f64,
    speed_stack: Vec<f64>,
    current: AxisValues,
    current_stack: Vec<AxisValues>,
}

impl<C: SerialConnection + Send> SmoothieDriver<C> {
    /// Driver with the default acknowledgment and timeouts.
    ///
    /// Position starts at zero on every homed axis until the first readback.
    pub fn new(connection: C, homed_position: AxisValues) -> Self {
        Self {
            connection,
            ack: DEFAULT_ACK.to_string(),
            timeout: DEFAULT_WRITE_TIMEOUT,
            recovery_timeout: RECOVERY_TIMEOUT,
            position: homed_position.keys().map(|axis| (*axis, 0.0)).collect(),
            homed_position,
            speed: 0.0,
            speed_stack: Vec::new(),
            current: AxisValues::new(),
            current_stack: Vec::new(),
        }
    }

    /// Override the acknowledgment token.
    pub fn with_ack(mut self, ack: impl Into<String>) -> Self {
        self.ack = ack.into();
        self
    }

    /// Override the exchange and recovery timeouts.
    pub fn with_timeouts(mut self, timeout: Duration, recovery_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.recovery_timeout = recovery_timeout;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Give the connection back, e.g. to close it.
    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Last speed set, in mm/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Last motor current settings.
    pub fn current(&self) -> &AxisValues {
        &self.current
    }

    /// Send one command and return the firmware's payload.
    pub fn send_command(&mut self, command: &str) -> RobotResult<String> {
        let line = format!("{} {}\r\n", command, WAIT);
        write_and_return(
            &line,
            &self.ack,
            &mut self.connection,
            self.timeout,
            self.recovery_timeout,
        )
    }

    /// Read the machine position from the firmware and store it.
    pub fn update_position(&mut self) -> RobotResult<()> {
        let response = self.send_command(CURRENT_POSITION)?;
        let reported = parse_position(&response).ok_or_else(|| RobotError::InvalidResponse {
            command: CURRENT_POSITION.to_string(),
            response: response.clone(),
        })?;
        debug!(position = ?reported, "Position read back");
        self.position.extend(reported);
        Ok(())
    }
}

impl<C: SerialConnection + Send> MotionDriver for SmoothieDriver<C> {
    fn move_to(&mut self, target: &AxisValues) -> RobotResult<()> {
        if target.is_empty() {
            return Ok(());
        }
        self.send_command(&format!("{} {}", MOVE, axis_words(target)))?;
        self.position
            .extend(target.iter().map(|(axis, value)| (*axis, *value)));
        Ok(())
    }

    fn home(&mut self, axes: &AxisSet) -> RobotResult<()> {
        if axes.is_empty() {
            return Ok(());
        }
        let letters: String = axes.iter().collect();
        info!(axes = %letters, "Homing");
        self.send_command(&format!("{} {}", HOME, letters))?;
        self.update_position()
    }

    fn fast_home(&mut self, axes: &AxisSet, safety_margin: f64) -> RobotResult<()> {
        let approach: AxisValues = axes
            .iter()
            .filter_map(|axis| {
                self.homed_position
                    .get(axis)
                    .map(|homed| (*axis, homed - safety_margin))
            })
            .collect();
        self.move_to(&approach)?;
        self.home(axes)
    }

    fn set_speed(&mut self, value: f64) -> RobotResult<()> {
        self.send_command(&format!("{}{}", SET_SPEED, format_value(value * 60.0)))?;
        self.speed = value;
        Ok(())
    }

    fn push_speed(&mut self) -> RobotResult<()> {
        self.speed_stack.push(self.speed);
        Ok(())
    }

    fn pop_speed(&mut self) -> RobotResult<()> {
        let speed = self
            .speed_stack
            .pop()
            .ok_or_else(|| RobotError::precondition("speed stack is empty"))?;
        self.set_speed(speed)
    }

    fn set_current(&mut self, settings: &AxisValues) -> RobotResult<()> {
        if settings.is_empty() {
            return Ok(());
        }
        self.send_command(&format!("{} {}", SET_CURRENT, axis_words(settings)))?;
        self.current
            .extend(settings.iter().map(|(axis, value)| (*axis, *value)));
        Ok(())
    }

    fn push_current(&mut self) -> RobotResult<()> {
        self.current_stack.push(self.current.clone());
        Ok(())
    }

    fn pop_current(&mut self) -> RobotResult<()> {
        let current = self
            .current_stack
            .pop()
            .ok_or_else(|| RobotError::precondition("current stack is empty"))?;
        self.set_current(&current)
    }

    fn probe_axis(&mut self, axis: char, movement: f64) -> RobotResult<()> {
        info!(axis = %axis, movement, "Probing");
        self.send_command(&format!(
            "{} {} {}{} {}",
            RELATIVE,
            PROBE,
            axis,
            format_value(movement),
            ABSOLUTE
        ))?;
        self.update_position()
    }

    fn delay(&mut self, seconds: f64) -> RobotResult<()> {
        self.send_command(&format!("{}{}", DWELL, format_value(seconds * 1000.0)))?;
        Ok(())
    }

    fn position(&self) -> AxisValues {
        self.position.clone()
    }

    fn homed_position(&self) -> AxisValues {
        self.homed_position.clone()
    }
}

/// `X1.000 Y2.500` for the given values.
fn axis_words(values: &AxisValues) -> String {
    values
        .iter()
        .map(|(axis, value)| format!("{}{}", axis, format_value(*value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_value(value: f64) -> String {
    format!("{:.3}", value)
}

/// Parse `X:<f> Y:<f> ...` words out of a position report.
///
/// Words that are not a single upper-case letter followed by `:` and a number are
/// skipped, so prefixes like `MCS:` are ignored. `None` if no axis was found.
pub fn parse_position(response: &str) -> Option<AxisValues> {
    let position: AxisValues = response
        .split_whitespace()
        .filter_map(|word| {
            let (letter, value) = word.split_once(':')?;
            let mut chars = letter.chars();
            let axis = chars.next().filter(char::is_ascii_uppercase)?;
            if chars.next().is_some() {
                return None;
            }
            value.parse::<f64>().ok().map(|value| (axis, value))
        })
        .collect();
    (!position.is_empty()).then_some(position)
}
