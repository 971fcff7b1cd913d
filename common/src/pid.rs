use std::time::Duration;

pub const OUTPUT_MIN: f64 = 0.0;
pub const OUTPUT_MAX: f64 = 100.0;

/// Positional PID controller with output clamping and integral anti-windup.
///
/// The derivative term acts on the measurement rather than the error so a new
/// setpoint does not produce a derivative kick. A cooling controller is expressed
/// with negative gains: a measurement above the setpoint then yields a positive,
/// in-range output.
#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    integral: f64,
    previous: Option<f64>,
    output_min: f64,
    output_max: f64,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            integral: 0.0,
            previous: None,
            output_min: OUTPUT_MIN,
            output_max: OUTPUT_MAX,
        }
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// Feeds one measurement taken `elapsed` after the previous one and returns
    /// the bounded output.
    pub fn update(&mut self, measurement: f64, elapsed: Duration) -> f64 {
        let dt = elapsed.as_secs_f64();
        let error = self.setpoint - measurement;

        self.integral =
            (self.integral + error * dt * self.ki).clamp(self.output_min, self.output_max);

        let derivative = match self.previous {
            Some(previous) if dt > 0.0 => -(measurement - previous) / dt,
            _ => 0.0,
        };
        self.previous = Some(measurement);

        let output = self.kp * error + self.integral + self.kd * derivative;
        output.clamp(self.output_min, self.output_max)
    }
}
