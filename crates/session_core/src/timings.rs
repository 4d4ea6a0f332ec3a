use std::time::Duration;

use crate::error::TimingError;

/// Delays of the scheduled transitions, all measured from `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimings {
    /// Menu and controls fade out; no stage change.
    pub fade_out: Duration,
    /// `Engaging -> HandoffPending`, background starts fading.
    pub background_fade: Duration,
    /// `HandoffPending -> Active`, crisis protocol is activated.
    pub handoff: Duration,
}

impl Default for StageTimings {
    fn default() -> Self {
        Self {
            fade_out: Duration::from_millis(1_000),
            background_fade: Duration::from_millis(2_000),
            handoff: Duration::from_millis(3_500),
        }
    }
}

impl StageTimings {
    pub fn from_secs(fade_out: f64, background_fade: f64, handoff: f64) -> Result<Self, TimingError> {
        let timings = Self {
            fade_out: secs("fade_out", fade_out)?,
            background_fade: secs("background_fade", background_fade)?,
            handoff: secs("handoff", handoff)?,
        };
        timings.validate()?;
        Ok(timings)
    }

    pub fn validate(&self) -> Result<(), TimingError> {
        let ordered = [
            ("fade_out", self.fade_out),
            ("background_fade", self.background_fade),
            ("handoff", self.handoff),
        ];
        for pair in ordered.windows(2) {
            let (earlier, earlier_at) = pair[0];
            let (later, later_at) = pair[1];
            if earlier_at > later_at {
                return Err(TimingError::OutOfOrder {
                    earlier,
                    earlier_secs: earlier_at.as_secs_f64(),
                    later,
                    later_secs: later_at.as_secs_f64(),
                });
            }
        }
        Ok(())
    }
}

fn secs(field: &'static str, value: f64) -> Result<Duration, TimingError> {
    Duration::try_from_secs_f64(value).map_err(|_| TimingError::InvalidDelay { field })
}
