use embassy_executor::task;
use embassy_time::{Duration, Ticker};

use heater_controller::control::ControlLoop;
use heater_controller::hal::SharedHal;

use crate::board::BoardHal;

/// Control task: one sample per tick at the oversampling rate, a control step
/// every `oversampling_rate / sampling_rate` ticks.
#[task]
pub async fn control_task(mut ctl: ControlLoop<'static, SharedHal<BoardHal>>, tick_hz: u32) {
    let mut ticker = Ticker::every(Duration::from_hz(tick_hz.max(1) as u64));

    loop {
        ticker.next().await;
        ctl.tick();
    }
}
