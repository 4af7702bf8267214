use embassy_executor::task;
use embassy_time::{Duration, Ticker};

use heater_controller::battery::{BatteryMonitor, ChargeState, BATTERY_PERIOD_MS};
use heater_controller::hal::SharedHal;
use heater_controller::state::Shared;

use crate::board::BoardHal;

#[task]
pub async fn battery_task(mut hal: SharedHal<BoardHal>, shared: &'static Shared) {
    let mut monitor = BatteryMonitor::new();
    let mut last = ChargeState::Allowed;
    let mut ticker = Ticker::every(Duration::from_millis(BATTERY_PERIOD_MS));

    loop {
        ticker.next().await;
        let state = monitor.step(&mut hal, &shared.params.get());
        if state != last {
            defmt::info!("charge state {} -> {}", last, state);
            last = state;
        }
    }
}
