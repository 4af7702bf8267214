use embassy_executor::task;

use heater_controller::state::Shared;

use crate::usb::{UsbReceiver, MAX_PACKET_SIZE};

/// Pumps host packets into the receive link. Waits for the parser between
/// packets, which NAKs the host instead of dropping bytes.
#[task]
pub async fn usb_rx_task(mut rx: UsbReceiver, shared: &'static Shared) {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        rx.wait_connection().await;
        defmt::info!("usb host connected");

        while let Ok(n) = rx.read_packet(&mut buf).await {
            shared.link.deliver(&buf[..n], &shared.errors).await;
        }
        defmt::info!("usb host disconnected");
    }
}
