use embassy_executor::task;
use embassy_stm32::dma::NoDma;
use embassy_stm32::peripherals::SPI3;

use heater_controller::params::ParamStore;
use heater_controller::protocol::receiver::Receiver;
use heater_controller::protocol::transmitter::TELEMETRY_BYTES;
use heater_controller::state::Shared;

use crate::hw::flash::W25qxx;
use crate::usb::{self, UsbSender};

pub type ParamFlash = W25qxx<'static, SPI3, NoDma, NoDma>;

/// Room for two fully escaped telemetry frames.
pub const TX_QUEUE_LEN: usize = 2 * (2 * TELEMETRY_BYTES + 16);
pub type TxQueue = heapless::Vec<u8, TX_QUEUE_LEN>;

/// Parser task: feeds each received chunk through the protocol receiver and
/// flushes whatever it queued for the host.
#[task]
pub async fn parser_task(
    shared: &'static Shared,
    store: ParamStore<'static, ParamFlash>,
    mut tx: UsbSender,
    queue: &'static mut TxQueue,
) {
    let mut receiver = Receiver::new(shared, store);

    loop {
        shared.link.process(|chunk| receiver.feed(chunk, &mut *queue)).await;

        if queue.is_empty() {
            continue;
        }
        if usb::write_all(&mut tx, queue.as_slice()).await.is_err() {
            defmt::warn!("host gone, {} bytes of replies dropped", queue.len());
        }
        queue.clear();
    }
}
