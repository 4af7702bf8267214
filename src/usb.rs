use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

bind_interrupts!(pub struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSender = Sender<'static, UsbDriver>;
pub type UsbReceiver = Receiver<'static, UsbDriver>;

/// Full-speed bulk endpoint size.
pub const MAX_PACKET_SIZE: usize = 64;

struct UsbResources {
    config_desc: [u8; 256],
    bos_desc: [u8; 256],
    control_buf: [u8; 64],
    ep_out_buffer: [u8; 256],
}

static RESOURCES: StaticCell<UsbResources> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}

/// Bring up the OTG_FS core as a single CDC-ACM port and split it into the
/// host-to-device and device-to-host halves.
pub fn init(
    usb_periph: peripherals::USB_OTG_FS,
    pa12: peripherals::PA12,
    pa11: peripherals::PA11,
) -> (UsbDevice<'static, UsbDriver>, UsbSender, UsbReceiver) {
    let res = RESOURCES.init(UsbResources {
        config_desc: [0; 256],
        bos_desc: [0; 256],
        control_buf: [0; 64],
        ep_out_buffer: [0; 256],
    });

    let mut usb_config = usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(usb_periph, Irqs, pa12, pa11, &mut res.ep_out_buffer, usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("Heater Lab");
    config.product = Some("Heater controller");
    config.serial_number = Some("00000001");
    config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        config,
        &mut res.config_desc,
        &mut res.bos_desc,
        &mut [], // msos_descs
        &mut res.control_buf,
    );

    let state = CDC_STATE.init(State::new());
    let class = CdcAcmClass::new(&mut builder, state, MAX_PACKET_SIZE as u16);
    let usb = builder.build();
    let (tx, rx) = class.split();

    (usb, tx, rx)
}

/// Send `data` as a sequence of packets, ending with a zero-length packet
/// when the last one is full so the host sees the transfer end.
pub async fn write_all(tx: &mut UsbSender, data: &[u8]) -> Result<(), EndpointError> {
    for packet in data.chunks(MAX_PACKET_SIZE) {
        tx.write_packet(packet).await?;
    }
    if !data.is_empty() && data.len() % MAX_PACKET_SIZE == 0 {
        tx.write_packet(&[]).await?;
    }
    Ok(())
}
