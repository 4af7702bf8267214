#![no_std]
#![no_main]

mod board;
mod hw;
mod tasks;
mod usb;

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{Input, Level, Output, Pin, Pull, Speed};
use embassy_stm32::spi::{Config as SpiConfig, Spi};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use heater_controller::control::ControlLoop;
use heater_controller::hal::SharedHal;
use heater_controller::params::ParamStore;
use heater_controller::state::Shared;

use crate::board::{AnalogPins, Board, BoardHal, DigitalPins};
use crate::hw::flash::W25qxx;
use crate::hw::shift_register::ShiftRegister;
use crate::tasks::battery_task::battery_task;
use crate::tasks::control_task::control_task;
use crate::tasks::parser_task::{parser_task, TxQueue};
use crate::tasks::usb_rx_task::usb_rx_task;

// ── Shared state ──────────────────────────────────────────────────────────────
static SHARED: Shared = Shared::new();

static BOARD_HAL: StaticCell<Mutex<CriticalSectionRawMutex, RefCell<BoardHal>>> =
    StaticCell::new();
static TX_QUEUE: StaticCell<TxQueue> = StaticCell::new();

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();
    let p = board.p;
    defmt::info!("heater controller starting");

    // 2. USB CDC-ACM link to the host
    let (usb_dev, usb_tx, usb_rx) = usb::init(p.USB_OTG_FS, p.PA12, p.PA11);
    spawner.spawn(usb::usb_task(usb_dev)).unwrap();

    // 3. SPI3 @ 20 MHz: W25Q parameter flash (SCK=PC10, MISO=PC11, MOSI=PC12, CS=PA15)
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(20_000_000);
    let spi = Spi::new(p.SPI3, p.PC10, p.PC12, p.PC11, NoDma, NoDma, spi_config);
    let cs_flash = Output::new(p.PA15.degrade(), Level::High, Speed::VeryHigh);
    let mut flash = W25qxx::new(spi, cs_flash);
    match flash.read_id() {
        Ok(id) => defmt::info!("flash jedec id {=[u8]:x}", id),
        Err(_) => defmt::warn!("flash not responding"),
    }

    // 4. Stored parameters, before anything reads them
    let mut store = ParamStore::new(&SHARED.params, flash);
    match store.load() {
        Ok(()) => defmt::info!("parameters loaded from flash"),
        Err(e) => defmt::warn!("using default parameters ({})", e),
    }

    // 5. Analog front end, DAC shift register (D=PC6, CLK=PC7, LATCH=PC8), charger GPIOs
    let dac = ShiftRegister::new(p.PC6.degrade(), p.PC7.degrade(), p.PC8.degrade());
    let analog = AnalogPins {
        i_heater: p.PC0,
        v_heater_mon: p.PC1,
        v_ref: p.PC2,
        v_div: p.PC3,
        battery_voltage: p.PC4,
        battery_temp: p.PC5,
    };
    let digital = DigitalPins {
        usb_detect: Input::new(p.PA9.degrade(), Pull::Down),
        charger_emergency: Input::new(p.PB5.degrade(), Pull::Up),
        charge_enable: p.PB6.degrade(),
        led: p.PC13.degrade(),
    };
    let hal = BoardHal::new(p.ADC1, analog, dac, digital);
    let hal = SharedHal::new(BOARD_HAL.init(Mutex::new(RefCell::new(hal))));

    // 6. Control loop; a failed init leaves it sampling but locked out
    let mut ctl = ControlLoop::new(hal.clone(), &SHARED);
    ctl.init();
    let tick_hz = SHARED.params.get().timings.oversampling_rate;

    // 7. Spawn all tasks
    spawner.spawn(control_task(ctl, tick_hz)).unwrap();
    spawner.spawn(usb_rx_task(usb_rx, &SHARED)).unwrap();
    spawner
        .spawn(parser_task(&SHARED, store, usb_tx, TX_QUEUE.init_with(TxQueue::new)))
        .unwrap();
    spawner.spawn(battery_task(hal, &SHARED)).unwrap();
}
