use embassy_stm32::adc::{Adc, Resolution, SampleTime, VrefInt};
use embassy_stm32::gpio::{AnyPin, Input, Level, Output, Speed};
use embassy_stm32::peripherals::{ADC1, PC0, PC1, PC2, PC3, PC4, PC5};
use embassy_stm32::rcc::*;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::Config;
use embassy_time::Delay;
#[allow(unused_imports)]
use micromath::F32Ext;

use heater_controller::hal::{Channel, DigitalInput, DigitalOutput, Hal};

use crate::hw::shift_register::ShiftRegister;

/// Internal reference, typical, V.
const VREFINT_V: f32 = 1.21;
/// Accepted deviation of the VREFINT reading before the ADC is declared dead.
const VREFINT_TOLERANCE: f32 = 0.1;

pub struct Board {
    pub p: embassy_stm32::Peripherals,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();
        config.rcc.hse = Some(Hse {
            freq: TimeHertz(8_000_000),
            mode: HseMode::Oscillator,
        });
        config.rcc.pll_src = PllSource::HSE;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL168,
            divp: Some(PllPDiv::DIV2), // 168 MHz
            divq: Some(PllQDiv::DIV7), // 48 MHz for USB
            divr: None,
        });
        config.rcc.sys = Sysclk::PLL1_P;
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;

        let p = embassy_stm32::init(config);

        Self { p }
    }
}

pub struct AnalogPins {
    pub i_heater: PC0,
    pub v_heater_mon: PC1,
    pub v_ref: PC2,
    pub v_div: PC3,
    pub battery_voltage: PC4,
    pub battery_temp: PC5,
}

pub struct DigitalPins {
    pub usb_detect: Input<'static, AnyPin>,
    /// Charger fault output, active low.
    pub charger_emergency: Input<'static, AnyPin>,
    pub charge_enable: AnyPin,
    pub led: AnyPin,
}

/// Heater front end: six ADC1 inputs on PC0..PC5, the DAC shift register and
/// the charger GPIOs.
pub struct BoardHal {
    adc: Adc<'static, ADC1>,
    vrefint: VrefInt,
    analog: AnalogPins,
    dac: ShiftRegister,
    usb_detect: Input<'static, AnyPin>,
    charger_emergency: Input<'static, AnyPin>,
    charge_enable: Output<'static, AnyPin>,
    led: Output<'static, AnyPin>,
}

impl BoardHal {
    pub fn new(adc: ADC1, analog: AnalogPins, dac: ShiftRegister, pins: DigitalPins) -> Self {
        let mut adc = Adc::new(adc, &mut Delay);
        adc.set_resolution(Resolution::TwelveBit);
        adc.set_sample_time(SampleTime::Cycles480);
        let vrefint = adc.enable_vrefint();

        Self {
            adc,
            vrefint,
            analog,
            dac,
            usb_detect: pins.usb_detect,
            charger_emergency: pins.charger_emergency,
            charge_enable: Output::new(pins.charge_enable, Level::Low, Speed::Low),
            led: Output::new(pins.led, Level::Low, Speed::Low),
        }
    }
}

impl Hal for BoardHal {
    fn init(&mut self) -> bool {
        let code = self.adc.read(&mut self.vrefint);
        let volts = code as f32 * 3.3 / 4095.0;
        let ok = (volts - VREFINT_V).abs() <= VREFINT_TOLERANCE;
        if ok {
            defmt::info!("adc ok, vrefint {} V", volts);
        } else {
            defmt::error!("adc vrefint reads {} V", volts);
        }
        self.dac.write(0);
        ok
    }

    fn read_channel(&mut self, channel: Channel) -> u16 {
        let a = &mut self.analog;
        match channel {
            Channel::IHeater => self.adc.read(&mut a.i_heater),
            Channel::VHeaterMon => self.adc.read(&mut a.v_heater_mon),
            Channel::VRef => self.adc.read(&mut a.v_ref),
            Channel::VDiv => self.adc.read(&mut a.v_div),
            Channel::BatteryVoltage => self.adc.read(&mut a.battery_voltage),
            Channel::BatteryTemp => self.adc.read(&mut a.battery_temp),
        }
    }

    fn write_actuator_code(&mut self, code: u16) {
        self.dac.write(code);
    }

    fn digital_input(&mut self, input: DigitalInput) -> bool {
        match input {
            DigitalInput::UsbDetected => self.usb_detect.is_high(),
            DigitalInput::ChargerEmergency => self.charger_emergency.is_low(),
        }
    }

    fn set_digital_output(&mut self, output: DigitalOutput, on: bool) {
        let pin = match output {
            DigitalOutput::ChargeEnable => &mut self.charge_enable,
            DigitalOutput::Led => &mut self.led,
        };
        pin.set_level(if on { Level::High } else { Level::Low });
    }
}
