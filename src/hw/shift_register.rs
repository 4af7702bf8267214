use cortex_m::asm;
use embassy_stm32::gpio::{AnyPin, Level, Output, Speed};

/// Two daisy-chained 8-bit shift registers (MSB first) holding the heater DAC
/// code. The outputs only change on the latch edge.
pub struct ShiftRegister {
    data: Output<'static, AnyPin>,
    clk: Output<'static, AnyPin>,
    latch: Output<'static, AnyPin>,
}

impl ShiftRegister {
    const BITS: u32 = 16;
    /// ~1 us at 168 MHz, well above the 74HC595 setup/hold times.
    const HALF_PERIOD_CYCLES: u32 = 168;

    pub fn new(data: AnyPin, clk: AnyPin, latch: AnyPin) -> Self {
        Self {
            data: Output::new(data, Level::Low, Speed::High),
            clk: Output::new(clk, Level::Low, Speed::High),
            latch: Output::new(latch, Level::Low, Speed::High),
        }
    }

    pub fn write(&mut self, word: u16) {
        // A preempted transfer would latch a torn code into the DAC.
        critical_section::with(|_cs| {
            for bit in (0..Self::BITS).rev() {
                if (word >> bit) & 1 != 0 {
                    self.data.set_high();
                } else {
                    self.data.set_low();
                }
                asm::delay(Self::HALF_PERIOD_CYCLES);
                self.clk.set_high();
                asm::delay(Self::HALF_PERIOD_CYCLES);
                self.clk.set_low();
            }

            self.latch.set_high();
            asm::delay(Self::HALF_PERIOD_CYCLES);
            self.latch.set_low();
        });
    }
}
