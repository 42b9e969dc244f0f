//! JHD1802 16x2 LCD (AiP31068 controller) on an I2C bus.
//!
//! Every transfer is a control byte followed by one payload byte: `0x80`
//! for a command, `0x40` for character data.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use linux_embedded_hal::{Delay, I2cdev};
use rackwatch_core::{CharacterDisplay, DisplayError};
use std::fmt::Debug;
use std::path::Path;

pub const ROWS: usize = 2;
pub const COLUMNS: usize = 16;

const COMMAND: u8 = 0x80;
const DATA: u8 = 0x40;

const FUNCTION_SET_2_LINES: u8 = 0x28;
const DISPLAY_ON: u8 = 0x0C;
const CLEAR: u8 = 0x01;
const ENTRY_LEFT_TO_RIGHT: u8 = 0x06;

pub struct Jhd1802<I, D> {
    bus: I,
    delay: D,
    address: u8,
}

impl Jhd1802<I2cdev, Delay> {
    /// Opens the Linux i2c-dev node and initialises the LCD at `address`.
    /// Any failure means there is no usable LCD on this box.
    pub fn open(bus: &Path, address: u16) -> Result<Self, DisplayError> {
        let address = u8::try_from(address)
            .ok()
            .filter(|a| *a < 0x80)
            .ok_or_else(|| DisplayError::NotReady(format!("{address:#x} is not a 7-bit address")))?;
        let dev = I2cdev::new(bus)
            .map_err(|e| DisplayError::NotReady(format!("{}: {e}", bus.display())))?;
        Self::init(dev, Delay, address)
    }
}

impl<I, D> Jhd1802<I, D>
where
    I: I2c,
    I::Error: Debug,
    D: DelayNs,
{
    /// Runs the controller's power-on sequence over `bus`.
    pub fn init(bus: I, delay: D, address: u8) -> Result<Self, DisplayError> {
        let mut lcd = Self { bus, delay, address };
        lcd.delay.delay_ms(50);
        lcd.command(FUNCTION_SET_2_LINES)?;
        lcd.delay.delay_us(100);
        lcd.command(DISPLAY_ON)?;
        lcd.clear_screen()?;
        lcd.command(ENTRY_LEFT_TO_RIGHT)?;
        Ok(lcd)
    }

    fn send(&mut self, control: u8, byte: u8) -> Result<(), DisplayError> {
        self.bus
            .write(self.address, &[control, byte])
            .map_err(|e| DisplayError::Bus(format!("{e:?}")))
    }

    fn command(&mut self, cmd: u8) -> Result<(), DisplayError> {
        self.send(COMMAND, cmd)
    }

    fn clear_screen(&mut self) -> Result<(), DisplayError> {
        self.command(CLEAR)?;
        self.delay.delay_ms(2);
        Ok(())
    }
}

/// DDRAM "set address" command for the first column of `row`.
fn row_address(row: usize) -> u8 {
    if row == 0 {
        0x80
    } else {
        0xC0
    }
}

/// The character ROM is ASCII for the printable range; anything else
/// becomes `?`.
fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'?' })
        .collect()
}

impl<I, D> CharacterDisplay for Jhd1802<I, D>
where
    I: I2c + Send,
    I::Error: Debug,
    D: DelayNs + Send,
{
    fn rows(&self) -> usize {
        ROWS
    }

    fn columns(&self) -> usize {
        COLUMNS
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.clear_screen()
    }

    fn write_row(&mut self, row: usize, text: &str) -> Result<(), DisplayError> {
        self.command(row_address(row))?;
        for byte in encode(text) {
            self.send(DATA, byte)?;
        }
        Ok(())
    }
}
