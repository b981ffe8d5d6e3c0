//! The `Get<T>` trait and its implementation in this module allows providing a single generic,
//! overloaded function `get<T>()` for all types that fit into one 16 bit value.

use crate::error::Error;
use crate::platform::Platform;
use crate::Eeprom;

pub trait Get<T> {
    fn get(&mut self, address: u16) -> Result<T, Error>;
}

impl<T, G: Get<T>> Get<T> for &mut G {
    fn get(&mut self, address: u16) -> Result<T, Error> {
        (*self).get(address)
    }
}

impl<T: Platform> Get<bool> for Eeprom<T> {
    fn get(&mut self, address: u16) -> Result<bool, Error> {
        let value = self.read(address)?;
        Ok(value != 0)
    }
}

impl<T: Platform> Get<u8> for Eeprom<T> {
    fn get(&mut self, address: u16) -> Result<u8, Error> {
        let value = self.read(address)?;
        Ok(value as u8)
    }
}

impl<T: Platform> Get<u16> for Eeprom<T> {
    fn get(&mut self, address: u16) -> Result<u16, Error> {
        self.read(address)
    }
}

impl<T: Platform> Get<i8> for Eeprom<T> {
    fn get(&mut self, address: u16) -> Result<i8, Error> {
        let value = self.read(address)?;
        Ok((value as u8).cast_signed())
    }
}

impl<T: Platform> Get<i16> for Eeprom<T> {
    fn get(&mut self, address: u16) -> Result<i16, Error> {
        let value = self.read(address)?;
        Ok(value.cast_signed())
    }
}
