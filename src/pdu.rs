//! Modbus PDU handling for the register exchanges the unit supports
//!
//! Requests are built into a fixed-size stack buffer; responses are parsed
//! and validated against the request that produced them.

use tracing::debug;

use crate::constants::{
    function_name, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE, MAX_READ_REGISTERS,
    MAX_WRITE_REGISTERS,
};
use crate::error::{FuturaError, FuturaResult};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Copy a received PDU into a new buffer
    pub fn from_slice(data: &[u8]) -> FuturaResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(FuturaError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    #[inline]
    fn push(&mut self, byte: u8) -> FuturaResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(FuturaError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    #[inline]
    fn push_u16(&mut self, value: u16) -> FuturaResult<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }

    #[inline]
    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes = self.as_slice().get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Turn an exception reply into an error and check the function code echo.
    fn expect_function(&self, expected_fc: u8) -> FuturaResult<()> {
        let fc = self
            .function_code()
            .ok_or_else(|| FuturaError::protocol("empty response PDU"))?;

        if fc == expected_fc | EXCEPTION_FLAG {
            let code = self
                .exception_code()
                .ok_or_else(|| FuturaError::protocol("exception response without code"))?;
            return Err(FuturaError::exception(expected_fc, code));
        }

        if fc != expected_fc {
            return Err(FuturaError::protocol(format!(
                "function code mismatch: expected {:02X}, got {:02X}",
                expected_fc, fc
            )));
        }
        Ok(())
    }

    /// Parse an FC03/FC04 response carrying exactly `quantity` registers.
    pub fn parse_registers(&self, expected_fc: u8, quantity: u16) -> FuturaResult<Vec<u16>> {
        self.expect_function(expected_fc)?;

        let data = self.as_slice();
        let byte_count = *data
            .get(1)
            .ok_or_else(|| FuturaError::protocol("read response without byte count"))?
            as usize;
        let expected_bytes = quantity as usize * 2;

        if byte_count != expected_bytes || data.len() != 2 + byte_count {
            return Err(FuturaError::protocol(format!(
                "{}: expected {} data bytes, byte count {} with {} bytes present",
                function_name(expected_fc),
                expected_bytes,
                byte_count,
                data.len().saturating_sub(2)
            )));
        }

        let registers = data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(registers)
    }

    /// Validate an FC06 echo or an FC16 (address, quantity) acknowledgement.
    pub fn parse_write_ack(&self, expected_fc: u8, address: u16, second: u16) -> FuturaResult<()> {
        self.expect_function(expected_fc)?;

        if self.len != 5 {
            return Err(FuturaError::protocol(format!(
                "{}: acknowledgement length {} (expected 5)",
                function_name(expected_fc),
                self.len
            )));
        }

        let echoed = (self.u16_at(1), self.u16_at(3));
        if echoed != (Some(address), Some(second)) {
            return Err(FuturaError::protocol(format!(
                "{}: acknowledgement {:?} does not match request ({}, {})",
                function_name(expected_fc),
                echoed,
                address,
                second
            )));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds request PDUs
pub struct PduBuilder;

impl PduBuilder {
    /// FC03/FC04 read request
    pub fn read_registers(fc: u8, start_address: u16, quantity: u16) -> FuturaResult<ModbusPdu> {
        if !matches!(fc, FC_READ_HOLDING_REGISTERS | FC_READ_INPUT_REGISTERS) {
            return Err(FuturaError::invalid_data(format!(
                "not a register read function: {:02X}",
                fc
            )));
        }
        if quantity == 0 || quantity > MAX_READ_REGISTERS {
            return Err(FuturaError::invalid_data(format!(
                "read quantity {} outside 1..={}",
                quantity, MAX_READ_REGISTERS
            )));
        }
        Self::check_span(start_address, quantity)?;

        let mut pdu = ModbusPdu::new();
        pdu.push(fc)?;
        pdu.push_u16(start_address)?;
        pdu.push_u16(quantity)?;
        Self::trace(&pdu);
        Ok(pdu)
    }

    /// FC06 write single register
    pub fn write_single_register(address: u16, value: u16) -> FuturaResult<ModbusPdu> {
        let mut pdu = ModbusPdu::new();
        pdu.push(FC_WRITE_SINGLE_REGISTER)?;
        pdu.push_u16(address)?;
        pdu.push_u16(value)?;
        Self::trace(&pdu);
        Ok(pdu)
    }

    /// FC16 write multiple registers
    pub fn write_multiple_registers(address: u16, values: &[u16]) -> FuturaResult<ModbusPdu> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
            return Err(FuturaError::invalid_data(format!(
                "write quantity {} outside 1..={}",
                values.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        Self::check_span(address, values.len() as u16)?;

        let mut pdu = ModbusPdu::new();
        pdu.push(FC_WRITE_MULTIPLE_REGISTERS)?;
        pdu.push_u16(address)?;
        pdu.push_u16(values.len() as u16)?;
        pdu.push((values.len() * 2) as u8)?;
        for &value in values {
            pdu.push_u16(value)?;
        }
        Self::trace(&pdu);
        Ok(pdu)
    }

    /// The last register addressed must not pass 65535.
    fn check_span(address: u16, quantity: u16) -> FuturaResult<()> {
        if address as u32 + quantity as u32 > u16::MAX as u32 + 1 {
            return Err(FuturaError::invalid_data(format!(
                "{} register(s) at {} run past the address space",
                quantity, address
            )));
        }
        Ok(())
    }

    fn trace(pdu: &ModbusPdu) {
        if let Some(fc) = pdu.function_code() {
            debug!("PDU built: FC={:02X} ({}), len={}", fc, function_name(fc), pdu.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_read_request() {
        let pdu = PduBuilder::read_registers(0x04, 0x000E, 8).unwrap();
        assert_eq!(pdu.as_slice(), &[0x04, 0x00, 0x0E, 0x00, 0x08]);

        let pdu = PduBuilder::read_registers(0x03, 0, 18).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x00, 0x00, 0x12]);
    }

    #[test]
    fn test_read_request_rejects_bad_input() {
        assert!(PduBuilder::read_registers(0x01, 0, 1).is_err());
        assert!(PduBuilder::read_registers(0x03, 0, 0).is_err());
        assert!(PduBuilder::read_registers(0x03, 0, 126).is_err());
    }

    #[test]
    fn test_build_write_single_register() {
        let pdu = PduBuilder::write_single_register(0x0001, 0x0E10).unwrap();
        assert_eq!(pdu.as_slice(), &[0x06, 0x00, 0x01, 0x0E, 0x10]);
    }

    #[test]
    fn test_build_write_multiple_registers() {
        let pdu = PduBuilder::write_multiple_registers(0x0006, &[0x6553, 0xF100]).unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x00, 0x06, 0x00, 0x02, 0x04, 0x65, 0x53, 0xF1, 0x00]
        );
        assert!(PduBuilder::write_multiple_registers(0, &[]).is_err());
    }

    #[test]
    fn test_request_must_fit_address_space() {
        assert!(PduBuilder::write_multiple_registers(0xFFFE, &[1, 2]).is_ok());
        let err = PduBuilder::write_multiple_registers(0xFFFF, &[1, 2]).unwrap_err();
        assert!(matches!(err, FuturaError::InvalidData { .. }));

        assert!(PduBuilder::read_registers(0x04, 0xFFFF, 1).is_ok());
        assert!(PduBuilder::read_registers(0x04, 0xFFFF, 2).is_err());
    }

    #[test]
    fn test_parse_registers() {
        let pdu = ModbusPdu::from_slice(&[0x04, 0x04, 0x00, 0xFB, 0xFF, 0x38]).unwrap();
        assert_eq!(pdu.parse_registers(0x04, 2).unwrap(), vec![0x00FB, 0xFF38]);
    }

    #[test]
    fn test_parse_registers_rejects_short_payload() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x04, 0x00, 0x01]).unwrap();
        assert!(matches!(
            pdu.parse_registers(0x03, 2),
            Err(FuturaError::Protocol { .. })
        ));

        // Byte count agrees with payload but not with the request
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x00, 0x01]).unwrap();
        assert!(pdu.parse_registers(0x03, 2).is_err());
    }

    #[test]
    fn test_parse_exception_response() {
        let pdu = ModbusPdu::from_slice(&[0x84, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
        assert_eq!(
            pdu.parse_registers(0x04, 10),
            Err(FuturaError::exception(0x04, 0x02))
        );
    }

    #[test]
    fn test_function_code_mismatch() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x00, 0x01]).unwrap();
        assert!(matches!(
            pdu.parse_registers(0x04, 1),
            Err(FuturaError::Protocol { .. })
        ));
    }

    #[test]
    fn test_parse_write_ack() {
        let echo = ModbusPdu::from_slice(&[0x06, 0x00, 0x00, 0x00, 0x06]).unwrap();
        assert!(echo.parse_write_ack(0x06, 0, 6).is_ok());
        assert!(echo.parse_write_ack(0x06, 0, 5).is_err());

        let ack = ModbusPdu::from_slice(&[0x10, 0x00, 0x08, 0x00, 0x02]).unwrap();
        assert!(ack.parse_write_ack(0x10, 8, 2).is_ok());
        assert!(ack.parse_write_ack(0x10, 6, 2).is_err());
    }

    #[test]
    fn test_oversized_pdu_rejected() {
        let data = vec![0u8; MAX_PDU_SIZE + 1];
        assert!(ModbusPdu::from_slice(&data).is_err());
    }
}
