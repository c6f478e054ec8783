//! Modbus protocol constants used by the Futura session
//!
//! Only the subset of the Modbus application protocol the ventilation unit
//! speaks is described here:
//! - FC03/FC04 for the holding and input register regions
//! - FC06/FC16 for the command registers
//! - MBAP framing for Modbus TCP

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length including the unit identifier
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Modbus protocol identifier carried in every MBAP header
pub const MODBUS_PROTOCOL_ID: u16 = 0;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04
///
/// Response PDU: FC(1) + Byte Count(1) + N × 2 ≤ 253, so N ≤ 125.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers for FC16
///
/// Request PDU: FC(1) + Address(2) + Quantity(2) + Byte Count(1) + N × 2 ≤ 253,
/// so N ≤ 123.
pub const MAX_WRITE_REGISTERS: u16 = 123;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// Human-readable name of an exception code
pub fn exception_name(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "illegal function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "illegal data address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "illegal data value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "server device failure",
        EXCEPTION_ACKNOWLEDGE => "acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "server device busy",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "gateway path unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "gateway target failed to respond",
        _ => "unknown exception",
    }
}

/// Human-readable name of a function code (exception flag ignored)
pub fn function_name(fc: u8) -> &'static str {
    match fc & !EXCEPTION_FLAG {
        FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
        FC_READ_INPUT_REGISTERS => "Read Input Registers",
        FC_WRITE_SINGLE_REGISTER => "Write Single Register",
        FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
        _ => "Unknown Function",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MBAP_HEADER_LEN, 7);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_MBAP_LENGTH, 254);
    }

    #[test]
    fn test_register_limits() {
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS as usize * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);

        let write_pdu_size = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS as usize * 2);
        assert!(write_pdu_size <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_names() {
        assert_eq!(exception_name(0x02), "illegal data address");
        assert_eq!(exception_name(0x7F), "unknown exception");
        assert_eq!(function_name(0x84), "Read Input Registers");
        assert_eq!(function_name(0x10), "Write Multiple Registers");
    }
}
