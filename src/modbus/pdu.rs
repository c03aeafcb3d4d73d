//! Modbus PDU types: function codes, exception codes and request parsing.
//!
//! | Code | Request                        | Response                     |
//! |------|--------------------------------|------------------------------|
//! | 0x03 | addr, count                    | byte count, register data    |
//! | 0x06 | addr, value                    | echo                         |
//! | 0x10 | addr, count, byte count, data  | addr, count                  |
//! | 0x42 | (none)                         | fc only, or NAK              |
//! | 0x43 | type [, f32 value]             | fc only                      |
//!
//! Exceptions are `[fc | 0x80, code]`.

use heapless::Vec;

use super::codec::MAX_PDU_SIZE;

/// Response PDU buffer.
pub type Pdu = Vec<u8, MAX_PDU_SIZE>;

/// Largest register count a single read may ask for (exclusive).
pub const MAX_READ_COUNT: u16 = 126;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
    WriteMultipleRegisters = 0x10,
    /// Vendor: make staged settings durable.
    CommitPending = 0x42,
    /// Vendor: add a calibration sample.
    Calibrate = 0x43,
}

impl FunctionCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x06 => Some(Self::WriteSingleRegister),
            0x10 => Some(Self::WriteMultipleRegisters),
            0x42 => Some(Self::CommitPending),
            0x43 => Some(Self::Calibrate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    /// Valid request with nothing to do.
    NegativeAcknowledge = 0x07,
}

impl core::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function"),
            Self::IllegalDataAddress => write!(f, "illegal data address"),
            Self::IllegalDataValue => write!(f, "illegal data value"),
            Self::NegativeAcknowledge => write!(f, "negative acknowledge"),
        }
    }
}

/// A parsed request PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    ReadHolding { address: u16, count: u16 },
    WriteSingle { address: u16, value: u16 },
    /// `data` is everything after the byte-count field, unchecked.
    WriteMultiple {
        address: u16,
        count: u16,
        byte_count: u8,
        data: &'a [u8],
    },
    Commit,
    Calibrate { payload: &'a [u8] },
}

impl<'a> Request<'a> {
    /// Parse a PDU. Unknown codes yield `IllegalFunction`, truncated
    /// fixed-size requests `IllegalDataValue`.
    pub fn parse(pdu: &'a [u8]) -> Result<(FunctionCode, Self), (u8, ExceptionCode)> {
        let Some(&raw_fc) = pdu.first() else {
            return Err((0, ExceptionCode::IllegalFunction));
        };
        let fc = FunctionCode::from_u8(raw_fc).ok_or((raw_fc, ExceptionCode::IllegalFunction))?;
        let word = |i: usize| u16::from_be_bytes([pdu[i], pdu[i + 1]]);

        let req = match fc {
            FunctionCode::ReadHoldingRegisters | FunctionCode::WriteSingleRegister => {
                if pdu.len() != 5 {
                    return Err((raw_fc, ExceptionCode::IllegalDataValue));
                }
                if fc == FunctionCode::ReadHoldingRegisters {
                    Request::ReadHolding {
                        address: word(1),
                        count: word(3),
                    }
                } else {
                    Request::WriteSingle {
                        address: word(1),
                        value: word(3),
                    }
                }
            }
            FunctionCode::WriteMultipleRegisters => {
                if pdu.len() < 6 {
                    return Err((raw_fc, ExceptionCode::IllegalDataValue));
                }
                Request::WriteMultiple {
                    address: word(1),
                    count: word(3),
                    byte_count: pdu[5],
                    data: &pdu[6..],
                }
            }
            FunctionCode::CommitPending => Request::Commit,
            FunctionCode::Calibrate => Request::Calibrate { payload: &pdu[1..] },
        };
        Ok((fc, req))
    }
}

// ── Response builders ─────────────────────────────────────────

pub fn exception(fc: u8, code: ExceptionCode) -> Pdu {
    let mut out = Pdu::new();
    // Cannot fail: two bytes fit.
    let _ = out.extend_from_slice(&[fc | 0x80, code as u8]);
    out
}

/// Response carrying only the function code.
pub fn ack(fc: FunctionCode) -> Pdu {
    let mut out = Pdu::new();
    let _ = out.push(fc as u8);
    out
}

/// Echo of the request PDU (write single).
pub fn echo(pdu: &[u8]) -> Pdu {
    let mut out = Pdu::new();
    let _ = out.extend_from_slice(&pdu[..pdu.len().min(MAX_PDU_SIZE)]);
    out
}

/// `[fc, addr, count]` (write multiple).
pub fn address_count(fc: FunctionCode, address: u16, count: u16) -> Pdu {
    let mut out = Pdu::new();
    let _ = out.push(fc as u8);
    let _ = out.extend_from_slice(&address.to_be_bytes());
    let _ = out.extend_from_slice(&count.to_be_bytes());
    out
}
