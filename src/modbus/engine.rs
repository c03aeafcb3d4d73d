//! Request dispatch: the register semantics behind every function code.
//!
//! The engine is stateless apart from the resolved [`RegisterMap`]; all
//! device state lives in [`Device`] and is passed in by the caller, which
//! holds the device lock for the whole request. A read therefore sees one
//! consistent snapshot and a write is never interleaved with a tick.
//!
//! Persistence failures are logged and absorbed: the register write
//! succeeds in RAM and the change stays pending for a later commit.

use log::{debug, error, info, warn};

use crate::app::commands::SwitchSource;
use crate::app::ports::{EventSink, PersistPort, WallTime};
use crate::app::service::Device;
use crate::config::Capabilities;
use crate::energy::MeasureKind;
use crate::scheduler::{NUM_TIMERS, Timer};
use crate::store::CommitOutcome;

use super::codec::{MbapFrame, encode_frame};
use super::pdu::{self, ExceptionCode, FunctionCode, Pdu, Request};
use super::registers::{
    REG_AUTO_OFF_CYCLES, REG_AUTO_OFF_THRESHOLD, REG_FLAGS, REG_SWITCH, REG_TIMERS, REG_TIMERS_END,
    REG_WATT_HOURS, RegisterMap,
};

type Outcome = Result<Pdu, ExceptionCode>;

pub struct ModbusEngine {
    unit_id: u8,
    map: RegisterMap,
}

impl ModbusEngine {
    pub fn new(caps: Capabilities, unit_id: u8) -> Self {
        Self {
            unit_id,
            map: RegisterMap::new(caps),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Function codes this device answers; others get `IllegalFunction`.
    pub fn is_registered(&self, fc: FunctionCode) -> bool {
        match fc {
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::WriteSingleRegister
            | FunctionCode::CommitPending => true,
            FunctionCode::WriteMultipleRegisters => self.map.caps().timers,
            FunctionCode::Calibrate => self.map.caps().power_meter,
        }
    }

    /// Handle one MBAP frame, writing the response ADU into `out`.
    ///
    /// Returns `None` when no reply must be sent (foreign unit id).
    pub fn handle_frame<P: PersistPort>(
        &self,
        frame: &MbapFrame<'_>,
        dev: &mut Device<P>,
        now: Option<WallTime>,
        sink: &mut impl EventSink,
        out: &mut [u8],
    ) -> Option<usize> {
        if frame.header.unit_id != self.unit_id {
            debug!("Modbus: frame for unit {} ignored", frame.header.unit_id);
            return None;
        }
        let resp = self.handle_pdu(frame.pdu, dev, now, sink);
        encode_frame(frame.header.transaction_id, self.unit_id, &resp, out)
    }

    /// Handle one request PDU and build the response PDU.
    pub fn handle_pdu<P: PersistPort>(
        &self,
        pdu: &[u8],
        dev: &mut Device<P>,
        now: Option<WallTime>,
        sink: &mut impl EventSink,
    ) -> Pdu {
        let (fc, req) = match Request::parse(pdu) {
            Ok(parsed) => parsed,
            Err((raw_fc, code)) => {
                warn!("Modbus: FC {:#04x} rejected: {}", raw_fc, code);
                return pdu::exception(raw_fc, code);
            }
        };
        if !self.is_registered(fc) {
            warn!("Modbus: FC {:#04x} not available on this device", fc as u8);
            return pdu::exception(fc as u8, ExceptionCode::IllegalFunction);
        }

        let outcome = match req {
            Request::ReadHolding { address, count } => self.read_holding(address, count, dev),
            Request::WriteSingle { address, value } => {
                self.write_single(address, value, dev, now, sink).map(|()| pdu::echo(pdu))
            }
            Request::WriteMultiple {
                address,
                count,
                byte_count,
                data,
            } => self.write_timers(address, count, byte_count, data, dev),
            Request::Commit => commit(dev, sink),
            Request::Calibrate { payload } => calibrate(payload, dev),
        };

        outcome.unwrap_or_else(|code| {
            debug!("Modbus: FC {:#04x} -> exception {}", fc as u8, code);
            pdu::exception(fc as u8, code)
        })
    }

    // ── FC03 ──────────────────────────────────────────────────

    fn read_holding<P: PersistPort>(&self, address: u16, count: u16, dev: &Device<P>) -> Outcome {
        if !self.map.read_range_valid(address, count) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        let snapshot = self.map.snapshot(dev);
        let bytes = RegisterMap::slice(&snapshot, address, count);

        let mut out = Pdu::new();
        // Cannot fail: count < 126 keeps the response under 253 bytes.
        let _ = out.push(FunctionCode::ReadHoldingRegisters as u8);
        let _ = out.push(bytes.len() as u8);
        let _ = out.extend_from_slice(bytes);
        Ok(out)
    }

    // ── FC06 ──────────────────────────────────────────────────

    fn write_single<P: PersistPort>(
        &self,
        address: u16,
        value: u16,
        dev: &mut Device<P>,
        now: Option<WallTime>,
        sink: &mut impl EventSink,
    ) -> Result<(), ExceptionCode> {
        let power = self.map.caps().power_meter;
        match address {
            REG_SWITCH => {
                let value = u8::try_from(value).map_err(|_| ExceptionCode::IllegalDataValue)?;
                dev.set_switch(value != 0, value, SwitchSource::Modbus, now, sink);
            }
            REG_FLAGS => {
                if let Err(e) = dev.stage_flags(value) {
                    error!("Modbus: flag word not staged: {}", e);
                }
            }
            REG_WATT_HOURS if power => {
                if value != 0 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                dev.reset_energy();
            }
            REG_AUTO_OFF_THRESHOLD if power => {
                if let Err(e) = dev.set_auto_off(Some(value), None) {
                    error!("Modbus: auto-off threshold not persisted: {}", e);
                }
            }
            REG_AUTO_OFF_CYCLES if power => {
                if let Err(e) = dev.set_auto_off(None, Some(value)) {
                    error!("Modbus: auto-off cycles not persisted: {}", e);
                }
            }
            _ => return Err(ExceptionCode::IllegalDataAddress),
        }
        Ok(())
    }

    // ── FC10 ──────────────────────────────────────────────────

    fn write_timers<P: PersistPort>(
        &self,
        address: u16,
        count: u16,
        byte_count: u8,
        data: &[u8],
        dev: &mut Device<P>,
    ) -> Outcome {
        let end = u32::from(address) + u32::from(count);
        if count == 0 || address < REG_TIMERS || end - 1 > u32::from(REG_TIMERS_END) {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if (address - REG_TIMERS) % 2 != 0 || count % 2 != 0 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if usize::from(byte_count) != 2 * usize::from(count) || data.len() != usize::from(byte_count) {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let first = usize::from(address - REG_TIMERS) / 2;
        let mut timers: heapless::Vec<Timer, NUM_TIMERS> = heapless::Vec::new();
        for chunk in data.chunks_exact(4) {
            let regs = [
                u16::from_be_bytes([chunk[0], chunk[1]]),
                u16::from_be_bytes([chunk[2], chunk[3]]),
            ];
            // Cannot fail: at most 16 slots pass the range check.
            let _ = timers.push(Timer::from_registers(regs));
        }
        if let Err(e) = dev.write_timers(first, &timers) {
            error!("Modbus: timers not persisted: {}", e);
        }
        Ok(pdu::address_count(FunctionCode::WriteMultipleRegisters, address, count))
    }
}

// ── FC42 ──────────────────────────────────────────────────────

fn commit<P: PersistPort>(dev: &mut Device<P>, sink: &mut impl EventSink) -> Outcome {
    match dev.commit(sink) {
        Ok(CommitOutcome::Committed) => Ok(pdu::ack(FunctionCode::CommitPending)),
        Ok(CommitOutcome::NothingPending) => {
            debug!("Modbus: commit with nothing pending");
            Err(ExceptionCode::NegativeAcknowledge)
        }
        Err(e) => {
            // Still pending; the client may retry.
            error!("Modbus: commit failed: {}", e);
            Err(ExceptionCode::NegativeAcknowledge)
        }
    }
}

// ── FC43 ──────────────────────────────────────────────────────

fn calibrate<P: PersistPort>(payload: &[u8], dev: &mut Device<P>) -> Outcome {
    let observed = match payload.len() {
        1 => None,
        5 => Some(f32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]])),
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    let kind = MeasureKind::from_u8(payload[0]).ok_or(ExceptionCode::IllegalDataValue)?;
    match dev.calibrate(kind, observed) {
        Ok(factor) => info!("Modbus: {:?} calibrated, factor={}", kind, factor),
        Err(e) => error!("Modbus: {:?} factor not staged: {}", kind, e),
    }
    Ok(pdu::ack(FunctionCode::Calibrate))
}
