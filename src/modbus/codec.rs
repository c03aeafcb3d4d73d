//! MBAP frame codec (Modbus application protocol header over TCP).
//!
//! Wire format:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────┬─────────────────────┐
//! │ Txn (2B) │ Proto(2B)│ Len (2B) │ Unit │ PDU (Len − 1 bytes) │
//! │  BE u16  │  0x0000  │  BE u16  │  1B  │ fc + data           │
//! └──────────┴──────────┴──────────┴──────┴─────────────────────┘
//! ```
//!
//! The decoder accumulates incoming bytes and yields complete frames. This
//! handles partial reads gracefully: a single socket read may return part
//! of the header, part of the PDU, or several frames back to back.
//!
//! Frames with a non-zero protocol id are skipped whole. A length outside
//! `2..=254` cannot be framed at all; the header is dropped and decoding
//! restarts at the next byte boundary the stream offers.

/// MBAP header size including the unit id.
pub const MBAP_HEADER_SIZE: usize = 7;

/// Largest PDU Modbus allows (function code + 252 data bytes).
pub const MAX_PDU_SIZE: usize = 253;

/// Largest complete ADU on the wire.
pub const MAX_ADU_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

/// Decoded MBAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Byte count of unit id + PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(raw: &[u8; MBAP_HEADER_SIZE]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([raw[0], raw[1]]),
            protocol_id: u16::from_be_bytes([raw[2], raw[3]]),
            length: u16::from_be_bytes([raw[4], raw[5]]),
            unit_id: raw[6],
        }
    }

    fn pdu_len(&self) -> Option<usize> {
        let len = usize::from(self.length);
        (2..=MAX_PDU_SIZE + 1).contains(&len).then_some(len - 1)
    }
}

/// One complete request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapFrame<'a> {
    pub header: MbapHeader,
    pub pdu: &'a [u8],
}

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading the PDU.
    ReadingPdu {
        header: MbapHeader,
        expected: usize,
        collected: usize,
    },
    /// Foreign protocol id: swallowing its PDU.
    Skipping { remaining: usize },
}

/// Streaming MBAP decoder, one per connection.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; MBAP_HEADER_SIZE],
    pdu_buf: [u8; MAX_PDU_SIZE],
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; MBAP_HEADER_SIZE],
            pdu_buf: [0; MAX_PDU_SIZE],
        }
    }

    /// Feed bytes into the decoder.
    ///
    /// Returns the number of bytes consumed and, if one completed, a frame.
    /// Bytes after a completed frame are left unconsumed; call again with
    /// the remainder. The frame borrows the decoder until the next call.
    pub fn feed(&mut self, data: &[u8]) -> (usize, Option<MbapFrame<'_>>) {
        let mut offset = 0;

        while offset < data.len() {
            let available = data.len() - offset;
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let to_copy = (MBAP_HEADER_SIZE - *collected).min(available);
                    self.header_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == MBAP_HEADER_SIZE {
                        let header = MbapHeader::parse(&self.header_buf);
                        self.state = match (header.protocol_id, header.pdu_len()) {
                            (0, Some(expected)) => DecoderState::ReadingPdu {
                                header,
                                expected,
                                collected: 0,
                            },
                            (_, Some(pdu_len)) => {
                                log::warn!("Modbus: protocol id {} ignored", header.protocol_id);
                                DecoderState::Skipping { remaining: pdu_len }
                            }
                            (_, None) => {
                                log::warn!("Modbus: bad MBAP length {}, header dropped", header.length);
                                DecoderState::ReadingHeader { collected: 0 }
                            }
                        };
                    }
                }

                DecoderState::ReadingPdu {
                    header,
                    expected,
                    collected,
                } => {
                    let to_copy = (*expected - *collected).min(available);
                    self.pdu_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);
                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == *expected {
                        let header = *header;
                        let len = *expected;
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                        return (
                            offset,
                            Some(MbapFrame {
                                header,
                                pdu: &self.pdu_buf[..len],
                            }),
                        );
                    }
                }

                DecoderState::Skipping { remaining } => {
                    let to_skip = (*remaining).min(available);
                    *remaining -= to_skip;
                    offset += to_skip;
                    if *remaining == 0 {
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                    }
                }
            }
        }

        (offset, None)
    }

    /// Reset decoder state (e.g. when a client reconnects).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
    }
}

/// Encode a response PDU behind an MBAP header.
///
/// Writes `[txn][0x0000][len][unit][pdu]` into `out_buf` and returns the
/// total number of bytes written.
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8], out_buf: &mut [u8]) -> Option<usize> {
    let total = MBAP_HEADER_SIZE + pdu.len();
    if pdu.is_empty() || pdu.len() > MAX_PDU_SIZE || total > out_buf.len() {
        return None;
    }

    out_buf[0..2].copy_from_slice(&transaction_id.to_be_bytes());
    out_buf[2..4].copy_from_slice(&0u16.to_be_bytes());
    out_buf[4..6].copy_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    out_buf[6] = unit_id;
    out_buf[MBAP_HEADER_SIZE..total].copy_from_slice(pdu);

    Some(total)
}
