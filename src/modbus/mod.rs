//! Modbus-TCP register engine.
//!
//! ```text
//!   TCP ──▶ codec (MBAP framing) ──▶ pdu (parse) ──▶ engine ──▶ Device
//!                                                      │
//!                                         registers (snapshot / layout)
//! ```
//!
//! | Module      | Responsibility                                   |
//! |-------------|--------------------------------------------------|
//! | `codec`     | Streaming MBAP decoder, response framing         |
//! | `pdu`       | Function codes, request parsing, reply builders  |
//! | `registers` | Address layout per capability, read snapshots    |
//! | `engine`    | FC03/06/10/42/43 semantics                       |
//! | `server`    | Multi-client TCP listener thread                 |

pub mod codec;
pub mod engine;
pub mod pdu;
pub mod registers;
pub mod server;

pub use engine::ModbusEngine;
pub use registers::RegisterMap;
pub use server::{ModbusServer, ServerConfig};
