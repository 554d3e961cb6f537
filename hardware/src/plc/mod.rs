//! Beckhoff TwinCAT PLC Symbol Interface
//!
//! The hardpoint test stand is run by a TwinCAT PLC reached over ADS. The
//! stand software only needs symbolic access: batch reads of a list of
//! symbol names, single reads, and typed writes.
//!
//! # Addressing
//!
//! ADS targets are identified by an AMS Net ID (six dotted octets, e.g.
//! `10.10.160.129.1.1`) and a port; the PLC runtime listens on 851.
//!
//! The ADS transport is external. [`crate::sim::SimulatedController`]
//! implements [`ControllerInterface`] for dry runs and tests.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::Disconnect;

/// Default TwinCAT 3 PLC runtime port.
pub const DEFAULT_ADS_PORT: u16 = 851;

/// Errors returned by controller operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlcError {
    /// AMS Net ID could not be parsed
    #[error("invalid AMS Net ID: {0}")]
    InvalidNetId(String),

    /// Target unreachable or refused the connection
    #[error("failed to connect to PLC at {addr}: {reason}")]
    Connection { addr: String, reason: String },

    /// Symbol not present in the PLC symbol table
    #[error("unknown PLC symbol: {0}")]
    UnknownSymbol(String),

    /// Value type does not match the declared symbol type
    #[error("type mismatch for {symbol}: expected {expected}, got {actual}")]
    TypeMismatch {
        symbol: String,
        expected: PlcType,
        actual: String,
    },

    /// ADS call failed mid-session
    #[error("ADS request failed: {0}")]
    Request(String),

    /// Connection already closed
    #[error("PLC connection closed")]
    Closed,
}

/// Result alias for controller operations.
pub type PlcResult<T> = Result<T, PlcError>;

/// AMS Net ID: six octets, written dotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmsNetId([u8; 6]);

impl AmsNetId {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for AmsNetId {
    type Err = PlcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PlcError::InvalidNetId(s.to_string());

        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            *octet = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}.{b}.{c}.{d}.{e}.{g}")
    }
}

/// Full ADS target: Net ID plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmsAddr {
    pub net_id: AmsNetId,
    pub port: u16,
}

impl AmsAddr {
    pub fn new(net_id: AmsNetId, port: u16) -> Self {
        Self { net_id, port }
    }
}

impl fmt::Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

/// Declared PLC data type of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlcType {
    Bool,
    Int,
    DInt,
    LInt,
    ULInt,
    Real,
    LReal,
    String,
}

impl fmt::Display for PlcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlcType::Bool => "BOOL",
            PlcType::Int => "INT",
            PlcType::DInt => "DINT",
            PlcType::LInt => "LINT",
            PlcType::ULInt => "ULINT",
            PlcType::Real => "REAL",
            PlcType::LReal => "LREAL",
            PlcType::String => "STRING",
        };
        f.write_str(name)
    }
}

/// Value of a PLC symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl SymbolValue {
    /// Numeric view; booleans map to 0/1, text is parsed if possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SymbolValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SymbolValue::Int(i) => Some(*i as f64),
            SymbolValue::Real(r) => Some(*r),
            SymbolValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SymbolValue::Int(i) => Some(*i),
            SymbolValue::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            SymbolValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SymbolValue::Bool(b) => Some(*b),
            SymbolValue::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Whether this value can be written to a symbol of type `plc_type`.
    pub fn fits(&self, plc_type: PlcType) -> bool {
        matches!(
            (self, plc_type),
            (SymbolValue::Bool(_), PlcType::Bool)
                | (
                    SymbolValue::Int(_),
                    PlcType::Int | PlcType::DInt | PlcType::LInt | PlcType::ULInt
                )
                | (SymbolValue::Real(_), PlcType::Real | PlcType::LReal)
                | (SymbolValue::Text(_), PlcType::String)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            SymbolValue::Bool(_) => "bool",
            SymbolValue::Int(_) => "integer",
            SymbolValue::Real(_) => "real",
            SymbolValue::Text(_) => "string",
        }
    }
}

impl fmt::Display for SymbolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            SymbolValue::Int(i) => write!(f, "{i}"),
            SymbolValue::Real(r) => write!(f, "{r}"),
            SymbolValue::Text(s) => f.write_str(s),
        }
    }
}

/// Values from one batch read, keyed by symbol name.
pub type SymbolBatch = HashMap<String, SymbolValue>;

/// Check a value against the declared type before writing it.
pub fn check_write_type(symbol: &str, value: &SymbolValue, plc_type: PlcType) -> PlcResult<()> {
    if value.fits(plc_type) {
        Ok(())
    } else {
        Err(PlcError::TypeMismatch {
            symbol: symbol.to_string(),
            expected: plc_type,
            actual: value.kind().to_string(),
        })
    }
}

/// Symbolic access to the stand controller.
pub trait ControllerInterface: Disconnect<Error = PlcError> {
    /// Address of the local ADS endpoint, for diagnostics.
    fn local_address(&self) -> AmsAddr;

    /// Read a single symbol.
    fn read_by_name(&mut self, name: &str) -> PlcResult<SymbolValue>;

    /// Read a list of symbols in one request.
    fn read_list_by_name(&mut self, names: &[String]) -> PlcResult<SymbolBatch>;

    /// Write a value to a symbol of the declared type.
    fn write_by_name(&mut self, name: &str, value: SymbolValue, plc_type: PlcType)
        -> PlcResult<()>;
}
