// Copyright 2025 SmuLab Desktop Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Driver library for Keithley 2600-series source-measure units.
//!
//! The 2600 series speaks TSP (a Lua dialect) over any VISA transport.
//! This crate layers three things on top of the [`visa-rs`] session type:
//!
//! - **Instrument layer**: session lifecycle, raw `write`/`query` helpers,
//!   and typed wrappers for the SMU commands the GUI needs (source level,
//!   measurements, limits, sense mode, integration time).
//! - **Sweep layer**: transfer, output, and plain voltage sweeps built from
//!   per-point source/settle/measure loops, with cooperative abort.
//! - **Result layer**: [`ResultTable`], a plain-text tabular format with
//!   `#`-prefixed parameter headers, used for saving and reloading data.
//!
//! The VISA transport itself (addressing, GPIB/USB/TCPIP plumbing) is owned
//! entirely by `visa-rs`; nothing in here talks to hardware below the level
//! of an SCPI/TSP command string.
//!
//! # Quick start
//!
//! ```no_run
//! use keithley2600::{Keithley2600, SmuChannel};
//! use std::time::Duration;
//!
//! let mut k = Keithley2600::new("TCPIP0::192.168.2.121::INSTR", Duration::from_secs(5));
//! k.connect()?;
//! k.apply_voltage(SmuChannel::A, 1.5)?;
//! let current = k.measure_current(SmuChannel::A)?;
//! println!("I = {current:.3e} A");
//! k.output_off(SmuChannel::A)?;
//! # Ok::<(), keithley2600::Error>(())
//! ```

pub mod instrument;
pub mod result_table;
pub mod sweep;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use instrument::Keithley2600;
pub use result_table::ResultTable;
pub use sweep::{sweep_steps, DrainVoltage};

/// Errors produced by the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error reported by the VISA layer (transport, timeout, session).
    #[error("VISA error: {0}")]
    Visa(#[from] visa_rs::Error),

    /// The resource string could not be converted for the VISA layer.
    #[error("invalid VISA address: {0}")]
    Address(String),

    /// The instrument replied with something that did not parse.
    #[error("unparseable reply {reply:?} to command {command:?}")]
    Parse { command: String, reply: String },

    /// An operation was attempted without an open session.
    #[error("no instrument connected")]
    NotConnected,

    /// A sweep or measurement was aborted by request.
    #[error("measurement aborted")]
    Aborted,

    /// Filesystem error while saving or loading a result table.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed result table file.
    #[error("result table format: {0}")]
    Table(String),

    /// CSV layer error while reading or writing a result table.
    #[error("table serialization: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Whether this error looks like a VISA communication timeout.
    ///
    /// Used by retry loops to decide if a reset-and-retry is worth a shot.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Visa(e) => e.to_string().contains("TMO"),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One of the two SMU channels of a 2600-series instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmuChannel {
    A,
    B,
}

impl SmuChannel {
    /// All channels, in TSP order.
    pub const ALL: [SmuChannel; 2] = [SmuChannel::A, SmuChannel::B];

    /// TSP node name (`smua` / `smub`).
    pub fn node(self) -> &'static str {
        match self {
            SmuChannel::A => "smua",
            SmuChannel::B => "smub",
        }
    }

    /// The other channel of the pair.
    pub fn other(self) -> SmuChannel {
        match self {
            SmuChannel::A => SmuChannel::B,
            SmuChannel::B => SmuChannel::A,
        }
    }
}

impl fmt::Display for SmuChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node())
    }
}

/// Voltage sense wiring mode for an SMU channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SenseMode {
    /// 2-wire sensing at the output terminals.
    #[default]
    Local,
    /// 4-wire remote sensing.
    Remote,
}

impl SenseMode {
    /// TSP constant name for this mode on the given channel.
    pub fn tsp_constant(self, smu: SmuChannel) -> String {
        match self {
            SenseMode::Local => format!("{}.SENSE_LOCAL", smu.node()),
            SenseMode::Remote => format!("{}.SENSE_REMOTE", smu.node()),
        }
    }
}

impl fmt::Display for SenseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenseMode::Local => f.write_str("local (2-wire)"),
            SenseMode::Remote => f.write_str("remote (4-wire)"),
        }
    }
}

/// Per-channel compliance and wiring settings applied before a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmuSettings {
    pub sense: SenseMode,
    /// Current compliance limit in amps.
    pub limit_i: f64,
    /// Voltage compliance limit in volts.
    pub limit_v: f64,
    /// High-capacitance mode for loads that oscillate otherwise.
    pub high_c: bool,
}

impl Default for SmuSettings {
    fn default() -> Self {
        Self {
            sense: SenseMode::Local,
            limit_i: 0.1,
            limit_v: 200.0,
            high_c: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_nodes() {
        assert_eq!(SmuChannel::A.node(), "smua");
        assert_eq!(SmuChannel::B.node(), "smub");
        assert_eq!(SmuChannel::A.other(), SmuChannel::B);
        assert_eq!(SmuChannel::B.other(), SmuChannel::A);
    }

    #[test]
    fn test_sense_constants() {
        assert_eq!(
            SenseMode::Local.tsp_constant(SmuChannel::A),
            "smua.SENSE_LOCAL"
        );
        assert_eq!(
            SenseMode::Remote.tsp_constant(SmuChannel::B),
            "smub.SENSE_REMOTE"
        );
    }
}
