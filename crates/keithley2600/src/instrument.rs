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

//! VISA session handling and TSP command wrappers.

use log::{debug, info};
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use visa_rs::prelude::*;

use crate::{Error, Result, SmuChannel, SmuSettings};

/// An open VISA session. The instrument handle must be released before the
/// resource manager, hence the field order.
struct Session {
    instr: Instrument,
    _rm: DefaultRM,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Handle to a Keithley 2600-series instrument.
///
/// The handle is usable before `connect()`; every command then fails with
/// [`Error::NotConnected`], which lets the GUI construct it eagerly from the
/// saved address and connect later.
#[derive(Debug)]
pub struct Keithley2600 {
    visa_address: String,
    timeout: Duration,
    session: Option<Session>,
    abort: Arc<AtomicBool>,
}

impl Keithley2600 {
    /// Create an unconnected handle for the given VISA resource string.
    pub fn new(visa_address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            visa_address: visa_address.into(),
            timeout,
            session: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The VISA resource string this handle targets.
    pub fn visa_address(&self) -> &str {
        &self.visa_address
    }

    /// Change the target address. Takes effect on the next `connect()`.
    pub fn set_visa_address(&mut self, address: impl Into<String>) {
        self.visa_address = address.into();
    }

    /// Change the I/O timeout. Takes effect on the next `connect()`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Shared abort flag. Setting it makes any running sweep return
    /// [`Error::Aborted`] at the next step boundary.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Request that the current sweep stops at the next point.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Clear the abort flag. Called at the start of every sweep.
    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::Relaxed);
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Whether a VISA session is currently open.
    pub fn connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open a VISA session and clear the instrument error queue.
    ///
    /// Returns the instrument model string as a liveness check.
    pub fn connect(&mut self) -> Result<String> {
        if self.session.is_none() {
            let rm = DefaultRM::new()?;
            let resource = CString::new(self.visa_address.as_str())
                .map_err(|_| Error::Address(self.visa_address.clone()))?;
            let instr = rm.open(&resource.into(), AccessMode::NO_LOCK, self.timeout)?;
            self.session = Some(Session { instr, _rm: rm });
            info!("Opened VISA session to {}", self.visa_address);
        }

        self.write("errorqueue.clear()")?;
        let model = self.model()?;
        info!("Connected to Keithley model {model}");
        Ok(model)
    }

    /// Drop the VISA session. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if self.session.take().is_some() {
            info!("Closed VISA session to {}", self.visa_address);
        }
    }

    /// Send a raw TSP command, terminated with a newline.
    pub fn write(&mut self, command: &str) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        debug!("-> {command}");
        session
            .instr
            .write_all(command.as_bytes())
            .map_err(visa_rs::io_to_vs_err)?;
        session
            .instr
            .write_all(b"\n")
            .map_err(visa_rs::io_to_vs_err)?;
        Ok(())
    }

    /// Send a TSP command and read back one reply line.
    pub fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        let mut reply = String::new();
        {
            // Scope the reader so the borrow of the session ends here.
            let mut reader = BufReader::new(&session.instr);
            reader
                .read_line(&mut reply)
                .map_err(visa_rs::io_to_vs_err)?;
        }
        let reply = reply.trim().to_owned();
        debug!("<- {reply}");
        Ok(reply)
    }

    /// Send a TSP command and parse the reply as a float.
    pub fn query_float(&mut self, command: &str) -> Result<f64> {
        let reply = self.query(command)?;
        reply.parse::<f64>().map_err(|_| Error::Parse {
            command: command.to_owned(),
            reply,
        })
    }

    /// Instrument model string, e.g. `2636B`.
    pub fn model(&mut self) -> Result<String> {
        self.query("print(localnode.model)")
    }

    /// Power line frequency in Hz, used to bound integration times.
    pub fn line_frequency(&mut self) -> Result<f64> {
        self.query_float("print(localnode.linefreq)")
    }

    /// Source a DC voltage on the given channel and switch its output on.
    pub fn apply_voltage(&mut self, smu: SmuChannel, voltage: f64) -> Result<()> {
        let n = smu.node();
        self.write(&format!("{n}.source.func = {n}.OUTPUT_DCVOLTS"))?;
        self.write(&format!("{n}.source.levelv = {voltage:.9e}"))?;
        self.write(&format!("{n}.source.output = {n}.OUTPUT_ON"))
    }

    /// Switch the output of the given channel off.
    pub fn output_off(&mut self, smu: SmuChannel) -> Result<()> {
        let n = smu.node();
        self.write(&format!("{n}.source.output = {n}.OUTPUT_OFF"))
    }

    /// Measure the voltage at the given channel.
    pub fn measure_voltage(&mut self, smu: SmuChannel) -> Result<f64> {
        self.query_float(&format!("print({}.measure.v())", smu.node()))
    }

    /// Measure the current through the given channel.
    pub fn measure_current(&mut self, smu: SmuChannel) -> Result<f64> {
        self.query_float(&format!("print({}.measure.i())", smu.node()))
    }

    /// Apply compliance limits, sense wiring, and high-C mode to a channel.
    ///
    /// Note: `reset()` reverts these.
    pub fn apply_settings(&mut self, smu: SmuChannel, settings: &SmuSettings) -> Result<()> {
        let n = smu.node();
        self.write(&format!(
            "{n}.sense = {}",
            settings.sense.tsp_constant(smu)
        ))?;
        self.write(&format!("{n}.source.limiti = {:.9e}", settings.limit_i))?;
        self.write(&format!(
            "{n}.trigger.source.limiti = {:.9e}",
            settings.limit_i
        ))?;
        self.write(&format!("{n}.source.limitv = {:.9e}", settings.limit_v))?;
        self.write(&format!(
            "{n}.trigger.source.limitv = {:.9e}",
            settings.limit_v
        ))?;
        self.write(&format!(
            "{n}.source.highc = {}",
            u8::from(settings.high_c)
        ))
    }

    /// Set the A/D integration time for a channel, in seconds.
    ///
    /// The instrument takes this as NPLC (number of power line cycles).
    pub fn set_integration_time(&mut self, smu: SmuChannel, t_int: f64) -> Result<()> {
        let freq = self.line_frequency()?;
        let n = smu.node();
        self.write(&format!("{n}.measure.nplc = {:.6}", t_int * freq))
    }

    /// Set the source settling delay for a channel. Negative means auto.
    pub fn set_settling_delay(&mut self, smu: SmuChannel, delay: f64) -> Result<()> {
        let n = smu.node();
        if delay < 0.0 {
            self.write(&format!("{n}.measure.delay = {n}.DELAY_AUTO"))
        } else {
            self.write(&format!("{n}.measure.delay = {delay:.9e}"))
        }
    }

    /// Reset the instrument to factory defaults (outputs off).
    pub fn reset(&mut self) -> Result<()> {
        self.write("reset()")
    }

    /// Sound the instrument beeper.
    pub fn beep(&mut self, duration_s: f64, frequency_hz: u32) -> Result<()> {
        self.write(&format!("beeper.beep({duration_s:.1}, {frequency_hz})"))
    }
}
