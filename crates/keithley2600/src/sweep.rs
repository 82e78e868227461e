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

//! Canned sweep shapes: plain voltage sweeps, FET transfer and output curves.
//!
//! All sweeps are per-point source/settle/measure loops. Between points the
//! abort flag is polled; an aborted sweep switches the outputs off and
//! returns [`Error::Aborted`] without partial data.

use log::info;
use std::fmt;

use crate::{Error, Keithley2600, Result, ResultTable, SmuChannel};

/// A drain bias for one pass of a transfer sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrainVoltage {
    /// Constant drain voltage in volts.
    Fixed(f64),
    /// Drain follows the gate voltage point by point.
    Trailing,
}

impl fmt::Display for DrainVoltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainVoltage::Fixed(v) => write!(f, "{v} V"),
            DrainVoltage::Trailing => f.write_str("trailing"),
        }
    }
}

/// Inclusive list of sweep points from `start` to `stop`.
///
/// The direction comes from the sign of `stop - start`; only the magnitude
/// of `step` is used. A zero or non-finite step yields the single start
/// point. `stop` is included when it lies on the step grid (within float
/// tolerance); when the span is not a multiple of the step the list stops
/// short of `stop` rather than sourcing past the requested bound.
pub fn sweep_steps(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let step = step.abs();
    if step == 0.0 || !step.is_finite() {
        return vec![start];
    }

    let signed_step = if stop >= start { step } else { -step };
    let span = stop - start;
    // Tolerance absorbs accumulated float error on the step grid.
    let count = (span / signed_step + 1e-9).floor() as usize + 1;

    (0..count)
        .map(|i| start + i as f64 * signed_step)
        .collect()
}

impl Keithley2600 {
    /// Sweep one channel through `points`, measuring voltage and current at
    /// each. Returns the measured `(voltages, currents)`.
    ///
    /// `pulsed` switches the output off again after every point; otherwise
    /// the output stays on for the whole sweep. The output is always off on
    /// return, including on error or abort.
    pub fn voltage_sweep(
        &mut self,
        smu: SmuChannel,
        points: &[f64],
        t_int: f64,
        delay: f64,
        pulsed: bool,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        self.set_integration_time(smu, t_int)?;
        self.set_settling_delay(smu, delay)?;

        let result = self.sweep_points(smu, points, pulsed);
        // Leave nothing energized regardless of how the sweep ended.
        let off = self.output_off(smu);
        let (voltages, currents) = result?;
        off?;
        Ok((voltages, currents))
    }

    fn sweep_points(
        &mut self,
        smu: SmuChannel,
        points: &[f64],
        pulsed: bool,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let mut voltages = Vec::with_capacity(points.len());
        let mut currents = Vec::with_capacity(points.len());

        for &level in points {
            if self.aborted() {
                return Err(Error::Aborted);
            }
            self.apply_voltage(smu, level)?;
            voltages.push(self.measure_voltage(smu)?);
            currents.push(self.measure_current(smu)?);
            if pulsed {
                self.output_off(smu)?;
            }
        }

        Ok((voltages, currents))
    }

    /// Record a transfer curve: the gate steps through
    /// `vg_start..=vg_stop`, once per entry in `drain_voltages`.
    ///
    /// The result has one gate-voltage column, then per drain bias a
    /// drain-current and a gate-current (leakage) column.
    #[allow(clippy::too_many_arguments, reason = "mirrors the instrument operation")]
    pub fn transfer_measurement(
        &mut self,
        gate: SmuChannel,
        drain: SmuChannel,
        vg_start: f64,
        vg_stop: f64,
        vg_step: f64,
        drain_voltages: &[DrainVoltage],
        t_int: f64,
        delay: f64,
        pulsed: bool,
    ) -> Result<ResultTable> {
        let gate_points = sweep_steps(vg_start, vg_stop, vg_step);
        info!(
            "Transfer sweep: {} gate points x {} drain biases",
            gate_points.len(),
            drain_voltages.len()
        );

        for smu in [gate, drain] {
            self.set_integration_time(smu, t_int)?;
            self.set_settling_delay(smu, delay)?;
        }

        let mut titles = vec!["Gate voltage".to_owned()];
        let mut units = vec!["V".to_owned()];
        for vd in drain_voltages {
            titles.push(format!("Drain current (Vd = {vd})"));
            units.push("A".to_owned());
            titles.push(format!("Gate current (Vd = {vd})"));
            units.push("A".to_owned());
        }
        let mut table = ResultTable::new(titles, units);
        table.set_param("sweep_type", "transfer");
        record_common_params(&mut table, t_int, delay, pulsed);

        let mut rows: Vec<Vec<f64>> = gate_points.iter().map(|&vg| vec![vg]).collect();

        let result = (|| -> Result<()> {
            for &vd in drain_voltages {
                for (index, (row, &vg)) in rows.iter_mut().zip(&gate_points).enumerate() {
                    if self.aborted() {
                        return Err(Error::Aborted);
                    }
                    let drain_level = match vd {
                        DrainVoltage::Trailing => Some(vg),
                        DrainVoltage::Fixed(level) => {
                            bias_level_for_point(level, pulsed, index == 0)
                        }
                    };
                    if let Some(level) = drain_level {
                        self.apply_voltage(drain, level)?;
                    }
                    self.apply_voltage(gate, vg)?;
                    row.push(self.measure_current(drain)?);
                    row.push(self.measure_current(gate)?);
                    if pulsed {
                        self.output_off(gate)?;
                        self.output_off(drain)?;
                    }
                }
            }
            Ok(())
        })();

        self.output_off(gate)?;
        self.output_off(drain)?;
        result?;

        table.data = rows;
        Ok(table)
    }

    /// Record an output curve: the drain steps through
    /// `vd_start..=vd_stop`, once per gate voltage in `gate_voltages`.
    #[allow(clippy::too_many_arguments, reason = "mirrors the instrument operation")]
    pub fn output_measurement(
        &mut self,
        gate: SmuChannel,
        drain: SmuChannel,
        vd_start: f64,
        vd_stop: f64,
        vd_step: f64,
        gate_voltages: &[f64],
        t_int: f64,
        delay: f64,
        pulsed: bool,
    ) -> Result<ResultTable> {
        let drain_points = sweep_steps(vd_start, vd_stop, vd_step);
        info!(
            "Output sweep: {} drain points x {} gate biases",
            drain_points.len(),
            gate_voltages.len()
        );

        for smu in [gate, drain] {
            self.set_integration_time(smu, t_int)?;
            self.set_settling_delay(smu, delay)?;
        }

        let mut titles = vec!["Drain voltage".to_owned()];
        let mut units = vec!["V".to_owned()];
        for vg in gate_voltages {
            titles.push(format!("Drain current (Vg = {vg} V)"));
            units.push("A".to_owned());
            titles.push(format!("Gate current (Vg = {vg} V)"));
            units.push("A".to_owned());
        }
        let mut table = ResultTable::new(titles, units);
        table.set_param("sweep_type", "output");
        record_common_params(&mut table, t_int, delay, pulsed);

        let mut rows: Vec<Vec<f64>> = drain_points.iter().map(|&vd| vec![vd]).collect();

        let result = (|| -> Result<()> {
            for &vg in gate_voltages {
                for (index, (row, &vd)) in rows.iter_mut().zip(&drain_points).enumerate() {
                    if self.aborted() {
                        return Err(Error::Aborted);
                    }
                    if let Some(level) = bias_level_for_point(vg, pulsed, index == 0) {
                        self.apply_voltage(gate, level)?;
                    }
                    self.apply_voltage(drain, vd)?;
                    row.push(self.measure_current(drain)?);
                    row.push(self.measure_current(gate)?);
                    if pulsed {
                        self.output_off(gate)?;
                        self.output_off(drain)?;
                    }
                }
            }
            Ok(())
        })();

        self.output_off(gate)?;
        self.output_off(drain)?;
        result?;

        table.data = rows;
        Ok(table)
    }
}

/// Bias channel level to apply before one sweep point.
///
/// Pulsed sweeps switch every output off after each point, so the bias
/// channel must be re-energized at every point; continuous sweeps apply it
/// once at the first point of a pass.
fn bias_level_for_point(level: f64, pulsed: bool, first_point: bool) -> Option<f64> {
    (pulsed || first_point).then_some(level)
}

fn record_common_params(table: &mut ResultTable, t_int: f64, delay: f64, pulsed: bool) {
    table.set_param("t_int", t_int);
    table.set_param("delay", delay);
    table.set_param("pulsed", pulsed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_steps(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_forward_steps_include_stop() {
        assert_steps(&sweep_steps(0.0, 1.0, 0.25), &[0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_reverse_direction_from_bounds() {
        // Step sign is ignored; direction comes from start/stop.
        assert_steps(&sweep_steps(10.0, 0.0, 2.0), &[10.0, 8.0, 6.0, 4.0, 2.0, 0.0]);
        assert_steps(&sweep_steps(10.0, 0.0, -2.0), &[10.0, 8.0, 6.0, 4.0, 2.0, 0.0]);
    }

    #[test]
    fn test_non_divisible_span_stops_short() {
        assert_steps(&sweep_steps(0.0, 1.0, 0.4), &[0.0, 0.4, 0.8]);
    }

    #[test]
    fn test_fractional_grid() {
        // 0.1 is not exactly representable; the tolerance must still land
        // the final point on the stop value.
        let steps = sweep_steps(0.0, 0.5, 0.1);
        assert_eq!(steps.len(), 6);
        assert!((steps[5] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_steps() {
        assert_steps(&sweep_steps(2.0, 5.0, 0.0), &[2.0]);
        assert_steps(&sweep_steps(3.0, 3.0, 0.5), &[3.0]);
    }

    #[test]
    fn test_continuous_bias_applied_at_first_point_only() {
        assert_eq!(bias_level_for_point(-5.0, false, true), Some(-5.0));
        assert_eq!(bias_level_for_point(-5.0, false, false), None);
    }

    #[test]
    fn test_pulsed_bias_reapplied_at_every_point() {
        // The per-point output_off de-energizes the bias channel as well;
        // without a re-apply, every point after the first would measure
        // against an open output.
        assert_eq!(bias_level_for_point(-5.0, true, true), Some(-5.0));
        assert_eq!(bias_level_for_point(-5.0, true, false), Some(-5.0));
    }

    #[test]
    fn test_drain_voltage_display() {
        assert_eq!(DrainVoltage::Fixed(-5.0).to_string(), "-5 V");
        assert_eq!(DrainVoltage::Trailing.to_string(), "trailing");
    }
}
