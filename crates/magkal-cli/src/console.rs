//! Interactive stepping: aim the simulated sensor from a prompt and watch the
//! filter move.

use std::io::{BufRead, Write};

use anyhow::Result;
use magkal_core::FilterHandle;
use magkal_sim::{Direction, ManualMeasurer, Measurer};

/// Read commands from `input` until `q` or end of input. Returns the number
/// of accepted measurement updates.
///
/// Commands: `theta` or `theta,phi` in degrees; `a` sweeps the whole
/// circle (sphere in 3-D); `q` quits.
pub fn run_console<R: BufRead, W: Write>(
    input: R,
    out: &mut W,
    handle: &FilterHandle,
    measurer: &mut ManualMeasurer,
) -> Result<usize> {
    let n0 = measurer.model().n0;
    let dimension = measurer.dimension();

    writeln!(out, "n = {dimension}")?;
    writeln!(out, "Initial state:")?;
    print_state(out, handle, measurer)?;

    let mut applied = 0;
    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let cmd = line.trim();

        let directions = match cmd.chars().next() {
            None => continue,
            Some('q') => {
                writeln!(out, "Exiting")?;
                break;
            }
            Some('a') => sweep(dimension),
            _ => match parse_direction(cmd) {
                Some(d) => vec![d],
                None => {
                    writeln!(out, "could not parse {cmd:?}")?;
                    continue;
                }
            },
        };

        for d in directions {
            let Some(u) = measurer.measure(Some(d)) else { break };
            writeln!(
                out,
                "Theta {:.1}, Phi {:.1}: sending {}",
                d.theta,
                d.phi,
                fmt_reading(&u)
            )?;
            match handle
                .send_control(&u)
                .and_then(|()| handle.send_measurement(n0 * n0))
            {
                Ok(()) => applied += 1,
                Err(err) => writeln!(out, "rejected: {err}")?,
            }
            print_state(out, handle, measurer)?;
        }
    }

    Ok(applied)
}

fn parse_direction(cmd: &str) -> Option<Direction> {
    let mut parts = cmd
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse::<f64>);
    let theta = parts.next()?.ok()?;
    let phi = match parts.next() {
        Some(p) => p.ok()?,
        None => 0.0,
    };
    if parts.next().is_some() || !(theta.is_finite() && phi.is_finite()) {
        return None;
    }
    Some(Direction::new(theta, phi))
}

fn sweep(dimension: usize) -> Vec<Direction> {
    match dimension {
        1 => vec![Direction::new(0.0, 0.0), Direction::new(180.0, 0.0)],
        2 => (0..360)
            .step_by(30)
            .map(|t| Direction::new(t as f64, 0.0))
            .collect(),
        _ => {
            let mut dirs = vec![Direction::new(0.0, 90.0), Direction::new(0.0, -90.0)];
            for phi in [-60.0, -30.0, 0.0, 30.0, 60.0] {
                dirs.extend((0..360).step_by(30).map(|t| Direction::new(t as f64, phi)));
            }
            dirs
        }
    }
}

fn print_state<W: Write>(
    out: &mut W,
    handle: &FilterHandle,
    measurer: &ManualMeasurer,
) -> Result<()> {
    let snap = handle.snapshot();
    let model = measurer.model();
    writeln!(out, " K: {}  L: {}", fmt_reading(&snap.k()), fmt_reading(&snap.l()))?;
    writeln!(out, "K0: {}  L0: {}", fmt_reading(&model.k), fmt_reading(&model.l))?;
    let p: Vec<f64> = snap.covariance.diagonal().iter().copied().collect();
    writeln!(out, " P: {}", fmt_reading(&p))?;
    writeln!(out)?;
    Ok(())
}

fn fmt_reading(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{:.3}", x)).collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use magkal_core::CalibrationConfig;
    use magkal_sim::SensorModel;

    fn setup(dimension: usize) -> (FilterHandle, ManualMeasurer) {
        let model = SensorModel::new(
            1.0,
            vec![1.1, 0.9, 1.05][..dimension].to_vec(),
            vec![0.05, -0.1, 0.1][..dimension].to_vec(),
            0.0,
        )
        .unwrap();
        let handle = FilterHandle::spawn(CalibrationConfig::with_dimension(dimension)).unwrap();
        (handle, ManualMeasurer::new(model, 1).unwrap())
    }

    #[test]
    fn test_parse_direction() {
        assert_eq!(parse_direction("45"), Some(Direction::new(45.0, 0.0)));
        assert_eq!(parse_direction("45,-30"), Some(Direction::new(45.0, -30.0)));
        assert_eq!(parse_direction("45 30"), Some(Direction::new(45.0, 30.0)));
        assert_eq!(parse_direction("north"), None);
        assert_eq!(parse_direction("1,2,3"), None);
    }

    #[test]
    fn test_sweep_sizes() {
        assert_eq!(sweep(1).len(), 2);
        assert_eq!(sweep(2).len(), 12);
        assert_eq!(sweep(3).len(), 62);
    }

    #[test]
    fn test_console_applies_commands() {
        let (handle, mut measurer) = setup(2);
        let mut out = Vec::new();
        let input = "10\n\nbogus\n90,0\nq\n45\n";
        let applied = run_console(input.as_bytes(), &mut out, &handle, &mut measurer).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(handle.snapshot().accepted, 4);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("could not parse \"bogus\""));
        assert!(text.contains("Exiting"));
    }

    #[test]
    fn test_console_sweeps_converge() {
        let (handle, mut measurer) = setup(2);
        let input = "a\n".repeat(100);
        let mut out = Vec::new();
        let applied = run_console(input.as_bytes(), &mut out, &handle, &mut measurer).unwrap();

        assert_eq!(applied, 1200);
        let (k, l) = (handle.k(), handle.l());
        assert!((k[0] - 1.1).abs() < 1e-3 && (k[1] - 0.9).abs() < 1e-3, "{k:?}");
        assert!((l[0] - 0.05).abs() < 1e-3 && (l[1] + 0.1).abs() < 1e-3, "{l:?}");
    }
}
