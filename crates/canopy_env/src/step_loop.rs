//! Line-delimited JSON step loop.
//!
//! Every input line is one message. A step message carries the query records
//! of one engine step and is answered with one line holding the responses.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use canopy_core::{QueryRecord, Response};
use canopy_tracer::Simulation;
use serde::{Deserialize, Serialize};

/// One message from the growth engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Step { queries: Vec<QueryRecord> },
    Terminate,
}

/// Shared flag asking the loop to stop after the current step.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Answer steps read from `input` until EOF, a terminate message or a stop
/// request. Returns the number of steps answered.
pub fn run_loop<R: BufRead, W: Write>(
    simulation: &mut Simulation,
    input: R,
    mut output: W,
    stop: &StopHandle,
) -> Result<u64> {
    let mut answered = 0;
    for line in input.lines() {
        if stop.is_stopped() {
            log::info!("stop requested");
            break;
        }
        let line = line.context("reading query stream")?;
        if line.trim().is_empty() {
            continue;
        }

        let responses: Vec<Response> = match serde_json::from_str::<Message>(&line) {
            Ok(Message::Step { queries }) => {
                let responses = simulation.step(queries);
                answered += 1;
                responses
            }
            Ok(Message::Terminate) => {
                log::info!("terminate received");
                stop.stop();
                break;
            }
            Err(e) => {
                log::warn!("malformed step message: {}", e);
                Vec::new()
            }
        };

        serde_json::to_writer(&mut output, &responses).context("encoding responses")?;
        writeln!(output).context("writing responses")?;
        output.flush().context("writing responses")?;
    }
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::{EnvironmentConfig, PrimitiveStore};

    fn simulation() -> Simulation {
        let config = EnvironmentConfig {
            ray_density: 50.0,
            ..Default::default()
        };
        Simulation::with_scene(config, PrimitiveStore::new(), None)
    }

    const STEP: &str = r#"{"Step":{"queries":[{"master":0,"module":5,"params":[0.5,0.5],"turtle":{"position":[0,0,0],"heading":[0,0,1],"up":[0,1,0],"left":[1,0,0]}}]}}"#;

    #[test]
    fn test_answers_each_step_line() {
        let mut sim = simulation();
        let input = format!("{}\n\n{}\n", STEP, STEP);
        let mut output = Vec::new();
        let answered = run_loop(&mut sim, input.as_bytes(), &mut output, &StopHandle::new()).unwrap();

        assert_eq!(answered, 2);
        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let responses: Vec<Response> = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].module, 5);
        assert_eq!(responses[0].values.len(), 2);
    }

    #[test]
    fn test_malformed_line_gets_empty_answer() {
        let mut sim = simulation();
        let input = format!("not json\n{}\n", STEP);
        let mut output = Vec::new();
        let answered = run_loop(&mut sim, input.as_bytes(), &mut output, &StopHandle::new()).unwrap();

        assert_eq!(answered, 1);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().next(), Some("[]"));
    }

    #[test]
    fn test_terminate_stops_loop() {
        let mut sim = simulation();
        let input = format!("\"Terminate\"\n{}\n", STEP);
        let stop = StopHandle::new();
        let mut output = Vec::new();
        let answered = run_loop(&mut sim, input.as_bytes(), &mut output, &stop).unwrap();

        assert_eq!(answered, 0);
        assert!(output.is_empty());
        assert!(stop.is_stopped());
    }

    #[test]
    fn test_stop_checked_between_steps() {
        let mut sim = simulation();
        let stop = StopHandle::new();
        stop.stop();
        let mut output = Vec::new();
        let answered = run_loop(&mut sim, STEP.as_bytes(), &mut output, &stop).unwrap();
        assert_eq!(answered, 0);
        assert_eq!(sim.steps(), 0);
    }
}
