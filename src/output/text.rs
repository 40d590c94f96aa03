//! Human-readable text output

use crate::driver::{Event, Exit, Params, RunReport};

/// Render one event as a console line
///
/// Cell flips only matter to a live board view and have no console line.
pub fn format_event(event: &Event) -> Option<String> {
    let line = match event {
        Event::CellFlipped { .. } => return None,
        Event::AliveCellsCount { turn, cells } => {
            format!("Completed Turns {:<8} Alive Cells {}", turn, cells)
        }
        Event::ImageOutputComplete { turn, filename } => {
            format!("Completed Turns {:<8} File {} output complete", turn, filename)
        }
        Event::FinalTurnComplete { turn, alive } => {
            format!("Completed Turns {:<8} Final turn complete, {} cells alive", turn, alive.len())
        }
        Event::StateChange { turn, state } => format!("Completed Turns {:<8} {}", turn, state),
    };
    Some(line)
}

pub fn print_event(event: &Event) {
    if let Some(line) = format_event(event) {
        println!("{}", line);
    }
}

/// Print the run banner
pub fn print_banner(params: &Params) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    GAME OF LIFE");
    println!("═══════════════════════════════════════════════════════════");
    println!("Broker:  {}", params.broker);
    println!("Board:   {}x{}", params.width, params.height);
    println!("Turns:   {}", params.turns);
    println!("Workers: {}", params.threads);
    println!();
}

/// Print the end-of-session summary
pub fn print_summary(report: &RunReport) {
    println!();
    println!("═══════════════════════════════════════════════════════════");
    println!("                    RUN SUMMARY");
    println!("═══════════════════════════════════════════════════════════");

    let outcome = match report.exit {
        Exit::Completed => "completed",
        Exit::Quit => "quit (run reset)",
        Exit::Killed => "killed (broker shut down)",
    };
    println!("Outcome:      {}", outcome);
    println!("Turns:        {}", report.turn);
    if let Some(alive) = report.alive_cells() {
        println!("Alive cells:  {}", alive);
    }
    println!("Elapsed Time: {:.3}s", report.elapsed.as_secs_f64());
    if report.elapsed.as_secs_f64() > 0.0 {
        println!("Turns/sec:    {:.1}", report.turn as f64 / report.elapsed.as_secs_f64());
    }
    for name in &report.snapshots {
        println!("Snapshot:     {}", name);
    }
}
