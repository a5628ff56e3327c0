//! Line-oriented driver for walking a trail from a terminal or a script.
//!
//! Every input line is a `#` command; every response line starts with a
//! bracketed tag so scripts can match on it.

use std::io::{self, BufRead, Write};
use tracing::{debug, warn};
use waymark_core::{ClaimError, Coordinates, HeadlessTrail, Marker, ProgressView};

const HELP: &[&str] = &[
    "  #claim          - Claim the current marker and read its narrative",
    "  #undo           - Give back the most recent claim",
    "  #reset          - Forget all progress",
    "  #status         - Show progress",
    "  #history        - Show every claimed chapter",
    "  #near <lat> <lon> - Check distance to the current marker",
    "  #help           - Show this help",
    "  #quit           - Exit",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Claim,
    Undo,
    Reset,
    Status,
    History,
    Near(Coordinates),
    Help,
    Quit,
}

/// Parse one input line. Returns the error text to print on failure.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let Some(rest) = line.strip_prefix('#') else {
        return Err("Commands start with '#'. Type #help for help.".to_string());
    };

    let parts: Vec<&str> = rest.split_whitespace().collect();
    match parts.first().copied() {
        Some("claim") => Ok(Command::Claim),
        Some("undo") => Ok(Command::Undo),
        Some("reset") => Ok(Command::Reset),
        Some("status") => Ok(Command::Status),
        Some("history") => Ok(Command::History),
        Some("help") => Ok(Command::Help),
        Some("quit") | Some("exit") => Ok(Command::Quit),
        Some("near") => {
            let usage = || "Usage: #near <lat> <lon>".to_string();
            let (Some(lat), Some(lon)) = (parts.get(1), parts.get(2)) else {
                return Err(usage());
            };
            let lat: f64 = lat.parse().map_err(|_| usage())?;
            let lon: f64 = lon.parse().map_err(|_| usage())?;
            if !lat.is_finite() || !lon.is_finite() {
                return Err(usage());
            }
            Ok(Command::Near(Coordinates::new(lat, lon)))
        }
        _ => Err("Unknown command. Type #help for help.".to_string()),
    }
}

/// Run the protocol until end of input or `#quit`.
pub async fn run_headless<R: BufRead, W: Write>(
    trail: &HeadlessTrail,
    input: R,
    out: &mut W,
) -> io::Result<()> {
    let status = trail.status();
    writeln!(out, "=== Waymark ===")?;
    writeln!(out, "Markers: {}", status.total)?;
    print_status(out, &status)?;
    writeln!(out)?;
    writeln!(out, "Commands:")?;
    for line in HELP {
        writeln!(out, "{line}")?;
    }
    writeln!(out)?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(message) => {
                writeln!(out, "[ERROR] {message}")?;
                out.flush()?;
                continue;
            }
        };
        debug!(?command, "Handling command");

        match command {
            Command::Quit => {
                writeln!(out, "Goodbye!")?;
                out.flush()?;
                break;
            }
            Command::Claim => match trail.claim().await {
                Ok(marker) => print_marker(out, "[CLAIMED]", &marker)?,
                Err(e) => print_failure(out, trail, &e)?,
            },
            Command::Undo => match trail.undo().await {
                Ok(marker) => {
                    writeln!(out, "[UNDONE] {}", marker.display_title())?;
                    print_status(out, &trail.status())?;
                }
                Err(e) => print_failure(out, trail, &e)?,
            },
            Command::Reset => match trail.reset().await {
                Ok(()) => writeln!(out, "[RESET] Progress cleared")?,
                Err(e) => print_failure(out, trail, &e)?,
            },
            Command::Status => print_status(out, &trail.status())?,
            Command::History => {
                let chapters = trail.history();
                writeln!(out, "[HISTORY] {} chapter(s)", chapters.len())?;
                for chapter in chapters {
                    writeln!(out, "  Chapter {}: {}", chapter.number, chapter.title)?;
                    for para in chapter.text.lines() {
                        writeln!(out, "    {para}")?;
                    }
                }
            }
            Command::Near(position) => match trail.distance_to_current(&position) {
                Some(distance) => {
                    let reach = if trail.within_reach(&position) {
                        "within reach"
                    } else {
                        "out of reach"
                    };
                    writeln!(out, "[NEAR] {distance:.1} m to the current marker ({reach})")?;
                }
                None => writeln!(out, "[NEAR] No marker left to reach")?,
            },
            Command::Help => {
                writeln!(out, "[HELP]")?;
                for line in HELP {
                    writeln!(out, "{line}")?;
                }
            }
        }
        out.flush()?;
    }

    Ok(())
}

fn print_marker<W: Write>(out: &mut W, tag: &str, marker: &Marker) -> io::Result<()> {
    writeln!(out, "{tag} {}", marker.display_title())?;
    for para in marker.narrative_text.lines() {
        writeln!(out, "{para}")?;
    }
    writeln!(out)
}

fn print_status<W: Write>(out: &mut W, status: &ProgressView) -> io::Result<()> {
    let next = match &status.current_marker {
        Some(marker) => marker.display_title(),
        None => "trail complete".to_string(),
    };
    writeln!(
        out,
        "[STATUS] {}/{} claimed, next: {next}",
        status.cursor, status.total
    )
}

/// Report a failed transition. Durability failures print a warning plus the
/// state the session kept in memory.
fn print_failure<W: Write>(out: &mut W, trail: &HeadlessTrail, err: &ClaimError) -> io::Result<()> {
    if err.is_durability_failure() {
        warn!("Progress not saved: {err}");
        writeln!(out, "[WARN] {err}")?;
        return print_status(out, &trail.status());
    }
    writeln!(out, "[ERROR] {err}")
}
