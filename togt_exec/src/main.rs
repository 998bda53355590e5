//! Race planner executable entry point.
//!
//! # Usage
//!
//! ```text
//! togt_exec <race_params.toml> <track.toml> <traj_output.[json|csv]> <waypoints_output.json>
//! ```
//!
//! Loads the race parameters and the track, plans a time optimal trajectory through the track and
//! saves it along with the state at every gate. A report of the planning run is saved in the
//! session directory.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info};
use std::env;

// Internal
use togt_lib::{
    planner::RacePlanner,
    race_params::RaceParams,
    race_track::Track,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- ARGUMENTS ----

    // Checked before anything is created on disk
    let args: Vec<String> = env::args().collect();
    check_args(&args)?;

    // ---- EARLY INITIALISATION ----

    let session = Session::new("togt_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    info!("TOGT Race Planner\n");
    info!("Session directory: {:?}\n", session.session_root);
    debug!("CLI arguments: {:?}", args);

    // ---- LOAD INPUTS ----

    let race_params = RaceParams::load(&args[1]).wrap_err("Could not load the race parameters")?;
    info!("Race parameters loaded from \"{}\"", &args[1]);

    let track = Track::load(&args[2]).wrap_err("Could not load the track")?;
    info!(
        "Track loaded from \"{}\" with {} gates",
        &args[2],
        track.gates().len()
    );

    // ---- PLAN ----

    let planner = RacePlanner::new(race_params.planner).wrap_err("Invalid planner parameters")?;
    let solution = planner
        .plan_togt(&track, &race_params.limits)
        .wrap_err("Planning failed")?;

    println!("{}", solution.extremum);

    // ---- SAVE OUTPUTS ----

    solution
        .trajectory
        .save(&args[3])
        .wrap_err("Could not save the trajectory")?;
    info!("Trajectory saved to \"{}\"", &args[3]);

    solution
        .trajectory
        .save_waypoints(&args[4])
        .wrap_err("Could not save the waypoints")?;
    info!("Waypoints saved to \"{}\"", &args[4]);

    session.save("plan_report.json", solution.report);

    session.exit();

    Ok(())
}

/// Check the command line holds the executable name and the four paths.
fn check_args(args: &[String]) -> Result<(), Report> {
    if args.len() != 5 {
        return Err(eyre!(
            "Expected 4 arguments (race params, track, trajectory output, waypoints output), \
             found {}",
            args.len().saturating_sub(1)
        ));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("arg{}", i)).collect()
    }

    #[test]
    fn test_check_args() {
        assert!(check_args(&args(5)).is_ok());

        for n in [0, 1, 4, 6].iter() {
            let err = check_args(&args(*n)).unwrap_err();
            assert!(err.to_string().starts_with("Expected 4 arguments"));
        }

        assert!(check_args(&args(3))
            .unwrap_err()
            .to_string()
            .ends_with("found 2"));
    }
}
