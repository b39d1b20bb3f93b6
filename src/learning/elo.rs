//! Team strength ratings, Elo style.
//!
//! Maintained from finished fixtures as gameweeks complete. A processed
//! fixture leaves a match row behind, so replayed completion events
//! never double-apply a result.

use crate::models::Fixture;
use crate::storage::Database;
use anyhow::Result;
use tracing::debug;

const K_FACTOR: f64 = 32.0;
const HOME_ADVANTAGE: f64 = 100.0;

/// Win expectation for the home side, with home advantage folded in.
pub fn expected_home_score(home_rating: f64, away_rating: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((away_rating - (home_rating + HOME_ADVANTAGE)) / 400.0))
}

/// Actual score from the scoreline: 1 home win, 0.5 draw, 0 away win.
fn actual_home_score(home_goals: i64, away_goals: i64) -> f64 {
    match home_goals.cmp(&away_goals) {
        std::cmp::Ordering::Greater => 1.0,
        std::cmp::Ordering::Equal => 0.5,
        std::cmp::Ordering::Less => 0.0,
    }
}

/// New (home, away) ratings after a result.
pub fn updated_ratings(
    home_rating: f64,
    away_rating: f64,
    home_goals: i64,
    away_goals: i64,
) -> (f64, f64) {
    let expected = expected_home_score(home_rating, away_rating);
    let actual = actual_home_score(home_goals, away_goals);
    let delta = K_FACTOR * (actual - expected);
    (home_rating + delta, away_rating - delta)
}

/// Fold every finished, unprocessed fixture of a gameweek into the
/// ratings table. Returns how many fixtures were applied.
pub fn apply_gameweek(db: &Database, gameweek: i32) -> Result<usize> {
    let fixtures: Vec<Fixture> = db
        .fixtures_in_range(gameweek, 1)?
        .into_iter()
        .filter(|f| f.finished)
        .collect();

    let mut applied = 0usize;
    for fixture in fixtures {
        let (Some(home_goals), Some(away_goals)) = (fixture.team_h_score, fixture.team_a_score)
        else {
            continue;
        };
        if db.elo_match_processed(fixture.id)? {
            continue;
        }

        let (home_before, home_matches) = db.elo_rating(fixture.team_h)?;
        let (away_before, away_matches) = db.elo_rating(fixture.team_a)?;
        let (home_after, away_after) =
            updated_ratings(home_before, away_before, home_goals, away_goals);

        db.set_elo_rating(fixture.team_h, home_after, home_matches + 1)?;
        db.set_elo_rating(fixture.team_a, away_after, away_matches + 1)?;
        db.record_elo_match(fixture.id, home_before, away_before, home_after, away_after)?;
        applied += 1;
        debug!(
            "Elo fixture {}: {:.0} -> {:.0} (home), {:.0} -> {:.0} (away)",
            fixture.id, home_before, home_after, away_before, away_after
        );
    }
    Ok(applied)
}
