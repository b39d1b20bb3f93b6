//! Fixture-difficulty analyst.
//!
//! Classifies each team's run over the next six gameweeks and flags
//! fixture swings where the second half of the horizon looks materially
//! different from the first.

use crate::agents::{Agent, AgentContext};
use crate::events::payloads::{
    AnalysisRequestedPayload, FixtureOutlookClass, FixtureRef, FixtureSummary, FixtureSwing,
    TeamFixtureOutlook,
};
use crate::events::{Event, EventKind};
use crate::models::Fixture;
use crate::storage::Database;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

pub const LOOKAHEAD_GAMEWEEKS: i32 = 6;
pub const EASY_THRESHOLD: f64 = 2.5;
pub const HARD_THRESHOLD: f64 = 3.5;
/// Half-vs-half difficulty delta that counts as a swing.
const SWING_THRESHOLD: f64 = 1.0;

pub struct FixtureAnalyst {
    db: Database,
    last_analysis: RwLock<Option<FixtureSummary>>,
}

impl FixtureAnalyst {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            last_analysis: RwLock::new(None),
        }
    }

    pub fn last_analysis(&self) -> Option<FixtureSummary> {
        self.last_analysis.read().clone()
    }

    pub fn analyze(&self, start_gw: i32) -> Result<FixtureSummary> {
        let teams = self.db.all_teams()?;
        let fixtures = self.db.fixtures_in_range(start_gw, LOOKAHEAD_GAMEWEEKS)?;

        let mut outlooks: Vec<TeamFixtureOutlook> = teams
            .iter()
            .filter_map(|team| {
                let run = team_fixtures(&fixtures, team.id);
                if run.is_empty() {
                    return None;
                }
                let avg = run.iter().map(|f| f.difficulty as f64).sum::<f64>() / run.len() as f64;
                Some(TeamFixtureOutlook {
                    team_id: team.id,
                    team_short_name: team.short_name.clone(),
                    avg_difficulty: avg,
                    classification: classify(avg),
                    fixtures: run,
                })
            })
            .collect();
        outlooks.sort_by(|a, b| a.avg_difficulty.total_cmp(&b.avg_difficulty));

        let swings = detect_swings(&outlooks);

        Ok(FixtureSummary {
            start_gameweek: start_gw,
            lookahead_gameweeks: LOOKAHEAD_GAMEWEEKS,
            team_outlooks: outlooks,
            swings,
        })
    }
}

fn classify(avg_difficulty: f64) -> FixtureOutlookClass {
    if avg_difficulty <= EASY_THRESHOLD {
        FixtureOutlookClass::Easy
    } else if avg_difficulty >= HARD_THRESHOLD {
        FixtureOutlookClass::Hard
    } else {
        FixtureOutlookClass::Neutral
    }
}

fn team_fixtures(fixtures: &[Fixture], team_id: i64) -> Vec<FixtureRef> {
    let mut run: Vec<FixtureRef> = fixtures
        .iter()
        .filter_map(|f| {
            let gameweek = f.gameweek?;
            let difficulty = f.difficulty_for(team_id)?;
            Some(FixtureRef {
                gameweek,
                opponent_id: if f.team_h == team_id { f.team_a } else { f.team_h },
                is_home: f.team_h == team_id,
                difficulty,
            })
        })
        .collect();
    run.sort_by_key(|f| f.gameweek);
    run
}

fn detect_swings(outlooks: &[TeamFixtureOutlook]) -> Vec<FixtureSwing> {
    let mut swings: Vec<FixtureSwing> = outlooks
        .iter()
        .filter_map(|outlook| {
            if outlook.fixtures.len() < 4 {
                return None;
            }
            let mid = outlook.fixtures.len() / 2;
            let (first, second) = outlook.fixtures.split_at(mid);
            let avg = |half: &[FixtureRef]| {
                half.iter().map(|f| f.difficulty as f64).sum::<f64>() / half.len() as f64
            };
            let first_avg = avg(first);
            let second_avg = avg(second);
            let delta = second_avg - first_avg;
            if delta.abs() < SWING_THRESHOLD {
                return None;
            }
            Some(FixtureSwing {
                team_id: outlook.team_id,
                team_short_name: outlook.team_short_name.clone(),
                direction: if delta > 0.0 { "worsening" } else { "improving" }.to_string(),
                first_half_difficulty: first_avg,
                second_half_difficulty: second_avg,
                magnitude: delta.abs(),
            })
        })
        .collect();
    swings.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    swings
}

#[async_trait]
impl Agent for FixtureAnalyst {
    fn name(&self) -> &str {
        "fixture_analyst"
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![EventKind::DataUpdated, EventKind::AnalysisRequested]
    }

    async fn handle_event(&self, event: Event, ctx: AgentContext) -> Result<()> {
        if event.kind == EventKind::AnalysisRequested {
            let requested = event
                .payload_as::<AnalysisRequestedPayload>()
                .map(|p| p.analysis_type)
                .unwrap_or_default();
            if !super::analysis_requested_for(Some(&requested), "fixture") {
                return Ok(());
            }
        }

        let start_gw = event
            .payload_i64("gameweek")
            .map(|gw| gw as i32)
            .or_else(|| self.db.current_gameweek().ok().flatten().map(|gw| gw.id))
            .unwrap_or(1);

        let summary = self.analyze(start_gw)?;
        let easy = summary
            .team_outlooks
            .iter()
            .filter(|t| t.classification == FixtureOutlookClass::Easy)
            .count();
        info!(
            "Fixture analysis complete: {} teams, {easy} with easy runs, {} swings",
            summary.team_outlooks.len(),
            summary.swings.len()
        );
        *self.last_analysis.write() = Some(summary.clone());

        ctx.publish(
            Event::from_payload(EventKind::FixtureAnalysisCompleted, &summary)
                .with_correlation(event.id.to_string()),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Team;

    fn seed(db: &Database, difficulties: &[(i32, i64, i64)]) {
        db.upsert_teams(&[
            Team {
                id: 1,
                name: "Alpha".into(),
                short_name: "ALP".into(),
                strength_attack_home: 1200,
                strength_attack_away: 1150,
                strength_defence_home: 1180,
                strength_defence_away: 1100,
            },
            Team {
                id: 2,
                name: "Beta".into(),
                short_name: "BET".into(),
                strength_attack_home: 1100,
                strength_attack_away: 1050,
                strength_defence_home: 1080,
                strength_defence_away: 1000,
            },
        ])
        .unwrap();

        let fixtures: Vec<Fixture> = difficulties
            .iter()
            .enumerate()
            .map(|(i, (gw, home_diff, away_diff))| Fixture {
                id: i as i64 + 1,
                gameweek: Some(*gw),
                team_h: 1,
                team_a: 2,
                team_h_difficulty: *home_diff,
                team_a_difficulty: *away_diff,
                team_h_score: None,
                team_a_score: None,
                finished: false,
            })
            .collect();
        db.upsert_fixtures(&fixtures).unwrap();
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(classify(2.5), FixtureOutlookClass::Easy);
        assert_eq!(classify(3.5), FixtureOutlookClass::Hard);
        assert_eq!(classify(3.0), FixtureOutlookClass::Neutral);
    }

    #[test]
    fn mean_difficulty_over_horizon() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[(1, 2, 4), (2, 2, 4), (3, 3, 5), (4, 3, 5), (5, 2, 4), (6, 2, 4)]);

        let analyst = FixtureAnalyst::new(db);
        let summary = analyst.analyze(1).unwrap();
        assert_eq!(summary.team_outlooks.len(), 2);

        // Sorted easiest first: team 1 averages 2.33, team 2 averages 4.33.
        assert_eq!(summary.team_outlooks[0].team_id, 1);
        assert_eq!(summary.team_outlooks[0].classification, FixtureOutlookClass::Easy);
        assert_eq!(summary.team_outlooks[1].classification, FixtureOutlookClass::Hard);
    }

    #[test]
    fn swing_detection() {
        let db = Database::open_in_memory().unwrap();
        // First three gameweeks easy (2), last three hard (4): delta 2.0.
        seed(&db, &[(1, 2, 3), (2, 2, 3), (3, 2, 3), (4, 4, 3), (5, 4, 3), (6, 4, 3)]);

        let analyst = FixtureAnalyst::new(db);
        let summary = analyst.analyze(1).unwrap();
        let swing = summary
            .swings
            .iter()
            .find(|s| s.team_id == 1)
            .expect("team 1 should swing");
        assert_eq!(swing.direction, "worsening");
        assert!((swing.magnitude - 2.0).abs() < 1e-9);

        // Team 2 stays flat at 3.
        assert!(summary.swings.iter().all(|s| s.team_id != 2));
    }
}
