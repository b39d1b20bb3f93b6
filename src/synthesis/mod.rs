//! Recommendation synthesis.
//!
//! Joins predictions, value rankings, chip outlook and competitive
//! context into one structured recommendation record: posture, ranked
//! targets, captaincy and template risk. Consumed synchronously by the
//! coordinator ahead of its weekly decision.

use crate::events::payloads::{ChipRecommendationPayload, ValueRankings};
use crate::models::{Availability, Position};
use crate::storage::Database;
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

/// Ownership above this is "template"; below the lower bound is a
/// differential.
pub const TEMPLATE_THRESHOLD: f64 = 70.0;
pub const DIFFERENTIAL_THRESHOLD: f64 = 30.0;
/// Competitive gaps (points) separating the postures.
const AGGRESSIVE_GAP: i64 = 200;
const DIFFERENTIAL_GAP: i64 = 50;
/// Captain shortlist depth.
const CAPTAIN_POOL: usize = 10;
const TOP_PLAYERS: usize = 50;

/// Standing relative to the league leader; `gap_to_leader` is zero or
/// positive when leading.
#[derive(Debug, Clone, Copy)]
pub struct CompetitiveContext {
    pub rank: i64,
    pub gap_to_leader: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Defensive,
    Balanced,
    BalancedDifferentials,
    AggressiveDifferentials,
}

impl Posture {
    pub fn from_context(context: Option<CompetitiveContext>) -> Self {
        let Some(context) = context else {
            return Posture::Balanced;
        };
        if context.gap_to_leader >= 0 {
            Posture::Defensive
        } else if context.gap_to_leader.abs() > AGGRESSIVE_GAP {
            Posture::AggressiveDifferentials
        } else if context.gap_to_leader.abs() > DIFFERENTIAL_GAP {
            Posture::BalancedDifferentials
        } else {
            Posture::Balanced
        }
    }

    fn chases_differentials(&self) -> bool {
        matches!(
            self,
            Posture::BalancedDifferentials | Posture::AggressiveDifferentials
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedPlayer {
    pub player_id: i64,
    pub web_name: String,
    pub position: Position,
    pub price: f64,
    pub xp: f64,
    pub value_score: f64,
    pub ownership: f64,
    pub is_template: bool,
    pub is_differential: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptainChoice {
    pub player_id: i64,
    pub web_name: String,
    pub xp: f64,
    pub ownership: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptainRecommendation {
    pub primary: CaptainChoice,
    pub differential: Option<CaptainChoice>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateRisk {
    pub player_id: i64,
    pub web_name: String,
    pub ownership: f64,
    pub xp: f64,
    pub severity: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub gameweek: i32,
    pub posture: Posture,
    pub top_players: Vec<RankedPlayer>,
    pub captain: Option<CaptainRecommendation>,
    pub template_risks: Vec<TemplateRisk>,
    pub transfer_targets: HashMap<Position, Vec<RankedPlayer>>,
    pub chip: Option<ChipRecommendationPayload>,
}

pub struct SynthesisEngine {
    db: Database,
}

impl SynthesisEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn synthesize(
        &self,
        gameweek: i32,
        predictions: &HashMap<i64, f64>,
        value_rankings: Option<&ValueRankings>,
        chip: Option<ChipRecommendationPayload>,
        context: Option<CompetitiveContext>,
    ) -> Result<Recommendations> {
        let posture = Posture::from_context(context);
        let ranked = self.rank_players(predictions, value_rankings)?;
        let captain = recommend_captain(&ranked, posture);
        let template_risks = template_risks(&ranked);
        let transfer_targets = transfer_targets(&ranked);

        info!(
            "Synthesis for GW{gameweek}: posture {posture:?}, {} ranked players",
            ranked.len()
        );

        Ok(Recommendations {
            gameweek,
            posture,
            top_players: ranked.into_iter().take(TOP_PLAYERS).collect(),
            captain,
            template_risks,
            transfer_targets,
            chip,
        })
    }

    fn rank_players(
        &self,
        predictions: &HashMap<i64, f64>,
        value_rankings: Option<&ValueRankings>,
    ) -> Result<Vec<RankedPlayer>> {
        let composite: HashMap<i64, f64> = value_rankings
            .map(|rankings| {
                rankings
                    .top_overall
                    .iter()
                    .chain(rankings.by_position.values().flatten())
                    .map(|entry| (entry.player_id, entry.value_score))
                    .collect()
            })
            .unwrap_or_default();

        let mut ranked: Vec<RankedPlayer> = self
            .db
            .all_players()?
            .iter()
            .filter(|p| p.status != Availability::Unavailable)
            .map(|p| {
                let xp = predictions.get(&p.id).copied().unwrap_or(0.0);
                let price = p.price();
                // Prefer the composite value score when the analysts
                // produced one; fall back to points-per-price.
                let value_score = composite
                    .get(&p.id)
                    .copied()
                    .unwrap_or(if price > 0.0 { xp / price } else { 0.0 });
                RankedPlayer {
                    player_id: p.id,
                    web_name: p.web_name.clone(),
                    position: p.position,
                    price,
                    xp,
                    value_score,
                    ownership: p.selected_by_percent,
                    is_template: p.selected_by_percent > TEMPLATE_THRESHOLD,
                    is_differential: p.selected_by_percent < DIFFERENTIAL_THRESHOLD,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.value_score
                .total_cmp(&a.value_score)
                .then(a.player_id.cmp(&b.player_id))
        });
        Ok(ranked)
    }
}

fn recommend_captain(ranked: &[RankedPlayer], posture: Posture) -> Option<CaptainRecommendation> {
    let mut by_xp: Vec<&RankedPlayer> = ranked.iter().collect();
    by_xp.sort_by(|a, b| b.xp.total_cmp(&a.xp).then(a.player_id.cmp(&b.player_id)));
    let pool: Vec<&RankedPlayer> = by_xp.into_iter().take(CAPTAIN_POOL).collect();

    let choice = |p: &RankedPlayer| CaptainChoice {
        player_id: p.player_id,
        web_name: p.web_name.clone(),
        xp: p.xp,
        ownership: p.ownership,
    };

    let differential = pool
        .iter()
        .find(|p| p.is_differential)
        .map(|p| choice(p))
        .filter(|_| posture.chases_differentials());

    let primary = if posture.chases_differentials() {
        pool.first().map(|p| choice(p))?
    } else {
        // Safe posture: prefer the best well-owned option.
        pool.iter()
            .find(|p| p.ownership > 50.0)
            .or_else(|| pool.first())
            .map(|p| choice(p))?
    };

    let reasoning = match posture {
        Posture::Defensive => "leading the league, protect rank with the field's captain",
        Posture::Balanced => "close race, take the highest expected scorer",
        Posture::BalancedDifferentials => "chasing, mix template with a differential option",
        Posture::AggressiveDifferentials => "big deficit, upside captain over safety",
    };

    Some(CaptainRecommendation {
        primary,
        differential,
        reasoning: reasoning.to_string(),
    })
}

fn template_risks(ranked: &[RankedPlayer]) -> Vec<TemplateRisk> {
    let mut risks: Vec<TemplateRisk> = ranked
        .iter()
        .filter(|p| p.is_template)
        .map(|p| TemplateRisk {
            player_id: p.player_id,
            web_name: p.web_name.clone(),
            ownership: p.ownership,
            xp: p.xp,
            severity: if p.xp > 6.0 { "high" } else { "moderate" },
        })
        .collect();
    risks.sort_by(|a, b| b.ownership.total_cmp(&a.ownership));
    risks.truncate(10);
    risks
}

fn transfer_targets(ranked: &[RankedPlayer]) -> HashMap<Position, Vec<RankedPlayer>> {
    let mut targets: HashMap<Position, Vec<RankedPlayer>> = HashMap::new();
    for player in ranked {
        let bucket = targets.entry(player.position).or_default();
        if bucket.len() < 5 {
            bucket.push(player.clone());
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Player;

    #[test]
    fn posture_from_gap() {
        let posture = |gap| {
            Posture::from_context(Some(CompetitiveContext {
                rank: 2,
                gap_to_leader: gap,
            }))
        };
        assert_eq!(posture(0), Posture::Defensive);
        assert_eq!(posture(35), Posture::Defensive);
        assert_eq!(posture(-30), Posture::Balanced);
        assert_eq!(posture(-120), Posture::BalancedDifferentials);
        assert_eq!(posture(-250), Posture::AggressiveDifferentials);
        assert_eq!(Posture::from_context(None), Posture::Balanced);
    }

    fn seed(db: &Database, id: i64, ownership: f64, cost: i64) {
        let player = Player {
            id,
            code: 8000 + id,
            web_name: format!("R{id}"),
            position: Position::Midfielder,
            team_id: 1 + id % 6,
            now_cost: cost,
            status: Availability::Available,
            chance_of_playing_next_round: None,
            selected_by_percent: ownership,
            form: 4.0,
            points_per_game: 4.0,
            total_points: 50,
            minutes: 900,
            goals_scored: 3,
            assists: 2,
            clean_sheets: 1,
            bps: 150,
            transfers_in_event: 0,
            transfers_out_event: 0,
            cost_change_event: 0,
            cost_change_start: 0,
            expected_goals: 2.0,
            expected_assists: 1.0,
            expected_goal_involvements: 3.0,
            expected_goals_per_90: 0.2,
            expected_assists_per_90: 0.1,
            expected_goal_involvements_per_90: 0.3,
        };
        db.upsert_players(&[player]).unwrap();
    }

    #[test]
    fn aggressive_posture_surfaces_differential_captain() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 1, 85.0, 130); // template star
        seed(&db, 2, 12.0, 75); // differential
        seed(&db, 3, 55.0, 90);

        let mut predictions = HashMap::new();
        predictions.insert(1, 8.0);
        predictions.insert(2, 7.5);
        predictions.insert(3, 6.0);

        let engine = SynthesisEngine::new(db);
        let recs = engine
            .synthesize(
                12,
                &predictions,
                None,
                None,
                Some(CompetitiveContext {
                    rank: 5,
                    gap_to_leader: -300,
                }),
            )
            .unwrap();

        assert_eq!(recs.posture, Posture::AggressiveDifferentials);
        let captain = recs.captain.unwrap();
        assert_eq!(captain.primary.player_id, 1);
        assert_eq!(captain.differential.unwrap().player_id, 2);

        // Template risk flags the 85%-owned star.
        assert_eq!(recs.template_risks.len(), 1);
        assert_eq!(recs.template_risks[0].player_id, 1);
        assert_eq!(recs.template_risks[0].severity, "high");
    }

    #[test]
    fn safe_posture_prefers_owned_captain_and_hides_differential() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 1, 12.0, 80); // differential tops xP
        seed(&db, 2, 65.0, 110);

        let mut predictions = HashMap::new();
        predictions.insert(1, 9.0);
        predictions.insert(2, 8.0);

        let engine = SynthesisEngine::new(db);
        let recs = engine
            .synthesize(
                12,
                &predictions,
                None,
                None,
                Some(CompetitiveContext {
                    rank: 1,
                    gap_to_leader: 40,
                }),
            )
            .unwrap();

        assert_eq!(recs.posture, Posture::Defensive);
        let captain = recs.captain.unwrap();
        assert_eq!(captain.primary.player_id, 2);
        assert!(captain.differential.is_none());
    }

    #[test]
    fn transfer_targets_are_bucketed_by_position() {
        let db = Database::open_in_memory().unwrap();
        for id in 1..=8 {
            seed(&db, id, 20.0, 70);
        }
        let predictions: HashMap<i64, f64> = (1..=8).map(|id| (id, id as f64)).collect();

        let engine = SynthesisEngine::new(db);
        let recs = engine.synthesize(12, &predictions, None, None, None).unwrap();
        let mids = &recs.transfer_targets[&Position::Midfielder];
        assert_eq!(mids.len(), 5);
    }
}
