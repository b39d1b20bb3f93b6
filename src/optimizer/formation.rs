//! Formation selection and captaincy.
//!
//! Enumerates the closed set of legal formations, fields the
//! highest-expected-points eleven, and hands the armband to the top two
//! of them. All ties break toward the lower player id.

use crate::models::{Position, Squad, STARTING_XI_SIZE};
use crate::rules::{Formation, VALID_FORMATIONS};
use std::collections::HashMap;

fn xp_of(xp: &HashMap<i64, f64>, player_id: i64) -> f64 {
    xp.get(&player_id).copied().unwrap_or(0.0)
}

/// Indices of squad members per position, best expected points first.
fn ranked_by_position(squad: &Squad, xp: &HashMap<i64, f64>) -> HashMap<Position, Vec<usize>> {
    let mut by_position: HashMap<Position, Vec<usize>> = HashMap::new();
    for (index, member) in squad.members.iter().enumerate() {
        by_position.entry(member.position).or_default().push(index);
    }
    for indices in by_position.values_mut() {
        indices.sort_by(|&a, &b| {
            let (pa, pb) = (&squad.members[a], &squad.members[b]);
            xp_of(xp, pb.player_id)
                .total_cmp(&xp_of(xp, pa.player_id))
                .then(pa.player_id.cmp(&pb.player_id))
        });
    }
    by_position
}

/// Pick the formation maximizing the starting eleven's expected points.
/// Returns `None` when the squad cannot field any legal formation.
pub fn best_formation(squad: &Squad, xp: &HashMap<i64, f64>) -> Option<(Formation, f64)> {
    let ranked = ranked_by_position(squad, xp);
    let count = |position: Position| ranked.get(&position).map(|v| v.len()).unwrap_or(0);

    let mut best: Option<(Formation, f64)> = None;
    for formation in VALID_FORMATIONS {
        let (defenders, midfielders, forwards) = formation;
        if count(Position::Goalkeeper) < 1
            || count(Position::Defender) < defenders
            || count(Position::Midfielder) < midfielders
            || count(Position::Forward) < forwards
        {
            continue;
        }

        let sum_top = |position: Position, take: usize| -> f64 {
            ranked
                .get(&position)
                .map(|indices| {
                    indices
                        .iter()
                        .take(take)
                        .map(|&i| xp_of(xp, squad.members[i].player_id))
                        .sum()
                })
                .unwrap_or(0.0)
        };
        let total = sum_top(Position::Goalkeeper, 1)
            + sum_top(Position::Defender, defenders)
            + sum_top(Position::Midfielder, midfielders)
            + sum_top(Position::Forward, forwards);

        if best.map_or(true, |(_, best_total)| total > best_total) {
            best = Some((formation, total));
        }
    }
    best
}

/// Assign slots 1-11 (starting, in GK/DEF/MID/FWD block order) and 12-15
/// (bench) for the best formation. Returns the chosen formation.
pub fn assign_slots(squad: &mut Squad, xp: &HashMap<i64, f64>) -> Option<Formation> {
    let (formation, _) = best_formation(squad, xp)?;
    let ranked = ranked_by_position(squad, xp);
    let (defenders, midfielders, forwards) = formation;

    let mut slot: u8 = 1;
    let mut bench: Vec<usize> = Vec::new();
    for (position, starters) in [
        (Position::Goalkeeper, 1),
        (Position::Defender, defenders),
        (Position::Midfielder, midfielders),
        (Position::Forward, forwards),
    ] {
        let Some(indices) = ranked.get(&position) else {
            continue;
        };
        for (rank, &index) in indices.iter().enumerate() {
            if rank < starters {
                squad.members[index].slot = Some(slot);
                slot += 1;
            } else {
                bench.push(index);
            }
        }
    }

    debug_assert_eq!(slot as usize, STARTING_XI_SIZE + 1);
    for index in bench {
        squad.members[index].slot = Some(slot);
        slot += 1;
    }
    Some(formation)
}

/// Captain and vice-captain: the two highest expected scorers of the
/// starting eleven. Distinctness is guaranteed by the ordering.
pub fn select_captains(squad: &mut Squad, xp: &HashMap<i64, f64>) -> Option<(i64, i64)> {
    for member in squad.members.iter_mut() {
        member.is_captain = false;
        member.is_vice_captain = false;
    }

    let mut starters: Vec<(i64, f64)> = squad
        .members
        .iter()
        .filter(|m| matches!(m.slot, Some(s) if s <= STARTING_XI_SIZE as u8))
        .map(|m| (m.player_id, xp_of(xp, m.player_id)))
        .collect();
    if starters.len() < 2 {
        return None;
    }
    starters.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let captain = starters[0].0;
    let vice = starters[1].0;
    for member in squad.members.iter_mut() {
        member.is_captain = member.player_id == captain;
        member.is_vice_captain = member.player_id == vice;
    }
    Some((captain, vice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SquadMember;

    fn member(id: i64, position: Position) -> SquadMember {
        SquadMember {
            player_id: id,
            code: id,
            web_name: format!("F{id}"),
            position,
            team_id: id % 8,
            now_cost: 50,
            purchase_price: 50,
            selling_price: 50,
            slot: None,
            is_captain: false,
            is_vice_captain: false,
        }
    }

    /// Standard 2-5-5-3 squad; ids 1-2 GK, 3-7 DEF, 8-12 MID, 13-15 FWD.
    fn squad() -> Squad {
        let mut members = Vec::new();
        for id in 1..=2 {
            members.push(member(id, Position::Goalkeeper));
        }
        for id in 3..=7 {
            members.push(member(id, Position::Defender));
        }
        for id in 8..=12 {
            members.push(member(id, Position::Midfielder));
        }
        for id in 13..=15 {
            members.push(member(id, Position::Forward));
        }
        Squad::new(members)
    }

    /// Midfielders strong, forwards weak apart from two: top-11 by raw
    /// expected points is 1 GK, 3 DEF, 5 MID, 2 FWD.
    fn xp_map() -> HashMap<i64, f64> {
        let mut xp = HashMap::new();
        xp.insert(1, 4.0);
        xp.insert(2, 3.0);
        // Defenders: three good, two poor
        for (id, value) in [(3, 5.0), (4, 4.5), (5, 4.2), (6, 1.0), (7, 0.8)] {
            xp.insert(id, value);
        }
        // Midfielders all strong
        for (id, value) in [(8, 7.0), (9, 6.5), (10, 6.0), (11, 5.5), (12, 5.2)] {
            xp.insert(id, value);
        }
        // Forwards: two decent, one weak
        for (id, value) in [(13, 6.8), (14, 4.4), (15, 0.5)] {
            xp.insert(id, value);
        }
        xp
    }

    #[test]
    fn picks_three_five_two() {
        let squad = squad();
        let (formation, total) = best_formation(&squad, &xp_map()).unwrap();
        assert_eq!(formation, (3, 5, 2));
        // 4.0 + (5.0+4.5+4.2) + (7.0+6.5+6.0+5.5+5.2) + (6.8+4.4)
        assert!((total - 59.1).abs() < 1e-9);
    }

    #[test]
    fn slots_and_captaincy() {
        let mut squad = squad();
        let xp = xp_map();
        let formation = assign_slots(&mut squad, &xp).unwrap();
        assert_eq!(formation, (3, 5, 2));

        let starters = squad.starting_eleven();
        assert_eq!(starters.len(), 11);
        // Weak defenders and forward ride the bench.
        for benched in [6, 7, 15, 2] {
            assert!(
                squad
                    .members
                    .iter()
                    .find(|m| m.player_id == benched)
                    .unwrap()
                    .slot
                    .unwrap()
                    > 11
            );
        }

        let (captain, vice) = select_captains(&mut squad, &xp).unwrap();
        assert_eq!(captain, 8); // 7.0, the top starter
        assert_eq!(vice, 13); // 6.8
        assert_ne!(captain, vice);
        assert!(squad.captain().unwrap().slot.unwrap() <= 11);
        assert!(squad.vice_captain().unwrap().slot.unwrap() <= 11);
    }

    #[test]
    fn captain_tie_breaks_to_lower_id() {
        let mut squad = squad();
        let mut xp = xp_map();
        // Make ids 8 and 9 tie exactly.
        xp.insert(9, 7.0);
        assign_slots(&mut squad, &xp).unwrap();
        let (captain, vice) = select_captains(&mut squad, &xp).unwrap();
        assert_eq!(captain, 8);
        assert_eq!(vice, 9);
    }

    #[test]
    fn zero_predictions_still_produce_a_legal_lineup() {
        let mut squad = squad();
        let xp = HashMap::new();
        let formation = assign_slots(&mut squad, &xp).unwrap();
        assert!(crate::rules::RulesEngine::is_valid_formation(formation));
        assert_eq!(squad.starting_eleven().len(), 11);
    }
}
