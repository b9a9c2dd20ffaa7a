// Piece-by-piece construction of a seat-swap matrix.
//
// Each piece picks the least-raced rowers (rotating who sits out), seats them
// with a Latin-square shift so seat tiers move between boats from piece to
// piece, then hill-climbs over same-rigging swaps to spread boat-mates and
// favour pairings that have not been compared yet.

use std::collections::{BTreeMap, BTreeSet};

use crate::race::{Athlete, AthleteId, BoatClass, SeatAssignment, Side};
use crate::rating::graph::ComparisonGraph;

use super::{PlannedBoat, PlannedPiece, SeatLayout};

/// Everything the balance checks need from a finished run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub pieces: Vec<PlannedPiece>,
    /// Pieces raced per rower, indexed like the rower slice.
    pub rower_loads: Vec<usize>,
    /// Pieces coxed per coxswain, indexed like the coxswain slice.
    pub cox_loads: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Seat {
    boat: usize,
    number: u8,
    rigging: Side,
    athlete: AthleteId,
}

fn pair(a: AthleteId, b: AthleteId) -> (AthleteId, AthleteId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn boat_name(index: usize) -> String {
    if index < 26 {
        format!("Boat {}", (b'A' + index as u8) as char)
    } else {
        format!("Boat {}", index + 1)
    }
}

/// Slots for `seats` across `boats` shells in piece `piece`.
///
/// Slot `k` sits in seat tier `k / boats`; its boat is the column
/// `k % boats` shifted by `tier * piece`, so each tier cycles through the
/// boats at a different rate.
fn latin_slots(seats: &[u8], boats: usize, piece: usize) -> Vec<(usize, u8)> {
    (0..seats.len() * boats)
        .map(|k| {
            let tier = k / boats;
            let column = k % boats;
            ((column + tier * piece) % boats, seats[tier])
        })
        .collect()
}

pub struct Planner<'a> {
    class: BoatClass,
    layout: SeatLayout,
    rowers: &'a [Athlete],
    coxes: &'a [AthleteId],
    boats: usize,
    existing: Option<&'a ComparisonGraph>,
    search_iterations: usize,
    rower_loads: Vec<usize>,
    cox_loads: Vec<usize>,
    /// Pieces each pair has shared a boat so far.
    mates: BTreeMap<(AthleteId, AthleteId), usize>,
    /// Pairs already facing each other in an earlier planned piece.
    raced: BTreeSet<(AthleteId, AthleteId)>,
}

impl<'a> Planner<'a> {
    pub fn new(
        class: BoatClass,
        rowers: &'a [Athlete],
        coxes: &'a [AthleteId],
        boats: usize,
        existing: Option<&'a ComparisonGraph>,
        search_iterations: usize,
    ) -> Self {
        Planner {
            class,
            layout: SeatLayout::of(class),
            rowers,
            coxes,
            boats,
            existing,
            search_iterations,
            rower_loads: vec![0; rowers.len()],
            cox_loads: vec![0; coxes.len()],
            mates: BTreeMap::new(),
            raced: BTreeSet::new(),
        }
    }

    pub fn run(mut self, piece_count: usize) -> Plan {
        let pieces = (0..piece_count).map(|p| self.plan_piece(p)).collect();
        Plan {
            pieces,
            rower_loads: self.rower_loads,
            cox_loads: self.cox_loads,
        }
    }

    fn plan_piece(&mut self, piece: usize) -> PlannedPiece {
        let chosen = self.select_rowers(piece);
        let mut seats = self.place(piece, &chosen);
        self.improve(&mut seats);
        let coxes = self.select_coxes(piece);
        self.commit(&chosen, &coxes, &seats);

        let mut boats: Vec<PlannedBoat> = (0..self.boats)
            .map(|b| PlannedBoat {
                name: boat_name(b),
                assignments: Vec::new(),
            })
            .collect();
        for seat in &seats {
            boats[seat.boat].assignments.push(SeatAssignment {
                seat_number: seat.number,
                side: seat.rigging,
                athlete_id: seat.athlete,
            });
        }
        if let Some(cox_seat) = self.class.cox_seat() {
            for (k, &c) in coxes.iter().enumerate() {
                boats[(k + piece) % self.boats].assignments.push(SeatAssignment {
                    seat_number: cox_seat,
                    side: Side::Cox,
                    athlete_id: self.coxes[c],
                });
            }
        }
        for boat in &mut boats {
            boat.assignments.sort_by_key(|a| a.seat_number);
        }

        let chosen_set: BTreeSet<usize> = chosen.iter().copied().collect();
        let cox_set: BTreeSet<usize> = coxes.iter().copied().collect();
        let mut resting: Vec<AthleteId> = self
            .rowers
            .iter()
            .enumerate()
            .filter(|(i, _)| !chosen_set.contains(i))
            .map(|(_, a)| a.id)
            .chain(
                self.coxes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !cox_set.contains(i))
                    .map(|(_, &id)| id),
            )
            .collect();
        resting.sort_unstable();

        PlannedPiece {
            piece_number: piece + 1,
            boats,
            resting,
        }
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Indices of the rowers racing this piece, least-raced first. Among
    /// equal loads the starting point rotates each piece. Sweep boats cap
    /// one-sided rowers at the seats of their side.
    fn select_rowers(&self, piece: usize) -> Vec<usize> {
        let n = self.rowers.len();
        let slots = self.boats * self.layout.total();
        let offset = (piece * slots) % n;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (self.rower_loads[i], (i + n - offset) % n));

        let (mut port_cap, mut stbd_cap) = if self.class.is_sculling() {
            (usize::MAX, usize::MAX)
        } else {
            (self.boats * self.layout.port, self.boats * self.layout.starboard)
        };
        let mut chosen = Vec::with_capacity(slots);
        for i in order {
            if chosen.len() == slots {
                break;
            }
            match self.rowers[i].side {
                Side::Port if port_cap == 0 => continue,
                Side::Port => port_cap -= 1,
                Side::Starboard if stbd_cap == 0 => continue,
                Side::Starboard => stbd_cap -= 1,
                _ => {}
            }
            chosen.push(i);
        }
        chosen.sort_unstable();
        chosen
    }

    fn select_coxes(&self, piece: usize) -> Vec<usize> {
        if self.coxes.is_empty() {
            return Vec::new();
        }
        let n = self.coxes.len();
        let offset = (piece * self.boats) % n;
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (self.cox_loads[i], (i + n - offset) % n));
        order.truncate(self.boats);
        order.sort_unstable();
        order
    }

    // -----------------------------------------------------------------------
    // Seating
    // -----------------------------------------------------------------------

    fn place(&self, piece: usize, chosen: &[usize]) -> Vec<Seat> {
        let mut port_only = Vec::new();
        let mut stbd_only = Vec::new();
        let mut flexible = Vec::new();
        for &i in chosen {
            let athlete = &self.rowers[i];
            match athlete.side {
                Side::Port => port_only.push(athlete.id),
                Side::Starboard => stbd_only.push(athlete.id),
                _ => flexible.push(athlete.id),
            }
        }

        let mut seats = Vec::with_capacity(chosen.len());
        if self.class.is_sculling() {
            let mut group = port_only;
            group.extend(stbd_only);
            group.extend(flexible);
            group.sort_unstable();
            self.fill(&mut seats, Side::Both, piece, &group);
        } else {
            let need_port = (self.boats * self.layout.port).saturating_sub(port_only.len());
            let split = need_port.min(flexible.len());
            let mut port_group = port_only;
            port_group.extend_from_slice(&flexible[..split]);
            let mut stbd_group = stbd_only;
            stbd_group.extend_from_slice(&flexible[split..]);
            self.fill(&mut seats, Side::Port, piece, &port_group);
            self.fill(&mut seats, Side::Starboard, piece, &stbd_group);
        }
        seats
    }

    fn fill(&self, seats: &mut Vec<Seat>, rigging: Side, piece: usize, athletes: &[AthleteId]) {
        let numbers = self.class.seats_for(rigging);
        for ((boat, number), &athlete) in latin_slots(&numbers, self.boats, piece).into_iter().zip(athletes) {
            seats.push(Seat {
                boat,
                number,
                rigging,
                athlete,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// (repeated boat-mate pieces, cross-boat pairs already compared)
    fn piece_cost(&self, seats: &[Seat]) -> (usize, usize) {
        let mut repeats = 0;
        let mut stale = 0;
        for (i, a) in seats.iter().enumerate() {
            for b in &seats[i + 1..] {
                let key = pair(a.athlete, b.athlete);
                if a.boat == b.boat {
                    repeats += self.mates.get(&key).copied().unwrap_or(0);
                } else if self.raced.contains(&key)
                    || self.existing.is_some_and(|g| g.comparison_count(key.0, key.1) > 0)
                {
                    stale += 1;
                }
            }
        }
        (repeats, stale)
    }

    /// First-improvement hill climb over swaps of same-rigging seats in
    /// different boats. Bounded by `search_iterations` accepted swaps.
    fn improve(&self, seats: &mut [Seat]) {
        let mut cost = self.piece_cost(seats);
        for _ in 0..self.search_iterations {
            let mut improved = false;
            'scan: for i in 0..seats.len() {
                for j in i + 1..seats.len() {
                    if seats[i].boat == seats[j].boat || seats[i].rigging != seats[j].rigging {
                        continue;
                    }
                    swap_athletes(seats, i, j);
                    let candidate = self.piece_cost(seats);
                    if candidate < cost {
                        cost = candidate;
                        improved = true;
                        break 'scan;
                    }
                    swap_athletes(seats, i, j);
                }
            }
            if !improved {
                break;
            }
        }
    }

    fn commit(&mut self, chosen: &[usize], coxes: &[usize], seats: &[Seat]) {
        for &i in chosen {
            self.rower_loads[i] += 1;
        }
        for &c in coxes {
            self.cox_loads[c] += 1;
        }
        for (i, a) in seats.iter().enumerate() {
            for b in &seats[i + 1..] {
                let key = pair(a.athlete, b.athlete);
                if a.boat == b.boat {
                    *self.mates.entry(key).or_insert(0) += 1;
                } else {
                    self.raced.insert(key);
                }
            }
        }
    }
}

fn swap_athletes(seats: &mut [Seat], i: usize, j: usize) {
    let athlete = seats[i].athlete;
    seats[i].athlete = seats[j].athlete;
    seats[j].athlete = athlete;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_slots_cover_every_seat_once() {
        for piece in 0..4 {
            let slots = latin_slots(&[2, 4], 3, piece);
            let unique: BTreeSet<(usize, u8)> = slots.iter().copied().collect();
            assert_eq!(unique.len(), 6);
        }
    }

    #[test]
    fn latin_slots_shift_upper_tiers() {
        let first = latin_slots(&[1, 3], 2, 0);
        let second = latin_slots(&[1, 3], 2, 1);
        assert_eq!(first, vec![(0, 1), (1, 1), (0, 3), (1, 3)]);
        assert_eq!(second, vec![(0, 1), (1, 1), (1, 3), (0, 3)]);
    }

    #[test]
    fn selection_rotates_who_rests() {
        let rowers: Vec<Athlete> = (1..=5).map(|i| Athlete::new(i, "", Side::Both)).collect();
        let mut planner = Planner::new(BoatClass::Double, &rowers, &[], 2, None, 10);
        let mut rested = BTreeSet::new();
        for piece in 0..5 {
            let planned = planner.plan_piece(piece);
            assert_eq!(planned.resting.len(), 1);
            rested.insert(planned.resting[0]);
        }
        assert_eq!(rested.len(), 5);
        assert!(planner.rower_loads.iter().all(|&l| l == 4));
    }

    #[test]
    fn boat_names() {
        assert_eq!(boat_name(0), "Boat A");
        assert_eq!(boat_name(2), "Boat C");
        assert_eq!(boat_name(30), "Boat 31");
    }
}
