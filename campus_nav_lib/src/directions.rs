//! Turn-by-turn text derived from route geometry.
//!
//! The backend only returns a polyline, so turns are inferred from the
//! bearing change at each interior vertex.

use serde::Serialize;

use crate::{coordinate::Coordinate, geo_util};

/// Bearing changes below this are not worth announcing.
const STRAIGHT_DEG: f64 = 20.;
const TURN_DEG: f64 = 60.;
const SHARP_DEG: f64 = 120.;
const U_TURN_DEG: f64 = 170.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Depart,
    Straight,
    SlightLeft,
    Left,
    SharpLeft,
    SlightRight,
    Right,
    SharpRight,
    UTurn,
    Arrive,
}

impl Turn {
    fn phrase(self) -> &'static str {
        match self {
            Turn::Depart => "head out",
            Turn::Straight => "continue straight",
            Turn::SlightLeft => "bear left",
            Turn::Left => "turn left",
            Turn::SharpLeft => "turn sharp left",
            Turn::SlightRight => "bear right",
            Turn::Right => "turn right",
            Turn::SharpRight => "turn sharp right",
            Turn::UTurn => "make a U-turn",
            Turn::Arrive => "arrive at your destination",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    /// Path vertex the instruction applies to.
    pub vertex: usize,
    /// Distance from the previous instruction's vertex.
    pub distance_m: f64,
    pub turn: Turn,
    pub text: String,
}

pub fn classify_turn(delta_deg: f64) -> Turn {
    let magnitude = delta_deg.abs();
    let right = delta_deg > 0.;

    match magnitude {
        m if m >= U_TURN_DEG => Turn::UTurn,
        m if m >= SHARP_DEG => {
            if right {
                Turn::SharpRight
            } else {
                Turn::SharpLeft
            }
        }
        m if m >= TURN_DEG => {
            if right {
                Turn::Right
            } else {
                Turn::Left
            }
        }
        m if m >= STRAIGHT_DEG => {
            if right {
                Turn::SlightRight
            } else {
                Turn::SlightLeft
            }
        }
        _ => Turn::Straight,
    }
}

/// One depart instruction, one per real turn, and one arrival.
///
/// Straight-through vertices are folded into the next instruction's distance
/// so the list reads like spoken directions. Paths with fewer than two points
/// produce nothing.
pub fn generate_instructions(path: &[Coordinate]) -> Vec<Instruction> {
    if path.len() < 2 {
        return Vec::new();
    }

    let mut instructions = vec![Instruction {
        vertex: 0,
        distance_m: 0.,
        turn: Turn::Depart,
        text: format!("Head {}", compass_point(geo_util::bearing_deg(path[0], path[1]))),
    }];

    let mut since_last = 0.;
    for i in 1..path.len() - 1 {
        since_last += geo_util::haversine_m(path[i - 1], path[i]);

        // Duplicate vertices carry no direction
        if path[i] == path[i + 1] || path[i - 1] == path[i] {
            continue;
        }

        let incoming = geo_util::bearing_deg(path[i - 1], path[i]);
        let outgoing = geo_util::bearing_deg(path[i], path[i + 1]);
        let turn = classify_turn(geo_util::bearing_delta(incoming, outgoing));
        if turn == Turn::Straight {
            continue;
        }

        instructions.push(Instruction {
            vertex: i,
            distance_m: since_last,
            turn,
            text: format!("In {}, {}", format_distance(since_last), turn.phrase()),
        });
        since_last = 0.;
    }

    let last = path.len() - 1;
    since_last += geo_util::haversine_m(path[last - 1], path[last]);
    instructions.push(Instruction {
        vertex: last,
        distance_m: since_last,
        turn: Turn::Arrive,
        text: format!("In {}, {}", format_distance(since_last), Turn::Arrive.phrase()),
    });

    instructions
}

/// Rounds to 10 m below a kilometer, one decimal above.
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000. {
        format!("{:.1} km", meters / 1000.)
    } else {
        format!("{} m", ((meters / 10.).round() as i64 * 10).max(0))
    }
}

fn compass_point(bearing: f64) -> &'static str {
    const POINTS: [&str; 8] = ["north", "northeast", "east", "southeast", "south", "southwest", "west", "northwest"];
    POINTS[(((bearing + 22.5) % 360.) / 45.) as usize % 8]
}
