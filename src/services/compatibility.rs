use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::usage::{Element, ZodiacSign};

/// Angular relationship between two signs on the wheel.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Aspect {
    Conjunction,
    SemiSextile,
    Sextile,
    Square,
    Trine,
    Quincunx,
    Opposition,
}

impl Aspect {
    pub fn between(a: ZodiacSign, b: ZodiacSign) -> Self {
        let diff = a.index().abs_diff(b.index());
        match diff.min(12 - diff) {
            0 => Aspect::Conjunction,
            1 => Aspect::SemiSextile,
            2 => Aspect::Sextile,
            3 => Aspect::Square,
            4 => Aspect::Trine,
            5 => Aspect::Quincunx,
            _ => Aspect::Opposition,
        }
    }

    fn modifier(&self) -> i32 {
        match self {
            Aspect::Conjunction => 5,
            Aspect::SemiSextile => -5,
            Aspect::Sextile => 5,
            Aspect::Square => -10,
            Aspect::Trine => 10,
            Aspect::Quincunx => -5,
            Aspect::Opposition => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReading {
    pub sign_a: ZodiacSign,
    pub sign_b: ZodiacSign,
    pub aspect: Aspect,
    pub score: u8,
    pub verdict: &'static str,
}

fn element_affinity(a: Element, b: Element) -> i32 {
    use Element::*;
    match (a, b) {
        _ if a == b => 85,
        (Fire, Air) | (Air, Fire) | (Earth, Water) | (Water, Earth) => 80,
        (Fire, Earth) | (Earth, Fire) | (Air, Water) | (Water, Air) => 50,
        (Earth, Air) | (Air, Earth) => 45,
        _ => 40,
    }
}

/// Symmetric score in `0..=100`.
pub fn compatibility_score(a: ZodiacSign, b: ZodiacSign) -> u8 {
    let raw = element_affinity(a.element(), b.element()) + Aspect::between(a, b).modifier();
    raw.clamp(0, 100) as u8
}

pub fn verdict(score: u8) -> &'static str {
    match score {
        90..=100 => "kindred spirits",
        75..=89 => "strong match",
        55..=74 => "worth exploring",
        40..=54 => "takes effort",
        _ => "challenging",
    }
}

pub fn read_pair(a: ZodiacSign, b: ZodiacSign) -> CompatibilityReading {
    let score = compatibility_score(a, b);
    CompatibilityReading {
        sign_a: a,
        sign_b: b,
        aspect: Aspect::between(a, b),
        score,
        verdict: verdict(score),
    }
}

/// Parses two user-entered sign names.
pub fn parse_pair(a: &str, b: &str) -> AppResult<(ZodiacSign, ZodiacSign)> {
    let first = a.parse::<ZodiacSign>().map_err(AppError::validation)?;
    let second = b.parse::<ZodiacSign>().map_err(AppError::validation)?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_symmetric_and_bounded() {
        for a in ZodiacSign::ALL {
            for b in ZodiacSign::ALL {
                let score = compatibility_score(a, b);
                assert_eq!(score, compatibility_score(b, a));
                assert!(score <= 100);
            }
        }
    }

    #[test]
    fn trines_beat_squares() {
        assert_eq!(Aspect::between(ZodiacSign::Aries, ZodiacSign::Leo), Aspect::Trine);
        assert_eq!(compatibility_score(ZodiacSign::Aries, ZodiacSign::Leo), 95);
        assert_eq!(Aspect::between(ZodiacSign::Aries, ZodiacSign::Cancer), Aspect::Square);
        assert_eq!(compatibility_score(ZodiacSign::Aries, ZodiacSign::Cancer), 30);
        assert_eq!(Aspect::between(ZodiacSign::Pisces, ZodiacSign::Aries), Aspect::SemiSextile);
    }

    #[test]
    fn parse_pair_rejects_unknown_signs() {
        assert!(parse_pair("leo", "Libra").is_ok());
        assert!(parse_pair("leo", "dragon").is_err());
    }
}
