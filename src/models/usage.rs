use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ZodiacSign {
    Aries,
    Taurus,
    Gemini,
    Cancer,
    Leo,
    Virgo,
    Libra,
    Scorpio,
    Sagittarius,
    Capricorn,
    Aquarius,
    Pisces,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Fire,
    Earth,
    Air,
    Water,
}

impl ZodiacSign {
    pub const ALL: [ZodiacSign; 12] = [
        ZodiacSign::Aries,
        ZodiacSign::Taurus,
        ZodiacSign::Gemini,
        ZodiacSign::Cancer,
        ZodiacSign::Leo,
        ZodiacSign::Virgo,
        ZodiacSign::Libra,
        ZodiacSign::Scorpio,
        ZodiacSign::Sagittarius,
        ZodiacSign::Capricorn,
        ZodiacSign::Aquarius,
        ZodiacSign::Pisces,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZodiacSign::Aries => "aries",
            ZodiacSign::Taurus => "taurus",
            ZodiacSign::Gemini => "gemini",
            ZodiacSign::Cancer => "cancer",
            ZodiacSign::Leo => "leo",
            ZodiacSign::Virgo => "virgo",
            ZodiacSign::Libra => "libra",
            ZodiacSign::Scorpio => "scorpio",
            ZodiacSign::Sagittarius => "sagittarius",
            ZodiacSign::Capricorn => "capricorn",
            ZodiacSign::Aquarius => "aquarius",
            ZodiacSign::Pisces => "pisces",
        }
    }

    /// Zero-based position on the wheel, Aries first.
    pub fn index(&self) -> usize {
        ZodiacSign::ALL
            .iter()
            .position(|sign| sign == self)
            .unwrap_or(0)
    }

    pub fn element(&self) -> Element {
        match self.index() % 4 {
            0 => Element::Fire,
            1 => Element::Earth,
            2 => Element::Air,
            _ => Element::Water,
        }
    }
}

impl fmt::Display for ZodiacSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZodiacSign {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        ZodiacSign::ALL
            .iter()
            .copied()
            .find(|sign| sign.as_str() == normalized)
            .ok_or_else(|| format!("unknown zodiac sign: {value}"))
    }
}

/// One calculator run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorUsage {
    pub id: String,
    pub sign_a: ZodiacSign,
    pub sign_b: ZodiacSign,
    pub score: u8,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/usage`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageCreateInput {
    pub sign_a: ZodiacSign,
    pub sign_b: ZodiacSign,
    pub score: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum UsageRange {
    Week,
    Month,
    Quarter,
    Year,
    All,
    Custom { from: NaiveDate, to: NaiveDate },
}

impl UsageRange {
    /// Preset length in days; `None` for `All` and `Custom`.
    pub fn preset_days(&self) -> Option<i64> {
        match self {
            UsageRange::Week => Some(7),
            UsageRange::Month => Some(30),
            UsageRange::Quarter => Some(90),
            UsageRange::Year => Some(365),
            UsageRange::All | UsageRange::Custom { .. } => None,
        }
    }
}

impl Default for UsageRange {
    fn default() -> Self {
        UsageRange::Month
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageDailyPoint {
    pub date: NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignPairCount {
    pub sign_a: ZodiacSign,
    pub sign_b: ZodiacSign,
    pub count: i64,
}

/// Admin usage history view model.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub range: UsageRange,
    pub window_start: Option<NaiveDate>,
    pub window_end: NaiveDate,
    pub total: i64,
    /// Newest day first.
    pub daily: Vec<UsageDailyPoint>,
    /// Oldest day first.
    pub chart: Vec<UsageDailyPoint>,
    pub popular_pairs: Vec<SignPairCount>,
    /// Newest first.
    pub recent: Vec<CalculatorUsage>,
}
