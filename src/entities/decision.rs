use serde::{Deserialize, Serialize};

use super::{now_rfc3339, Entity, EntityId, RemoteOrder};

/// Highest rating a point can carry.
pub const MAX_RATING: u8 = 5;

/// Points allowed on each side of a worksheet.
pub const MAX_POINTS_PER_SIDE: usize = 5;

/// A rated argument for or against a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub text: String,
    #[serde(default, deserialize_with = "de_rating")]
    pub rating: u8,
}

fn de_rating<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(raw.clamp(0.0, MAX_RATING as f64).round() as u8)
}

impl Point {
    /// New unrated point.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            rating: 0,
        }
    }

    /// Set the rating, clamped to `0..=MAX_RATING`.
    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = rating.min(MAX_RATING);
        self
    }
}

/// Which column of the worksheet a point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointSide {
    Positive,
    Negative,
}

impl PointSide {
    fn suffix(&self) -> &'static str {
        match self {
            PointSide::Positive => "pos",
            PointSide::Negative => "neg",
        }
    }
}

/// Overall leaning of a worksheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Pro ratings outweigh con ratings.
    #[serde(alias = "Geralmente Positivo")]
    Positive,
    /// Con ratings outweigh pro ratings.
    #[serde(alias = "Geralmente Negativo")]
    Negative,
    /// Both sides score the same.
    #[serde(alias = "Neutro ou Balanceado")]
    Balanced,
    /// Anything older clients stored that is not one of the above.
    #[default]
    #[serde(other)]
    Unspecified,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "mostly positive"),
            Sentiment::Negative => write!(f, "mostly negative"),
            Sentiment::Balanced => write!(f, "neutral or balanced"),
            Sentiment::Unspecified => write!(f, "unspecified"),
        }
    }
}

impl Sentiment {
    /// Leaning implied by the two score totals.
    pub fn from_scores(positive: u32, negative: u32) -> Self {
        match positive.cmp(&negative) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Balanced,
        }
    }
}

/// A saved decision-support worksheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: EntityId,
    pub problem: String,
    #[serde(default, deserialize_with = "de_points")]
    pub positive_points: Vec<Point>,
    #[serde(default, deserialize_with = "de_points")]
    pub negative_points: Vec<Point>,
    #[serde(default)]
    pub reflection: String,
    #[serde(default)]
    pub overall_sentiment: Sentiment,
    #[serde(default)]
    pub timestamp: String,
}

/// Points arrive as an array, as null, or as a JSON-encoded string from
/// rows written by text-column schemas.
fn de_points<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Vec<Point>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        serde_json::Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}

impl Decision {
    /// New worksheet for `problem`, timestamped now.
    pub fn new(id: EntityId, problem: impl Into<String>) -> Self {
        Self {
            id,
            problem: problem.into(),
            positive_points: Vec::new(),
            negative_points: Vec::new(),
            reflection: String::new(),
            overall_sentiment: Sentiment::Balanced,
            timestamp: now_rfc3339(),
        }
    }

    /// Set the reflection note.
    pub fn with_reflection(mut self, reflection: impl Into<String>) -> Self {
        self.reflection = reflection.into();
        self
    }

    fn side_mut(&mut self, side: PointSide) -> &mut Vec<Point> {
        match side {
            PointSide::Positive => &mut self.positive_points,
            PointSide::Negative => &mut self.negative_points,
        }
    }

    /// Append a point to one side.
    ///
    /// Blank text and full sides are refused (returns false). The point id is
    /// derived from `stamp` and the side so that both columns can share one
    /// clock.
    pub fn add_point(&mut self, side: PointSide, stamp: i64, text: &str, rating: u8) -> bool {
        let text = text.trim();
        let points = self.side_mut(side);
        if text.is_empty() || points.len() >= MAX_POINTS_PER_SIDE {
            return false;
        }
        let id = format!("{}-{}", stamp, side.suffix());
        points.push(Point::new(id, text).with_rating(rating));
        self.overall_sentiment = self.evaluate();
        true
    }

    /// Change the rating of a point on either side. Returns false when the
    /// point does not exist.
    pub fn rate_point(&mut self, point_id: &str, rating: u8) -> bool {
        let found = self
            .positive_points
            .iter_mut()
            .chain(self.negative_points.iter_mut())
            .find(|p| p.id == point_id);
        match found {
            Some(point) => {
                point.rating = rating.min(MAX_RATING);
                self.overall_sentiment = self.evaluate();
                true
            }
            None => false,
        }
    }

    /// Sum of ratings on each side, `(positive, negative)`.
    pub fn scores(&self) -> (u32, u32) {
        let sum = |points: &[Point]| points.iter().map(|p| p.rating as u32).sum::<u32>();
        (sum(&self.positive_points), sum(&self.negative_points))
    }

    /// Leaning implied by the current ratings.
    pub fn evaluate(&self) -> Sentiment {
        let (positive, negative) = self.scores();
        Sentiment::from_scores(positive, negative)
    }
}

#[derive(Deserialize)]
struct DecisionRow {
    id: EntityId,
    problem: String,
    #[serde(default, deserialize_with = "de_points")]
    positive_points: Vec<Point>,
    #[serde(default, deserialize_with = "de_points")]
    negative_points: Vec<Point>,
    #[serde(default)]
    reflection: Option<String>,
    #[serde(default)]
    overall_sentiment: Option<Sentiment>,
    #[serde(default)]
    created_at: Option<String>,
}

impl Entity for Decision {
    const KIND: &'static str = "Decision";
    const STORAGE_KEY: &'static str = "@decision_history";
    const REMOTE_TABLE: &'static str = "decisions";
    const REMOTE_ORDER: RemoteOrder = RemoteOrder {
        column: "created_at",
        ascending: false,
    };

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn timestamp(&self) -> &str {
        &self.timestamp
    }

    fn to_row(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "problem": self.problem,
            "positive_points": self.positive_points,
            "negative_points": self.negative_points,
            "reflection": self.reflection,
            "overall_sentiment": self.overall_sentiment,
            "created_at": self.timestamp,
        })
    }

    fn from_row(row: serde_json::Value) -> Result<Self, serde_json::Error> {
        let row: DecisionRow = serde_json::from_value(row)?;
        Ok(Self {
            id: row.id,
            problem: row.problem,
            positive_points: row.positive_points,
            negative_points: row.negative_points,
            reflection: row.reflection.unwrap_or_default(),
            overall_sentiment: row.overall_sentiment.unwrap_or_default(),
            timestamp: row.created_at.unwrap_or_else(now_rfc3339),
        })
    }
}
