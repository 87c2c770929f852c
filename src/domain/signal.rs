//! Signal aggregation.
//!
//! Each factor casts a vote in {-1, 0, +1} with a weight. The signal strength
//! is the weighted mean of the votes over the factors that are available this
//! cycle, so an unavailable factor (indicator still warming up, prediction
//! missing) drops out of the denominator and its weight is redistributed.

use std::fmt;
use std::str::FromStr;

use super::indicator::{IndicatorRole, IndicatorSnapshot, IndicatorValue};
use super::prediction::PredictionScore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Flat => Direction::Flat,
        }
    }

    /// +1 for long, -1 for short, 0 for flat.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::Flat => 0.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Flat => "flat",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorKind {
    Trend,
    Rsi,
    Macd,
    Stochastic,
    Bollinger,
    SupportResistance,
    Prediction,
}

impl FactorKind {
    pub fn name(&self) -> &'static str {
        match self {
            FactorKind::Trend => "trend",
            FactorKind::Rsi => "rsi",
            FactorKind::Macd => "macd",
            FactorKind::Stochastic => "stochastic",
            FactorKind::Bollinger => "bollinger",
            FactorKind::SupportResistance => "support_resistance",
            FactorKind::Prediction => "prediction",
        }
    }
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One contribution to a signal. `weight` is the effective weight used in the
/// sum; it is zero when the factor was unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Factor {
    pub kind: FactorKind,
    pub weight: f64,
    pub vote: f64,
    pub available: bool,
}

impl Factor {
    fn available(kind: FactorKind, weight: f64, vote: f64) -> Self {
        Self {
            kind,
            weight,
            vote,
            available: true,
        }
    }

    fn unavailable(kind: FactorKind) -> Self {
        Self {
            kind,
            weight: 0.0,
            vote: 0.0,
            available: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub direction: Direction,
    /// Signed score in [-1, 1]. Its sign matches `direction` unless flat.
    pub strength: f64,
    pub factors: Vec<Factor>,
}

impl Signal {
    pub fn flat() -> Self {
        Self {
            direction: Direction::Flat,
            strength: 0.0,
            factors: Vec::new(),
        }
    }

    /// Classify a raw score. Scores inside the dead zone are flat.
    pub fn from_strength(strength: f64, dead_zone: f64, factors: Vec<Factor>) -> Self {
        let strength = if strength.is_nan() {
            0.0
        } else {
            strength.clamp(-1.0, 1.0)
        };
        let direction = if strength.abs() < dead_zone || strength == 0.0 {
            Direction::Flat
        } else if strength > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        };
        Self {
            direction,
            strength,
            factors,
        }
    }

    /// Unsigned magnitude of the score.
    pub fn confidence(&self) -> f64 {
        self.strength.abs()
    }

    pub fn factor(&self, kind: FactorKind) -> Option<&Factor> {
        self.factors.iter().find(|f| f.kind == kind)
    }
}

/// How a prediction that disagrees with the indicators is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Plain weighted sum.
    #[default]
    Weighted,
    /// A prediction vote opposing the indicator consensus forces a flat signal.
    PredictionVeto,
    /// The prediction is recorded but carries no weight.
    IndicatorsOnly,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weighted" => Ok(ConflictPolicy::Weighted),
            "prediction_veto" => Ok(ConflictPolicy::PredictionVeto),
            "indicators_only" => Ok(ConflictPolicy::IndicatorsOnly),
            other => Err(format!(
                "unknown conflict policy '{}' (expected weighted, prediction_veto or indicators_only)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorWeights {
    pub trend: f64,
    pub rsi: f64,
    pub macd: f64,
    pub stochastic: f64,
    pub bollinger: f64,
    pub support_resistance: f64,
    pub prediction: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        FactorWeights {
            trend: 0.25,
            rsi: 0.07,
            macd: 0.07,
            stochastic: 0.06,
            bollinger: 0.05,
            support_resistance: 0.10,
            prediction: 0.40,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub weights: FactorWeights,
    pub dead_zone: f64,
    pub prediction_dead_zone: f64,
    pub conflict_policy: ConflictPolicy,
    /// Relative distance to a support/resistance level that counts as "near".
    pub sr_proximity: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub adx_strong: f64,
    pub adx_weak: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            weights: FactorWeights::default(),
            dead_zone: 0.1,
            prediction_dead_zone: 0.05,
            conflict_policy: ConflictPolicy::Weighted,
            sr_proximity: 0.01,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            adx_strong: 25.0,
            adx_weak: 20.0,
        }
    }
}

fn cmp_vote(a: f64, b: f64) -> f64 {
    if a > b {
        1.0
    } else if a < b {
        -1.0
    } else {
        0.0
    }
}

fn trend_factor(ind: &IndicatorSnapshot, config: &SignalConfig) -> Factor {
    let (Some(fast), Some(slow)) = (
        ind.simple(IndicatorRole::SmaFast),
        ind.simple(IndicatorRole::SmaSlow),
    ) else {
        return Factor::unavailable(FactorKind::Trend);
    };

    let mut weight = config.weights.trend;
    if let Some(IndicatorValue::Adx { adx, .. }) = ind.get(IndicatorRole::Adx) {
        if adx > config.adx_strong {
            weight *= 1.5;
        } else if adx < config.adx_weak {
            weight *= 0.5;
        }
    }
    Factor::available(FactorKind::Trend, weight, cmp_vote(fast, slow))
}

fn rsi_factor(ind: &IndicatorSnapshot, config: &SignalConfig) -> Factor {
    match ind.simple(IndicatorRole::Rsi) {
        Some(rsi) => {
            let vote = if rsi < config.rsi_oversold {
                1.0
            } else if rsi > config.rsi_overbought {
                -1.0
            } else {
                0.0
            };
            Factor::available(FactorKind::Rsi, config.weights.rsi, vote)
        }
        None => Factor::unavailable(FactorKind::Rsi),
    }
}

fn macd_factor(ind: &IndicatorSnapshot, config: &SignalConfig) -> Factor {
    match ind.get(IndicatorRole::Macd) {
        Some(IndicatorValue::Macd { line, signal, .. }) => {
            Factor::available(FactorKind::Macd, config.weights.macd, cmp_vote(line, signal))
        }
        _ => Factor::unavailable(FactorKind::Macd),
    }
}

fn stochastic_factor(ind: &IndicatorSnapshot, config: &SignalConfig) -> Factor {
    match ind.get(IndicatorRole::Stochastic) {
        Some(IndicatorValue::Stochastic { k, d }) => {
            Factor::available(FactorKind::Stochastic, config.weights.stochastic, cmp_vote(k, d))
        }
        _ => Factor::unavailable(FactorKind::Stochastic),
    }
}

fn bollinger_factor(ind: &IndicatorSnapshot, config: &SignalConfig) -> Factor {
    match (ind.get(IndicatorRole::Bollinger), ind.last_close) {
        (Some(IndicatorValue::Bollinger { upper, lower, .. }), Some(close)) => {
            let vote = if close < lower {
                1.0
            } else if close > upper {
                -1.0
            } else {
                0.0
            };
            Factor::available(FactorKind::Bollinger, config.weights.bollinger, vote)
        }
        _ => Factor::unavailable(FactorKind::Bollinger),
    }
}

fn support_resistance_factor(ind: &IndicatorSnapshot, config: &SignalConfig) -> Factor {
    let (Some(IndicatorValue::Levels { support, resistance }), Some(close)) =
        (ind.get(IndicatorRole::SupportResistance), ind.last_close)
    else {
        return Factor::unavailable(FactorKind::SupportResistance);
    };

    let distance = |level: Option<f64>| level.map(|l| (close - l).abs() / close);
    let near_support = distance(support).filter(|d| *d <= config.sr_proximity);
    let near_resistance = distance(resistance).filter(|d| *d <= config.sr_proximity);
    let vote = match (near_support, near_resistance) {
        (Some(s), Some(r)) => cmp_vote(r, s),
        (Some(_), None) => 1.0,
        (None, Some(_)) => -1.0,
        (None, None) => 0.0,
    };
    Factor::available(
        FactorKind::SupportResistance,
        config.weights.support_resistance,
        vote,
    )
}

fn prediction_factor(prediction: Option<&PredictionScore>, config: &SignalConfig) -> Factor {
    match prediction {
        Some(p) => {
            let weight = match config.conflict_policy {
                ConflictPolicy::IndicatorsOnly => 0.0,
                _ => config.weights.prediction * p.confidence(),
            };
            Factor::available(
                FactorKind::Prediction,
                weight,
                p.vote(config.prediction_dead_zone),
            )
        }
        None => Factor::unavailable(FactorKind::Prediction),
    }
}

fn weighted_mean(factors: &[Factor]) -> Option<f64> {
    let total: f64 = factors.iter().filter(|f| f.available).map(|f| f.weight).sum();
    if total <= 0.0 {
        return None;
    }
    let sum: f64 = factors
        .iter()
        .filter(|f| f.available)
        .map(|f| f.vote * f.weight)
        .sum();
    Some(sum / total)
}

/// Combine indicator votes and the prediction into one signal.
///
/// Pure: the same inputs always produce the same signal.
pub fn aggregate(
    indicators: &IndicatorSnapshot,
    prediction: Option<&PredictionScore>,
    config: &SignalConfig,
) -> Signal {
    let factors = vec![
        trend_factor(indicators, config),
        rsi_factor(indicators, config),
        macd_factor(indicators, config),
        stochastic_factor(indicators, config),
        bollinger_factor(indicators, config),
        support_resistance_factor(indicators, config),
        prediction_factor(prediction, config),
    ];

    let Some(strength) = weighted_mean(&factors) else {
        return Signal {
            direction: Direction::Flat,
            strength: 0.0,
            factors,
        };
    };

    if config.conflict_policy == ConflictPolicy::PredictionVeto {
        let (prediction, indicator_factors): (Vec<Factor>, Vec<Factor>) = factors
            .iter()
            .partition(|f| f.kind == FactorKind::Prediction);
        let consensus = weighted_mean(&indicator_factors).unwrap_or(0.0);
        let prediction_vote = prediction.first().map(|f| f.vote).unwrap_or(0.0);
        if prediction_vote != 0.0 && consensus != 0.0 && prediction_vote.signum() != consensus.signum()
        {
            return Signal {
                direction: Direction::Flat,
                strength: 0.0,
                factors,
            };
        }
    }

    Signal::from_strength(strength, config.dead_zone, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::IndicatorType;
    use approx::assert_relative_eq;

    fn bullish_snapshot() -> IndicatorSnapshot {
        let mut s = IndicatorSnapshot::new(None, Some(100.0));
        s.insert(
            IndicatorRole::SmaFast,
            IndicatorType::Sma(20),
            Some(IndicatorValue::Simple(101.0)),
        );
        s.insert(
            IndicatorRole::SmaSlow,
            IndicatorType::Sma(50),
            Some(IndicatorValue::Simple(99.0)),
        );
        s.insert(
            IndicatorRole::Macd,
            IndicatorType::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            Some(IndicatorValue::Macd {
                line: 0.5,
                signal: 0.2,
                histogram: 0.3,
            }),
        );
        s
    }

    fn config_with(weights: FactorWeights) -> SignalConfig {
        SignalConfig {
            weights,
            ..SignalConfig::default()
        }
    }

    #[test]
    fn no_available_factors_is_flat_zero() {
        let s = aggregate(&IndicatorSnapshot::default(), None, &SignalConfig::default());
        assert_eq!(s.direction, Direction::Flat);
        assert_eq!(s.strength, 0.0);
        assert!(s.factors.iter().all(|f| !f.available));
    }

    #[test]
    fn inside_dead_zone_is_flat() {
        let s = Signal::from_strength(0.02, 0.05, Vec::new());
        assert_eq!(s.direction, Direction::Flat);
        let s = Signal::from_strength(-0.04, 0.05, Vec::new());
        assert_eq!(s.direction, Direction::Flat);
        let s = Signal::from_strength(0.06, 0.05, Vec::new());
        assert_eq!(s.direction, Direction::Long);
    }

    #[test]
    fn strength_is_clamped() {
        let s = Signal::from_strength(3.0, 0.05, Vec::new());
        assert_eq!(s.strength, 1.0);
        assert_eq!(s.confidence(), 1.0);
        let s = Signal::from_strength(-3.0, 0.05, Vec::new());
        assert_eq!(s.strength, -1.0);
        assert_eq!(s.direction, Direction::Short);
    }

    #[test]
    fn unanimous_bullish_indicators_give_full_long() {
        let s = aggregate(&bullish_snapshot(), None, &SignalConfig::default());
        assert_eq!(s.direction, Direction::Long);
        assert_relative_eq!(s.strength, 1.0);
        assert!(!s.factor(FactorKind::Prediction).unwrap().available);
    }

    #[test]
    fn missing_prediction_redistributes_weight() {
        let weights = FactorWeights {
            trend: 0.3,
            macd: 0.3,
            prediction: 0.4,
            ..FactorWeights::default()
        };
        let mut snap = bullish_snapshot();
        snap.insert(
            IndicatorRole::Macd,
            IndicatorType::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            Some(IndicatorValue::Macd {
                line: 0.1,
                signal: 0.2,
                histogram: -0.1,
            }),
        );
        // trend +1, macd -1 with equal weights.
        let s = aggregate(&snap, None, &config_with(weights.clone()));
        assert_relative_eq!(s.strength, 0.0);

        let bull = PredictionScore::new(0.8, 1.0);
        let s = aggregate(&snap, Some(&bull), &config_with(weights));
        assert_relative_eq!(s.strength, 0.4);
        assert_eq!(s.direction, Direction::Long);
    }

    #[test]
    fn prediction_weight_scales_with_confidence() {
        let weights = FactorWeights {
            trend: 0.5,
            prediction: 0.5,
            ..FactorWeights::default()
        };
        let mut snap = IndicatorSnapshot::new(None, Some(100.0));
        snap.insert(
            IndicatorRole::SmaFast,
            IndicatorType::Sma(20),
            Some(IndicatorValue::Simple(99.0)),
        );
        snap.insert(
            IndicatorRole::SmaSlow,
            IndicatorType::Sma(50),
            Some(IndicatorValue::Simple(100.0)),
        );
        let bull = PredictionScore::new(0.9, 0.5);
        let s = aggregate(&snap, Some(&bull), &config_with(weights));
        // (-0.5 + 0.25) / 0.75
        assert_relative_eq!(s.strength, -1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(s.factor(FactorKind::Prediction).unwrap().weight, 0.25);
    }

    #[test]
    fn adx_modulates_trend_weight() {
        let mut snap = bullish_snapshot();
        snap.insert(
            IndicatorRole::Adx,
            IndicatorType::Adx(14),
            Some(IndicatorValue::Adx {
                adx: 30.0,
                plus_di: 25.0,
                minus_di: 10.0,
            }),
        );
        let config = SignalConfig::default();
        let s = aggregate(&snap, None, &config);
        assert_relative_eq!(
            s.factor(FactorKind::Trend).unwrap().weight,
            config.weights.trend * 1.5
        );

        snap.insert(
            IndicatorRole::Adx,
            IndicatorType::Adx(14),
            Some(IndicatorValue::Adx {
                adx: 15.0,
                plus_di: 12.0,
                minus_di: 10.0,
            }),
        );
        let s = aggregate(&snap, None, &config);
        assert_relative_eq!(
            s.factor(FactorKind::Trend).unwrap().weight,
            config.weights.trend * 0.5
        );
    }

    #[test]
    fn rsi_and_bollinger_votes() {
        let mut snap = IndicatorSnapshot::new(None, Some(89.0));
        snap.insert(
            IndicatorRole::Rsi,
            IndicatorType::Rsi(14),
            Some(IndicatorValue::Simple(25.0)),
        );
        snap.insert(
            IndicatorRole::Bollinger,
            IndicatorType::Bollinger {
                period: 20,
                stddev_mult_x100: 200,
            },
            Some(IndicatorValue::Bollinger {
                upper: 110.0,
                middle: 100.0,
                lower: 90.0,
            }),
        );
        let s = aggregate(&snap, None, &SignalConfig::default());
        assert_eq!(s.factor(FactorKind::Rsi).unwrap().vote, 1.0);
        assert_eq!(s.factor(FactorKind::Bollinger).unwrap().vote, 1.0);
        assert_eq!(s.direction, Direction::Long);
    }

    #[test]
    fn near_resistance_votes_short() {
        let mut snap = IndicatorSnapshot::new(None, Some(100.0));
        snap.insert(
            IndicatorRole::SupportResistance,
            IndicatorType::SupportResistance {
                window: 20,
                touches: 2,
            },
            Some(IndicatorValue::Levels {
                support: Some(95.0),
                resistance: Some(100.5),
            }),
        );
        let s = aggregate(&snap, None, &SignalConfig::default());
        assert_eq!(s.factor(FactorKind::SupportResistance).unwrap().vote, -1.0);
        assert_eq!(s.direction, Direction::Short);
    }

    #[test]
    fn prediction_veto_forces_flat_on_disagreement() {
        let config = SignalConfig {
            conflict_policy: ConflictPolicy::PredictionVeto,
            ..SignalConfig::default()
        };
        let bear = PredictionScore::new(-0.9, 0.9);
        let s = aggregate(&bullish_snapshot(), Some(&bear), &config);
        assert_eq!(s.direction, Direction::Flat);
        assert_eq!(s.strength, 0.0);

        let bull = PredictionScore::new(0.9, 0.9);
        let s = aggregate(&bullish_snapshot(), Some(&bull), &config);
        assert_eq!(s.direction, Direction::Long);
    }

    #[test]
    fn indicators_only_ignores_prediction_weight() {
        let config = SignalConfig {
            conflict_policy: ConflictPolicy::IndicatorsOnly,
            ..SignalConfig::default()
        };
        let bear = PredictionScore::new(-1.0, 1.0);
        let s = aggregate(&bullish_snapshot(), Some(&bear), &config);
        assert_relative_eq!(s.strength, 1.0);
        let p = s.factor(FactorKind::Prediction).unwrap();
        assert!(p.available);
        assert_eq!(p.weight, 0.0);
    }

    #[test]
    fn aggregate_is_deterministic() {
        let p = PredictionScore::new(0.3, 0.7);
        let config = SignalConfig::default();
        let a = aggregate(&bullish_snapshot(), Some(&p), &config);
        let b = aggregate(&bullish_snapshot(), Some(&p), &config);
        assert_eq!(a, b);
    }

    #[test]
    fn conflict_policy_parses() {
        assert_eq!(
            "prediction_veto".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::PredictionVeto
        );
        assert_eq!(
            " Weighted ".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::Weighted
        );
        assert!("majority".parse::<ConflictPolicy>().is_err());
    }
}
