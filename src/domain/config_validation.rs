//! Configuration loading and validation.
//!
//! Builds an [`EngineConfig`] from a [`ConfigPort`]. Missing keys take their
//! defaults; present but unparsable or out-of-range values are rejected with
//! `ConfigInvalid`. The allow-list is the only mandatory key.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::engine::EngineConfig;
use crate::domain::error::EngineError;
use crate::domain::execution::ExecutionCosts;
use crate::domain::indicator_bank::IndicatorConfig;
use crate::domain::ohlcv::Timeframe;
use crate::domain::risk::{InstrumentLimits, InstrumentSpec, RiskConfig};
use crate::domain::signal::{ConflictPolicy, FactorWeights, SignalConfig};
use crate::ports::config_port::ConfigPort;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> EngineError {
    EngineError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parse a key if present. Unparsable values are errors, not defaults.
pub(crate) fn parse_opt<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, EngineError>
where
    T::Err: std::fmt::Display,
{
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(section, key, format!("cannot parse '{}': {}", raw.trim(), e))),
    }
}

pub(crate) fn parse_or<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, EngineError>
where
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(config, section, key)?.unwrap_or(default))
}

pub(crate) fn parse_bool_or(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: bool,
) -> Result<bool, EngineError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(invalid(section, key, format!("'{}' is not a boolean", other))),
        },
    }
}

pub(crate) fn require_positive(section: &str, key: &str, value: f64) -> Result<f64, EngineError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{} must be positive", key)))
    }
}

pub(crate) fn require_non_negative(section: &str, key: &str, value: f64) -> Result<f64, EngineError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{} must be non-negative", key)))
    }
}

fn require_fraction(section: &str, key: &str, value: f64) -> Result<f64, EngineError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{} must be between 0 and 1", key)))
    }
}

pub(crate) fn require_period(section: &str, key: &str, value: usize) -> Result<usize, EngineError> {
    if value >= 1 {
        Ok(value)
    } else {
        Err(invalid(section, key, format!("{} must be at least 1", key)))
    }
}

/// Comma-separated instrument list from `[instruments] allowed`.
pub fn parse_allowed(config: &dyn ConfigPort) -> Result<BTreeSet<String>, EngineError> {
    let raw = config
        .get_string("instruments", "allowed")
        .ok_or_else(|| EngineError::ConfigMissing {
            section: "instruments".to_string(),
            key: "allowed".to_string(),
        })?;
    let allowed: BTreeSet<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if allowed.is_empty() {
        return Err(invalid("instruments", "allowed", "allow-list is empty"));
    }
    Ok(allowed)
}

fn load_instrument(config: &dyn ConfigPort, name: &str) -> Result<InstrumentSpec, EngineError> {
    let section = format!("instrument.{}", name);
    let s = section.as_str();
    let defaults = InstrumentSpec::default();

    let min_volume = require_positive(
        s,
        "min_volume",
        parse_or(config, s, "min_volume", defaults.limits.min_volume)?,
    )?;
    let max_volume = require_positive(
        s,
        "max_volume",
        parse_or(config, s, "max_volume", defaults.limits.max_volume)?,
    )?;
    let volume_step = require_positive(
        s,
        "volume_step",
        parse_or(config, s, "volume_step", defaults.limits.volume_step)?,
    )?;
    let contract_size = require_positive(
        s,
        "contract_size",
        parse_or(config, s, "contract_size", defaults.limits.contract_size)?,
    )?;
    let default_volume = require_positive(
        s,
        "default_volume",
        parse_or(config, s, "default_volume", min_volume)?,
    )?;

    if min_volume > max_volume {
        return Err(invalid(s, "min_volume", "min_volume exceeds max_volume"));
    }
    if default_volume < min_volume || default_volume > max_volume {
        return Err(invalid(
            s,
            "default_volume",
            "default_volume must lie between min_volume and max_volume",
        ));
    }

    Ok(InstrumentSpec {
        limits: InstrumentLimits {
            min_volume,
            max_volume,
            volume_step,
            contract_size,
        },
        default_volume,
    })
}

pub fn load_risk_config(config: &dyn ConfigPort) -> Result<RiskConfig, EngineError> {
    let d = RiskConfig::default();
    let allowed = parse_allowed(config)?;
    let mut instruments = HashMap::new();
    for name in &allowed {
        instruments.insert(name.clone(), load_instrument(config, name)?);
    }

    let max_positions: usize = parse_or(config, "risk", "max_positions", d.max_positions)?;
    if max_positions == 0 {
        return Err(invalid("risk", "max_positions", "max_positions must be at least 1"));
    }
    let max_positions_per_instrument: usize = parse_or(
        config,
        "risk",
        "max_positions_per_instrument",
        d.max_positions_per_instrument,
    )?;
    if max_positions_per_instrument == 0 {
        return Err(invalid(
            "risk",
            "max_positions_per_instrument",
            "max_positions_per_instrument must be at least 1",
        ));
    }

    let max_aggregate_risk = parse_or(config, "risk", "max_aggregate_risk", d.max_aggregate_risk)?;
    if !(max_aggregate_risk > 0.0 && max_aggregate_risk <= 1.0) {
        return Err(invalid(
            "risk",
            "max_aggregate_risk",
            "max_aggregate_risk must be in (0, 1]",
        ));
    }
    let risk_per_trade = require_fraction(
        "risk",
        "risk_per_trade",
        parse_or(config, "risk", "risk_per_trade", d.risk_per_trade)?,
    )?;
    if risk_per_trade > max_aggregate_risk {
        return Err(invalid(
            "risk",
            "risk_per_trade",
            "risk_per_trade exceeds max_aggregate_risk",
        ));
    }

    Ok(RiskConfig {
        max_positions,
        max_positions_per_instrument,
        max_aggregate_risk,
        risk_per_trade,
        risk_reward_ratio: require_positive(
            "risk",
            "risk_reward_ratio",
            parse_or(config, "risk", "risk_reward_ratio", d.risk_reward_ratio)?,
        )?,
        stop_atr_multiple: require_positive(
            "risk",
            "stop_atr_multiple",
            parse_or(config, "risk", "stop_atr_multiple", d.stop_atr_multiple)?,
        )?,
        fallback_stop_pct: require_positive(
            "risk",
            "fallback_stop_pct",
            parse_or(config, "risk", "fallback_stop_pct", d.fallback_stop_pct)?,
        )?,
        min_signal_strength: require_fraction(
            "risk",
            "min_signal_strength",
            parse_or(config, "risk", "min_signal_strength", d.min_signal_strength)?,
        )?,
        trailing_atr_multiple: require_non_negative(
            "risk",
            "trailing_atr_multiple",
            parse_or(config, "risk", "trailing_atr_multiple", d.trailing_atr_multiple)?,
        )?,
        use_support_resistance_stops: parse_bool_or(
            config,
            "risk",
            "use_support_resistance_stops",
            d.use_support_resistance_stops,
        )?,
        allowed,
        instruments,
    })
}

fn load_weights(config: &dyn ConfigPort) -> Result<FactorWeights, EngineError> {
    let d = FactorWeights::default();
    let weight = |key: &str, default: f64| -> Result<f64, EngineError> {
        require_non_negative("signal", key, parse_or(config, "signal", key, default)?)
    };
    let weights = FactorWeights {
        trend: weight("weight_trend", d.trend)?,
        rsi: weight("weight_rsi", d.rsi)?,
        macd: weight("weight_macd", d.macd)?,
        stochastic: weight("weight_stochastic", d.stochastic)?,
        bollinger: weight("weight_bollinger", d.bollinger)?,
        support_resistance: weight("weight_support_resistance", d.support_resistance)?,
        prediction: weight("weight_prediction", d.prediction)?,
    };
    let total = weights.trend
        + weights.rsi
        + weights.macd
        + weights.stochastic
        + weights.bollinger
        + weights.support_resistance
        + weights.prediction;
    if total <= 0.0 {
        return Err(invalid("signal", "weight_trend", "all factor weights are zero"));
    }
    Ok(weights)
}

pub fn load_signal_config(config: &dyn ConfigPort) -> Result<SignalConfig, EngineError> {
    let d = SignalConfig::default();
    let rsi_overbought: f64 = parse_or(config, "signal", "rsi_overbought", d.rsi_overbought)?;
    let rsi_oversold: f64 = parse_or(config, "signal", "rsi_oversold", d.rsi_oversold)?;
    if !(0.0 < rsi_oversold && rsi_oversold < rsi_overbought && rsi_overbought < 100.0) {
        return Err(invalid(
            "signal",
            "rsi_oversold",
            "expected 0 < rsi_oversold < rsi_overbought < 100",
        ));
    }
    let adx_strong: f64 = parse_or(config, "signal", "adx_strong", d.adx_strong)?;
    let adx_weak: f64 = parse_or(config, "signal", "adx_weak", d.adx_weak)?;
    if adx_weak > adx_strong {
        return Err(invalid("signal", "adx_weak", "adx_weak exceeds adx_strong"));
    }
    let conflict_policy: ConflictPolicy = match config.get_string("signal", "conflict_policy") {
        Some(raw) => raw
            .parse()
            .map_err(|e: String| invalid("signal", "conflict_policy", e))?,
        None => d.conflict_policy,
    };

    Ok(SignalConfig {
        weights: load_weights(config)?,
        dead_zone: require_fraction(
            "signal",
            "dead_zone",
            parse_or(config, "signal", "dead_zone", d.dead_zone)?,
        )?,
        prediction_dead_zone: require_fraction(
            "signal",
            "prediction_dead_zone",
            parse_or(config, "signal", "prediction_dead_zone", d.prediction_dead_zone)?,
        )?,
        conflict_policy,
        sr_proximity: require_fraction(
            "signal",
            "sr_proximity",
            parse_or(config, "signal", "sr_proximity", d.sr_proximity)?,
        )?,
        rsi_overbought,
        rsi_oversold,
        adx_strong,
        adx_weak,
    })
}

pub fn load_indicator_config(config: &dyn ConfigPort) -> Result<IndicatorConfig, EngineError> {
    let d = IndicatorConfig::default();
    let period = |key: &str, default: usize| -> Result<usize, EngineError> {
        require_period("indicators", key, parse_or(config, "indicators", key, default)?)
    };
    let ind = IndicatorConfig {
        sma_fast: period("sma_fast", d.sma_fast)?,
        sma_slow: period("sma_slow", d.sma_slow)?,
        ema_period: period("ema_period", d.ema_period)?,
        rsi_period: period("rsi_period", d.rsi_period)?,
        macd_fast: period("macd_fast", d.macd_fast)?,
        macd_slow: period("macd_slow", d.macd_slow)?,
        macd_signal: period("macd_signal", d.macd_signal)?,
        bollinger_period: period("bollinger_period", d.bollinger_period)?,
        bollinger_stddev: require_positive(
            "indicators",
            "bollinger_stddev",
            parse_or(config, "indicators", "bollinger_stddev", d.bollinger_stddev)?,
        )?,
        atr_period: period("atr_period", d.atr_period)?,
        adx_period: period("adx_period", d.adx_period)?,
        stoch_k: period("stoch_k", d.stoch_k)?,
        stoch_d: period("stoch_d", d.stoch_d)?,
        vwap_period: period("vwap_period", d.vwap_period)?,
        sr_window: period("sr_window", d.sr_window)?,
        sr_touches: period("sr_touches", d.sr_touches)?,
        sr_tolerance: require_fraction(
            "indicators",
            "sr_tolerance",
            parse_or(config, "indicators", "sr_tolerance", d.sr_tolerance)?,
        )?,
    };
    if ind.sma_fast >= ind.sma_slow {
        return Err(invalid("indicators", "sma_fast", "sma_fast must be below sma_slow"));
    }
    if ind.macd_fast >= ind.macd_slow {
        return Err(invalid("indicators", "macd_fast", "macd_fast must be below macd_slow"));
    }
    Ok(ind)
}

pub fn load_costs(config: &dyn ConfigPort) -> Result<ExecutionCosts, EngineError> {
    Ok(ExecutionCosts {
        commission_per_lot: require_non_negative(
            "costs",
            "commission_per_lot",
            parse_or(config, "costs", "commission_per_lot", 0.0)?,
        )?,
        slippage_pct: require_non_negative(
            "costs",
            "slippage_pct",
            parse_or(config, "costs", "slippage_pct", 0.0)?,
        )?,
    })
}

/// Load and validate the whole engine configuration.
pub fn load_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, EngineError> {
    let d = EngineConfig::default();

    let window_capacity: usize = parse_or(config, "engine", "window_capacity", d.window_capacity)?;
    let window_capacity = require_period("engine", "window_capacity", window_capacity)?;
    let timeframe: Timeframe = match config.get_string("engine", "timeframe") {
        Some(raw) => raw
            .parse()
            .map_err(|e: String| invalid("engine", "timeframe", e))?,
        None => d.timeframe,
    };
    let prediction_timeout_ms: u64 = parse_or(
        config,
        "engine",
        "prediction_timeout_ms",
        d.prediction_timeout.as_millis() as u64,
    )?;
    if prediction_timeout_ms == 0 {
        return Err(invalid(
            "engine",
            "prediction_timeout_ms",
            "prediction_timeout_ms must be positive",
        ));
    }
    let pending_timeout_secs: i64 = parse_or(
        config,
        "engine",
        "pending_timeout_secs",
        d.pending_timeout.num_seconds(),
    )?;
    if pending_timeout_secs <= 0 {
        return Err(invalid(
            "engine",
            "pending_timeout_secs",
            "pending_timeout_secs must be positive",
        ));
    }
    let retry_backoff_ms: u64 = parse_or(
        config,
        "engine",
        "retry_backoff_ms",
        d.retry_backoff.as_millis() as u64,
    )?;

    let indicators = load_indicator_config(config)?;
    if window_capacity < indicators.required_bars() {
        return Err(invalid(
            "engine",
            "window_capacity",
            format!(
                "window of {} bars cannot warm up indicators needing {}",
                window_capacity,
                indicators.required_bars()
            ),
        ));
    }

    Ok(EngineConfig {
        window_capacity,
        timeframe,
        prediction_timeout: Duration::from_millis(prediction_timeout_ms),
        pending_timeout: chrono::Duration::seconds(pending_timeout_secs),
        max_submit_retries: parse_or(config, "engine", "max_submit_retries", d.max_submit_retries)?,
        retry_backoff: Duration::from_millis(retry_backoff_ms),
        indicators,
        signal: load_signal_config(config)?,
        risk: load_risk_config(config)?,
        costs: load_costs(config)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const MINIMAL: &str = "[instruments]\nallowed = EURUSD\n";

    fn key_of(err: EngineError) -> String {
        match err {
            EngineError::ConfigInvalid { key, .. } | EngineError::ConfigMissing { key, .. } => key,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let c = load_engine_config(&make_config(MINIMAL)).unwrap();
        assert_eq!(c.window_capacity, EngineConfig::default().window_capacity);
        assert_eq!(c.signal, SignalConfig::default());
        assert_eq!(c.indicators, IndicatorConfig::default());
        assert!(c.risk.allowed.contains("EURUSD"));
        assert_eq!(c.risk.spec_for("EURUSD"), InstrumentSpec {
            default_volume: InstrumentLimits::default().min_volume,
            ..InstrumentSpec::default()
        });
    }

    #[test]
    fn full_config_is_read() {
        let c = load_engine_config(&make_config(
            r#"
[engine]
window_capacity = 300
timeframe = m15
prediction_timeout_ms = 250
pending_timeout_secs = 60
max_submit_retries = 4

[instruments]
allowed = eurusd, GBPUSD

[instrument.EURUSD]
min_volume = 0.01
default_volume = 0.1
max_volume = 5
volume_step = 0.01
contract_size = 100000

[risk]
max_positions = 3
max_aggregate_risk = 0.02
risk_per_trade = 0.005
use_support_resistance_stops = no

[signal]
conflict_policy = prediction_veto
dead_zone = 0.05
weight_prediction = 0.5

[costs]
commission_per_lot = 7
slippage_pct = 0.01
"#,
        ))
        .unwrap();
        assert_eq!(c.window_capacity, 300);
        assert_eq!(c.timeframe, Timeframe::M15);
        assert_eq!(c.prediction_timeout, Duration::from_millis(250));
        assert_eq!(c.pending_timeout.num_seconds(), 60);
        assert_eq!(c.max_submit_retries, 4);
        assert_eq!(c.risk.allowed.len(), 2);
        assert_eq!(c.risk.spec_for("EURUSD").limits.contract_size, 100000.0);
        assert_eq!(c.risk.spec_for("EURUSD").default_volume, 0.1);
        assert_eq!(c.risk.max_positions, 3);
        assert!(!c.risk.use_support_resistance_stops);
        assert_eq!(c.signal.conflict_policy, ConflictPolicy::PredictionVeto);
        assert_eq!(c.signal.weights.prediction, 0.5);
        assert_eq!(c.costs.commission_per_lot, 7.0);
    }

    #[test]
    fn missing_allow_list_fails() {
        let err = load_engine_config(&make_config("[risk]\nmax_positions = 2\n")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigMissing { ref key, .. } if key == "allowed"));
    }

    #[test]
    fn empty_allow_list_fails() {
        let err = load_engine_config(&make_config("[instruments]\nallowed = , ,\n")).unwrap_err();
        assert_eq!(key_of(err), "allowed");
    }

    #[test]
    fn unparsable_value_is_invalid_not_defaulted() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[risk]\nmax_positions = lots\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "max_positions");
    }

    #[test]
    fn risk_per_trade_above_ceiling_fails() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[risk]\nmax_aggregate_risk = 0.02\nrisk_per_trade = 0.05\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "risk_per_trade");
    }

    #[test]
    fn zero_risk_per_trade_is_allowed() {
        let c = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[risk]\nrisk_per_trade = 0\n",
        ))
        .unwrap();
        assert_eq!(c.risk.risk_per_trade, 0.0);
    }

    #[test]
    fn unknown_timeframe_fails() {
        let err = load_engine_config(&make_config(
            "[engine]\ntimeframe = W1\n[instruments]\nallowed = EURUSD\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "timeframe");
    }

    #[test]
    fn unknown_conflict_policy_fails() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[signal]\nconflict_policy = majority\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "conflict_policy");
    }

    #[test]
    fn negative_weight_fails() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[signal]\nweight_rsi = -0.1\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "weight_rsi");
    }

    #[test]
    fn inverted_rsi_thresholds_fail() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[signal]\nrsi_oversold = 80\nrsi_overbought = 20\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "rsi_oversold");
    }

    #[test]
    fn sma_fast_must_be_below_slow() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[indicators]\nsma_fast = 50\nsma_slow = 20\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "sma_fast");
    }

    #[test]
    fn zero_period_fails() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[indicators]\nrsi_period = 0\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "rsi_period");
    }

    #[test]
    fn instrument_default_volume_outside_limits_fails() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[instrument.EURUSD]\nmin_volume = 0.1\nmax_volume = 1\ndefault_volume = 2\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "default_volume");
    }

    #[test]
    fn negative_costs_fail() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[costs]\nslippage_pct = -1\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "slippage_pct");
    }

    #[test]
    fn bad_boolean_fails() {
        let err = load_engine_config(&make_config(
            "[instruments]\nallowed = EURUSD\n[risk]\nuse_support_resistance_stops = perhaps\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "use_support_resistance_stops");
    }

    #[test]
    fn window_too_small_for_indicators_fails() {
        let err = load_engine_config(&make_config(
            "[engine]\nwindow_capacity = 30\n[instruments]\nallowed = EURUSD\n",
        ))
        .unwrap_err();
        assert_eq!(key_of(err), "window_capacity");
    }
}
