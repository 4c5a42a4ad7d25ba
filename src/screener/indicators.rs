//! Pure indicator functions over candle series.
//!
//! All functions return `None` until enough history exists.

use rust_decimal::Decimal;

use crate::domain::Candle;

/// Exponential moving average of the closes, last value only.
///
/// Seeded with the SMA of the first `period` closes, then
/// EMA[t] = alpha * close[t] + (1 - alpha) * EMA[t-1] with alpha = 2 / (period + 1).
pub fn ema(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let alpha = Decimal::TWO / Decimal::from(period as u64 + 1);
    let seed: Decimal = closes[..period].iter().sum::<Decimal>() / Decimal::from(period as u64);

    Some(
        closes[period..]
            .iter()
            .fold(seed, |prev, close| alpha * close + (Decimal::ONE - alpha) * prev),
    )
}

/// True range of `bar` given the previous close.
pub fn true_range(bar: &Candle, prev_close: Decimal) -> Decimal {
    let high_low = bar.high - bar.low;
    let high_close = (bar.high - prev_close).abs();
    let low_close = (bar.low - prev_close).abs();
    high_low.max(high_close).max(low_close)
}

/// Average true range over the last `period` bars (simple mean of true ranges).
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let window = &candles[candles.len() - period - 1..];
    let sum: Decimal = window
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .sum();

    Some(sum / Decimal::from(period as u64))
}
