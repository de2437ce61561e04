//! Relative Strength Index with Wilder's smoothing

/// RSI for every close in `closes`.
///
/// Gains and losses are smoothed with `alpha = 1 / period`, starting from
/// zero at the first bar (which has no change). Values before index
/// `period - 1` are `None`. A window with no losses reads 100.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 {
        return out;
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for i in 0..closes.len() {
        let change = if i == 0 { 0.0 } else { closes[i] - closes[i - 1] };
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };

        if i == 0 {
            avg_gain = gain;
            avg_loss = loss;
        } else {
            avg_gain = (1.0 - alpha) * avg_gain + alpha * gain;
            avg_loss = (1.0 - alpha) * avg_loss + alpha * loss;
        }

        if i + 1 >= period {
            out[i] = Some(rsi_value(avg_gain, avg_loss));
        }
    }

    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
