use ndarray::Array2;

/// Squared error summed over outputs, averaged over the rows of the batch.
///
/// When `y_true` differs from `y_pred` only in the taken action of each row this is
/// exactly the mean squared TD error of the batch.
pub fn mse(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> f64 {
    let rows = y_true.nrows().max(1) as f64;
    (y_true - y_pred).map(|v| v.powi(2)).sum() / rows
}

pub fn mse_prime(y_true: &Array2<f64>, y_pred: &Array2<f64>) -> Array2<f64> {
    let rows = y_true.nrows().max(1) as f64;
    2.0 * (y_pred - y_true) / rows
}
