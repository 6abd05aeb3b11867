use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Softmax function - Convert scores into a probability distribution
pub fn softmax(scores: ArrayView1<f64>) -> Array1<f64> {
    let max = scores.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
    // We shift the elements by the max, because otherwise we would have to
    // compute the exp of very large values which overflows
    let exp = scores.mapv(|x| (x - max).exp());
    let sum = exp.sum();

    exp / sum
}

/// Mean categorical cross-entropy of raw `scores` against integer `labels`,
/// together with its gradient WRT the scores
pub fn cross_entropy(
    scores: &ArrayView2<f64>,
    labels: &ArrayView1<usize>,
) -> Result<(f64, Array2<f64>)> {
    if scores.nrows() != labels.len() {
        return Err(Error::Shape(format!(
            "{} score rows but {} labels",
            scores.nrows(),
            labels.len()
        )));
    }
    if let Some(&label) = labels.iter().find(|&&label| label >= scores.ncols()) {
        return Err(Error::Shape(format!(
            "label {} does not fit {} output classes",
            label,
            scores.ncols()
        )));
    }

    let n = scores.nrows() as f64;
    let mut grad = Array2::zeros(scores.raw_dim());
    let mut total = 0f64;

    for ((row, &label), mut grad_row) in scores
        .axis_iter(Axis(0))
        .zip(labels.iter())
        .zip(grad.axis_iter_mut(Axis(0)))
    {
        let probabilities = softmax(row);
        // -log p(label) computed through log-sum-exp
        let max = row.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
        let log_sum_exp = max + row.mapv(|x| (x - max).exp()).sum().ln();
        total += log_sum_exp - row[label];

        grad_row.assign(&probabilities);
        grad_row[label] -= 1f64;
    }

    grad /= n;

    Ok((total / n, grad))
}

/// Index of the highest score in each row
pub fn argmax(scores: &ArrayView2<f64>) -> Array1<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (idx, &x)| {
                    if x > best.1 {
                        (idx, x)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn softmax_is_a_distribution() {
        let probabilities = softmax(array![1000.0, 1000.0, 0.0].view());

        assert_abs_diff_eq!(probabilities.sum(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(probabilities[0], 0.5, epsilon = 1e-12);
        assert!(probabilities[2] >= 0.0);
    }

    #[test]
    fn uniform_scores_give_log_of_class_count() {
        let scores = Array2::zeros((4, 10));
        let labels = array![0, 3, 7, 9];

        let (loss, grad) = cross_entropy(&scores.view(), &labels.view()).unwrap();

        assert_abs_diff_eq!(loss, 10f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(grad[[1, 3]], (0.1 - 1.0) / 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[[1, 0]], 0.1 / 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad.sum(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn confident_correct_prediction_has_small_loss() {
        let scores = array![[20.0, 0.0, 0.0], [0.0, 0.0, 20.0]];
        let (loss, _) = cross_entropy(&scores.view(), &array![0, 2].view()).unwrap();

        assert!(loss >= 0.0 && loss < 1e-6);
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        let scores = Array2::zeros((1, 3));

        assert!(matches!(
            cross_entropy(&scores.view(), &array![3].view()),
            Err(Error::Shape(_))
        ));
        assert!(matches!(
            cross_entropy(&scores.view(), &array![0, 1].view()),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn argmax_picks_first_maximum() {
        let scores = array![[0.1, 0.7, 0.2], [0.5, 0.5, 0.0], [-1.0, -3.0, -0.5]];

        assert_eq!(argmax(&scores.view()), array![1usize, 0, 2]);
    }
}
