use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix1};

/// Computes differences between each element of x and each element of y
/// resulting in a 2d array of shape (len(x), len(y)) where entry (i, j) is `x_i - y_j`
pub fn pairwise_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    y: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Array2<F> {
    let mut result = Array2::zeros((x.len(), y.len()));
    for (mut row, &xi) in result.rows_mut().into_iter().zip(x.iter()) {
        row.assign(&y.mapv(|yj| xi - yj));
    }
    result
}

/// Lossless conversion of a model float to `f64` (NaN when not representable)
#[inline(always)]
pub(crate) fn into_f64<F: Float>(v: F) -> f64 {
    num_traits::cast(v).unwrap_or(f64::NAN)
}

/// Returns the first value occurring twice in `x` if any
pub(crate) fn first_duplicate<F: Float>(x: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Option<F> {
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.windows(2).find(|w| w[0] == w[1]).map(|w| w[0])
}
