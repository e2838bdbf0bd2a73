use ndarray::{ArrayBase, Data, Dimension};

#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

/// Euclidean norm of a vector, Frobenius norm of a matrix.
#[inline]
pub fn l2_norm<S, D>(values: &ArrayBase<S, D>) -> f64
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
