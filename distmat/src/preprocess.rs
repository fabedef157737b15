//! Per-vector preprocessing of raw signals before any decomposition.
use crate::dataset::KeyedDataset;
use crate::error::MatrixError;
use nalgebra::{Complex, ComplexField, DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Offset added to the baseline to avoid division by (nearly) zero.
const BASELINE_OFFSET: f64 = 0.1;
const BASELINE_PERCENTILE: f64 = 20.;
const NONLINEAR_DEGREE: usize = 5;
const HIGHPASS_ORDER: usize = 6;
/// Cutoff of the highpass filter, relative to the Nyquist frequency. One cycle per 360 samples.
const HIGHPASS_CUTOFF: f64 = (1. / 360.) / 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preprocess {
    Raw,
    /// Subtract the mean.
    Sub,
    /// Relative change from the mean, (y - m) / (m + 0.1).
    Dff,
    /// Relative change from the 20th percentile.
    DffPercentile,
    /// `Dff`, then remove the linear trend.
    DffDetrend,
    /// `Dff`, then remove the least-squares polynomial of degree 5.
    DffDetrendNonlin,
    /// `Dff`, then a 6th order Butterworth highpass filter.
    DffHighpass,
}

impl std::default::Default for Preprocess {
    fn default() -> Self {
        Preprocess::Raw
    }
}

impl std::str::FromStr for Preprocess {
    type Err = MatrixError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Preprocess::Raw),
            "sub" => Ok(Preprocess::Sub),
            "dff" => Ok(Preprocess::Dff),
            "dff-percentile" => Ok(Preprocess::DffPercentile),
            "dff-detrend" => Ok(Preprocess::DffDetrend),
            "dff-detrendnonlin" => Ok(Preprocess::DffDetrendNonlin),
            "dff-highpass" => Ok(Preprocess::DffHighpass),
            _ => Err(MatrixError::InvalidParameter(format!(
                "unknown preprocessing method {}",
                s
            ))),
        }
    }
}

impl Preprocess {
    pub fn apply(&self, y: &DVector<f64>) -> DVector<f64> {
        match self {
            Preprocess::Raw => y.clone(),
            Preprocess::Sub => y.add_scalar(-y.mean()),
            Preprocess::Dff => dff(y, y.mean()),
            Preprocess::DffPercentile => dff(y, percentile(y, BASELINE_PERCENTILE)),
            Preprocess::DffDetrend => detrend(&dff(y, y.mean()), 1),
            Preprocess::DffDetrendNonlin => detrend(&dff(y, y.mean()), NONLINEAR_DEGREE),
            Preprocess::DffHighpass => {
                let (b, a) = butter_highpass(HIGHPASS_ORDER, HIGHPASS_CUTOFF);
                lfilter(&b, &a, &dff(y, y.mean()))
            }
        }
    }
    /// Apply to every vector in the dataset.
    pub fn run(&self, data: &KeyedDataset) -> KeyedDataset {
        match self {
            Preprocess::Raw => data.clone(),
            Preprocess::DffHighpass => {
                let filter = crate::broadcast::broadcast(butter_highpass(HIGHPASS_ORDER, HIGHPASS_CUTOFF));
                data.map_values_with_to(data.dimension(), &filter, |(b, a), y| {
                    lfilter(b, a, &dff(y, y.mean()))
                })
            }
            _ => data.map_values_to(data.dimension(), |y| self.apply(y)),
        }
    }
}

fn dff(y: &DVector<f64>, baseline: f64) -> DVector<f64> {
    y.add_scalar(-baseline) / (baseline + BASELINE_OFFSET)
}

/// The `q`-th percentile, linearly interpolated between the closest ranks.
fn percentile(y: &DVector<f64>, q: f64) -> f64 {
    let mut sorted: Vec<_> = y.iter().copied().collect();
    sorted.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.is_empty() {
        return 0f64;
    }
    let rank = q / 100. * (sorted.len() - 1) as f64;
    let (lower, upper) = (rank.floor() as usize, rank.ceil() as usize);
    let frac = rank - lower as f64;
    sorted[lower] * (1. - frac) + sorted[upper] * frac
}

/// Subtract the least-squares polynomial of `degree` fitted on x = 1, 2, ..., len.
/// The degree is lowered to len - 1 for short vectors.
fn detrend(y: &DVector<f64>, degree: usize) -> DVector<f64> {
    if y.is_empty() {
        return y.clone();
    }
    let degree = degree.min(y.len() - 1);
    // Rescale x into [-1, 1]. The span of the polynomials does not change, but the Vandermonde matrix is far better conditioned.
    let scale = (y.len() - 1).max(1) as f64;
    let vandermonde = DMatrix::from_fn(y.len(), degree + 1, |i, j| {
        (2. * i as f64 / scale - 1.).powi(j as i32)
    });
    match vandermonde.clone().svd(true, true).solve(y, 1e-12) {
        Ok(coef) => y - vandermonde * coef,
        Err(why) => {
            warn!("DETREND\t{}\t{}", degree, why);
            y.clone()
        }
    }
}

/// Coefficients `(b, a)` of a digital Butterworth highpass filter of `order`,
/// with `cutoff` relative to the Nyquist frequency (0 < cutoff < 1).
/// The analog prototype is mapped by the bilinear transform after prewarping the cutoff.
fn butter_highpass(order: usize, cutoff: f64) -> (Vec<f64>, Vec<f64>) {
    let warped = 4. * (std::f64::consts::PI * cutoff / 2.).tan();
    // Poles of the analog lowpass prototype, on the left half of the unit circle.
    let prototype: Vec<Complex<f64>> = (0..order)
        .map(|i| {
            let m = 2. * i as f64 + 1. - order as f64;
            -Complex::new(0., std::f64::consts::PI * m / (2. * order as f64)).exp()
        })
        .collect();
    let mut gain = 1. / prototype.iter().fold(Complex::new(1., 0.), |acc, p| acc * -p).re;
    // Lowpass to highpass: poles at warped / p, zeros at the origin.
    let poles: Vec<_> = prototype.iter().map(|p| Complex::new(warped, 0.) / p).collect();
    let zeros = vec![Complex::new(0., 0.); order];
    // Bilinear transform, s = 4 (z - 1) / (z + 1).
    let fs2 = Complex::new(4., 0.);
    let num = zeros.iter().fold(Complex::new(1., 0.), |acc, z| acc * (fs2 - z));
    let den = poles.iter().fold(Complex::new(1., 0.), |acc, p| acc * (fs2 - p));
    gain *= (num / den).re;
    let zeros: Vec<_> = zeros.iter().map(|z| (fs2 + z) / (fs2 - z)).collect();
    let poles: Vec<_> = poles.iter().map(|p| (fs2 + p) / (fs2 - p)).collect();
    let b = poly(&zeros).iter().map(|c| gain * c.re).collect();
    let a = poly(&poles).iter().map(|c| c.re).collect();
    (b, a)
}

/// Coefficients of the monic polynomial with the given roots, highest degree first.
fn poly(roots: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let mut coef = vec![Complex::new(1., 0.)];
    for root in roots {
        let mut next = coef.clone();
        next.push(Complex::new(0., 0.));
        for (i, c) in coef.iter().enumerate() {
            next[i + 1] -= root * c;
        }
        coef = next;
    }
    coef
}

/// Direct form IIR filter, `a[0] y[n] = Σ b[i] x[n-i] - Σ_{i>0} a[i] y[n-i]`, starting from rest.
fn lfilter(b: &[f64], a: &[f64], x: &DVector<f64>) -> DVector<f64> {
    let a0 = a.first().copied().unwrap_or(1.);
    let mut y = DVector::zeros(x.len());
    for n in 0..x.len() {
        let forward: f64 = b
            .iter()
            .enumerate()
            .take_while(|&(i, _)| i <= n)
            .map(|(i, b)| b * x[n - i])
            .sum();
        let feedback: f64 = a
            .iter()
            .enumerate()
            .skip(1)
            .take_while(|&(i, _)| i <= n)
            .map(|(i, a)| a * y[n - i])
            .sum();
        y[n] = (forward - feedback) / a0;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn baseline_methods() {
        let y = DVector::from_vec(vec![1., 2., 3., 4., 5.]);
        let sub = Preprocess::Sub.apply(&y);
        assert!(sub.mean().abs() < 1e-12);
        let dff = Preprocess::Dff.apply(&y);
        assert!((dff[4] - 2. / 3.1).abs() < 1e-12);
        // 20th percentile of 1..=5 is 1.8.
        assert!((percentile(&y, 20.) - 1.8).abs() < 1e-12);
        let dffp = Preprocess::DffPercentile.apply(&y);
        assert!((dffp[0] - (1. - 1.8) / 1.9).abs() < 1e-12);
        assert_eq!(Preprocess::Raw.apply(&y), y);
    }
    #[test]
    fn detrend_removes_line() {
        let y = DVector::from_fn(20, |i, _| 3. * i as f64 + 2.);
        let flat = detrend(&y, 1);
        assert!(flat.abs().max() < 1e-9);
        let detrended = Preprocess::DffDetrend.apply(&y);
        assert!(detrended.abs().max() < 1e-9);
    }
    #[test]
    fn detrend_removes_polynomial() {
        let y = DVector::from_fn(40, |i, _| {
            let x = (i + 1) as f64;
            0.01 * x.powi(3) - 0.5 * x * x + 2. * x - 7.
        });
        assert!(detrend(&y, NONLINEAR_DEGREE).abs().max() < 1e-6);
        assert!(detrend(&y, 1).abs().max() > 1.);
        let y = DVector::from_fn(40, |i, _| ((i as f64) * 0.3).sin() * 50. + 100.);
        let nonlin = Preprocess::DffDetrendNonlin.apply(&y);
        let linear = Preprocess::DffDetrend.apply(&y);
        assert_eq!(nonlin.len(), 40);
        assert!(nonlin.norm() < linear.norm());
        // Short vectors lower the degree and fit exactly.
        let short = DVector::from_vec(vec![1., 4., 2.]);
        assert!(detrend(&short, NONLINEAR_DEGREE).abs().max() < 1e-9);
    }
    #[test]
    fn butterworth_coefficients() {
        let (b, a) = butter_highpass(2, 0.5);
        let expected_b = [0.29289322, -0.58578644, 0.29289322];
        let expected_a = [1., 0., 0.17157288];
        for (x, y) in b.iter().zip(expected_b.iter()).chain(a.iter().zip(expected_a.iter())) {
            assert!((x - y).abs() < 1e-7, "{:?}\t{:?}", b, a);
        }
        let (b, a) = butter_highpass(HIGHPASS_ORDER, HIGHPASS_CUTOFF);
        assert_eq!((b.len(), a.len()), (7, 7));
        // No gain at DC, unit gain at the Nyquist frequency.
        assert!(b.iter().sum::<f64>().abs() < 1e-12);
        let alternate = |c: &[f64]| -> f64 {
            c.iter().enumerate().map(|(i, c)| if i % 2 == 0 { *c } else { -c }).sum()
        };
        assert!((alternate(&b) / alternate(&a) - 1.).abs() < 1e-6);
    }
    #[test]
    fn highpass_filter() {
        let (b, a) = butter_highpass(2, 0.5);
        let x = DVector::from_vec(vec![1., 0., 0., 0.]);
        let y = lfilter(&b, &a, &x);
        // Impulse response: b[0], b[1], b[2] - a[2] b[0], -a[2] b[1].
        assert!((y[0] - b[0]).abs() < 1e-12);
        assert!((y[1] - b[1]).abs() < 1e-12);
        assert!((y[2] - (b[2] - a[2] * b[0])).abs() < 1e-12);
        assert!((y[3] + a[2] * b[1]).abs() < 1e-12);
        let y = DVector::from_fn(50, |i, _| 10. + (i as f64 * 2.).sin());
        let filtered = Preprocess::DffHighpass.apply(&y);
        assert_eq!(filtered.len(), 50);
        assert!(filtered.iter().all(|x| x.is_finite()));
    }
    #[test]
    fn parse() {
        assert_eq!(
            "dff-percentile".parse::<Preprocess>().unwrap(),
            Preprocess::DffPercentile
        );
        assert_eq!(
            "dff-detrendnonlin".parse::<Preprocess>().unwrap(),
            Preprocess::DffDetrendNonlin
        );
        assert_eq!(
            "dff-highpass".parse::<Preprocess>().unwrap(),
            Preprocess::DffHighpass
        );
        let parsed: Preprocess = serde_json::from_str("\"dff-highpass\"").unwrap();
        assert_eq!(parsed, Preprocess::DffHighpass);
        assert!("highpass".parse::<Preprocess>().is_err());
    }
}
