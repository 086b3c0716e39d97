use crate::errors::{RcfError, Result};

/// If the test condition is false, return an InvalidArgument error with
/// the given message. Otherwise return Ok.
pub(crate) fn check_argument(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(RcfError::InvalidArgument { msg })
    }
}

/// Like `check_argument`, but for conditions that can only fail when the
/// internal state is corrupt.
pub(crate) fn check_state(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(RcfError::InvariantViolation { msg })
    }
}

pub fn l1_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .sum()
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Validates a point at the forest boundary. NaN and infinities are
/// rejected; -0.0 is folded into +0.0 so that cut comparisons are
/// deterministic. This runs exactly once per public operation.
pub(crate) fn sanitize(point: &[f32]) -> Result<Vec<f32>> {
    let mut clean = Vec::with_capacity(point.len());
    for &value in point {
        check_argument(value.is_finite(), "input values must be finite")?;
        clean.push(if value == 0.0 { 0.0 } else { value });
    }
    Ok(clean)
}

/// Shifts `block` into the tail of `ring`, dropping the oldest entries.
pub(crate) fn shift_into<T: Copy>(ring: &mut [T], block: &[T]) {
    let len = ring.len();
    let width = block.len();
    ring.copy_within(width.., 0);
    ring[len - width..].copy_from_slice(block);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_nan_and_folds_signed_zero() {
        assert!(sanitize(&[0.0, f32::NAN]).is_err());
        assert!(sanitize(&[f32::INFINITY]).is_err());
        let clean = sanitize(&[-0.0, 1.5]).unwrap();
        assert!(clean[0].is_sign_positive());
        assert_eq!(clean[1], 1.5);
    }

    #[test]
    fn shift_into_drops_oldest() {
        let mut ring = [1, 2, 3, 4];
        shift_into(&mut ring, &[5, 6]);
        assert_eq!(ring, [3, 4, 5, 6]);
    }
}
