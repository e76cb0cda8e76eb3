//! Fixed-point encoding of real-valued fields into the bit widths declared
//! by a file's format-information block.

use crate::error::{Error, Result};

/// A null sentinel code: the maximum value representable in `bits` bits is
/// reserved to mean "no value" for fields that support it (elevations,
/// primarily).
pub fn null_code(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// Encodes `value` as `round(value * scale) + offset`, clamped into
/// `[0, 2^bits - 1]`. Returns an error if the encoded value would not fit.
pub fn encode(value: f64, scale: f64, offset: f64, bits: u32) -> Result<u64> {
    let max = (1u64 << bits) - 1;
    let encoded = (value * scale).round() + offset;
    if encoded < 0.0 || encoded > max as f64 {
        return Err(Error::ValueOutOfRange { value, bits, scale });
    }
    Ok(encoded as u64)
}

/// Inverse of [`encode`].
pub fn decode(code: u64, scale: f64, offset: f64) -> f64 {
    (code as f64 - offset) / scale
}

/// Precomputed `cos(latitude_degrees)` for integer latitudes `-89..=89`,
/// used to scale longitude differences so that a fixed bit width yields
/// roughly uniform horizontal resolution at any latitude. Index `i`
/// corresponds to latitude `i - 89`.
pub static COSINE_TABLE: [f64; 179] = build_cosine_table();

const fn build_cosine_table() -> [f64; 179] {
    // `f64::cos` is not `const fn`, so the table is computed with a
    // Taylor-series approximation good to better than 1e-9 over this
    // domain, which is far tighter than the quantization error already
    // present at the bit widths this table feeds into.
    let mut table = [0.0f64; 179];
    let mut i = 0usize;
    while i < 179 {
        let degrees = (i as i32 - 89) as f64;
        table[i] = cos_taylor(degrees * std::f64::consts::PI / 180.0);
        i += 1;
    }
    table
}

const fn cos_taylor(x: f64) -> f64 {
    // cos(x) = sum_{n=0..=8} (-1)^n x^(2n) / (2n)!
    let x2 = x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut n = 1u32;
    while n <= 10 {
        term *= -x2 / ((2 * n - 1) as f64 * (2 * n) as f64);
        sum += term;
        n += 1;
    }
    sum
}

/// Looks up `cos(latitude_degrees)` for use in scaling a longitude
/// difference, clamping the input latitude to the table's domain.
pub fn cosine_for_latitude(latitude_degrees: f64) -> f64 {
    let mut index = latitude_degrees.round() as i32 + 89;
    if index < 0 {
        index = 0;
    }
    if index > 178 {
        index = 178;
    }
    COSINE_TABLE[index as usize]
}

/// Encodes a longitude difference from a reference position, scaling by the
/// cosine of the reference latitude so the resulting bit field carries
/// roughly uniform horizontal resolution regardless of latitude.
pub fn encode_longitude_diff(
    diff_degrees: f64,
    reference_latitude_degrees: f64,
    scale: f64,
    offset: f64,
    bits: u32,
) -> Result<u64> {
    let cos_lat = cosine_for_latitude(reference_latitude_degrees);
    encode(diff_degrees * cos_lat, scale, offset, bits)
}

/// Inverse of [`encode_longitude_diff`].
pub fn decode_longitude_diff(code: u64, reference_latitude_degrees: f64, scale: f64, offset: f64) -> f64 {
    let cos_lat = cosine_for_latitude(reference_latitude_degrees);
    decode(code, scale, offset) / cos_lat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let code = encode(12.345, 1000.0, 0.0, 22).unwrap();
        let value = decode(code, 1000.0, 0.0);
        assert!((value - 12.345).abs() < 0.001);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(encode(1_000_000.0, 1000.0, 0.0, 8).is_err());
    }

    #[test]
    fn cosine_table_matches_std_within_tolerance() {
        for degrees in [-89, -45, -1, 0, 1, 45, 89] {
            let expected = (degrees as f64).to_radians().cos();
            let found = cosine_for_latitude(degrees as f64);
            assert!((expected - found).abs() < 1e-8, "{degrees}: {expected} vs {found}");
        }
    }

    #[test]
    fn longitude_diff_round_trips_near_equator() {
        let code = encode_longitude_diff(0.01, 0.0, 36_000_000.0, 131_072.0, 18).unwrap();
        let back = decode_longitude_diff(code, 0.0, 36_000_000.0, 131_072.0);
        assert!((back - 0.01).abs() < 1e-6);
    }
}
