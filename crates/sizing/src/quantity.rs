//! Parsing and rendering of Kubernetes resource quantity strings.
//!
//! Quantities are held as `f64` internally. That is lossy by design:
//! proportional sizing divides node capacity, so exact integer arithmetic
//! would have to give way somewhere anyway. The rendering side mitigates
//! the worst of it by staying in milli-scale for small values.

use error_stack::Report;

use crate::error::SizingError;

/// Parse a quantity in the usual SI-suffixed grammar (`100m`, `2Gi`, `1e3`)
/// into an approximate float.
///
/// # Errors
///
/// - [`SizingError::InvalidAnnotationValue`] if the text is not a quantity
pub fn parse(text: &str) -> Result<f64, Report<SizingError>> {
    let text = text.trim();

    // Plain decimals and e-notation parse directly. The float grammar also
    // accepts "inf" and "nan", which are not quantities.
    if let Ok(value) = text.parse::<f64>() {
        return if value.is_finite() {
            Ok(value)
        } else {
            Err(Report::new(SizingError::InvalidAnnotationValue {
                message: format!("{text} is not a finite quantity"),
            }))
        };
    }

    let Some(split) = text.find(|c: char| c.is_ascii_alphabetic()) else {
        return Err(Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} is not a quantity"),
        }));
    };
    let (number, suffix) = text.split_at(split);

    let number: f64 = number.parse().map_err(|_| {
        Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} has no numeric part before its suffix"),
        })
    })?;

    let multiplier: f64 = match suffix {
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => (1u64 << 20) as f64,
        "Gi" => (1u64 << 30) as f64,
        "Ti" => (1u64 << 40) as f64,
        "Pi" => (1u64 << 50) as f64,
        "Ei" => (1u64 << 60) as f64,
        _ => {
            return Err(Report::new(SizingError::InvalidAnnotationValue {
                message: format!("{suffix} is not a quantity suffix"),
            }));
        }
    };

    let value = number * multiplier;
    if !value.is_finite() {
        return Err(Report::new(SizingError::InvalidAnnotationValue {
            message: format!("{text} overflows the quantity range"),
        }));
    }
    Ok(value)
}

/// Largest exponent that is a multiple of 3 and does not exceed the value's
/// order of magnitude. (8 / 3) * 3 = 6, as everybody knows.
fn integer_exponent(value: f64) -> i32 {
    if value == 0.0 {
        return 0;
    }
    ((value.log10().trunc() as i32) / 3) * 3
}

/// Render a float back into suffixed quantity text, i.e. `2G` or `200m`.
///
/// Values up to 10 stay in milli-scale, which keeps cpu-sized quantities
/// exact to the milli. Larger values are floored at the nearest power-of-ten
/// scale whose exponent is a multiple of 3, losing up to one unit at that
/// scale. Binary (`Mi`/`Gi`) suffixes are never produced; capacity that
/// arrived in powers of two leaves in powers of ten.
pub fn render(value: f64) -> String {
    let milli = (value * 1000.0) as i64;
    if milli <= 10_000 {
        if milli % 1000 == 0 {
            format!("{}", milli / 1000)
        } else {
            format!("{milli}m")
        }
    } else {
        let scale = integer_exponent(value).min(18);
        let magnitude = 10f64.powi(scale);
        let scaled = (value / magnitude).floor() as i64;
        let suffix = match scale {
            3 => "k",
            6 => "M",
            9 => "G",
            12 => "T",
            15 => "P",
            18 => "E",
            _ => "",
        };
        format!("{scaled}{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_numbers() {
        assert_eq!(parse("4").unwrap(), 4.0);
        assert_eq!(parse("0.5").unwrap(), 0.5);
        assert_eq!(parse("1e3").unwrap(), 1000.0);
    }

    #[test]
    fn parse_decimal_suffixes() {
        assert_eq!(parse("100m").unwrap(), 0.1);
        assert_eq!(parse("250m").unwrap(), 0.25);
        assert_eq!(parse("2k").unwrap(), 2000.0);
        assert_eq!(parse("840M").unwrap(), 840_000_000.0);
        assert_eq!(parse("3G").unwrap(), 3_000_000_000.0);
    }

    #[test]
    fn parse_binary_suffixes() {
        assert_eq!(parse("1Ki").unwrap(), 1024.0);
        assert_eq!(parse("100Mi").unwrap(), 104_857_600.0);
        assert_eq!(parse("2Gi").unwrap(), 2_147_483_648.0);
        assert_eq!(parse("1Ti").unwrap(), 1024f64.powi(4));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("a lot").is_err());
        assert!(parse("100x").is_err());
        assert!(parse("Gi").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn parse_rejects_non_finite_floats() {
        // The float grammar accepts these; the quantity grammar does not.
        for bad in ["nan", "NaN", "inf", "-inf", "infinity", "1e999", "9e307k"] {
            assert!(parse(bad).is_err(), "{bad} must not parse as a quantity");
        }
    }

    #[test]
    fn render_milli_scale() {
        assert_eq!(render(0.1), "100m");
        assert_eq!(render(0.4), "400m");
        assert_eq!(render(1.5), "1500m");
        assert_eq!(render(2.0), "2");
        assert_eq!(render(10.0), "10");
        assert_eq!(render(0.0), "0");
    }

    #[test]
    fn render_scaled() {
        assert_eq!(render(840_000_000.0), "840M");
        assert_eq!(render(342_000_000.0), "342M");
        assert_eq!(render(15.0), "15");
        assert_eq!(render(2_000_000_000_000.0), "2T");
    }

    #[test]
    fn render_floors_at_selected_scale() {
        // 85899345.92 bytes is 81.92Mi; the decimal rendering floors at 1e6
        assert_eq!(render(85_899_345.92), "85M");
    }

    #[test]
    fn render_round_trips_within_scale_unit() {
        // Milli rendering is exact to the milli; scaled rendering loses
        // strictly less than one unit at the selected scale.
        for value in [0.1, 0.25, 1.5, 9.999, 123.0, 85_899_345.92, 8.6e11] {
            let rendered = render(value);
            let reparsed = parse(&rendered).unwrap();
            let scale = if value <= 10.0 {
                1e-3
            } else {
                10f64.powi(super::integer_exponent(value))
            };
            assert!(
                (value - reparsed).abs() <= scale,
                "{value} -> {rendered} -> {reparsed}"
            );
        }
    }
}
