//! Rate steps in terms of relative interval width.
//!
//! A relative width `w` of an interval `[lo, hi)` means `lo = hi * (1 - w)`.
//! Doubling uses `1.999 * w - w * w`, a little narrower than the exact
//! `2 * w - w * w`, so halving a doubled width ends just inside the starting width.

/// Relative width of an interval twice as wide, in the logarithmic sense.
pub fn double_relative_width(relative_width: f64) -> f64 {
    1.999 * relative_width - relative_width * relative_width
}

/// Rate one doubled width below `current_bound`.
pub fn double_step_down(relative_width: f64, current_bound: f64) -> f64 {
    current_bound * (1.0 - double_relative_width(relative_width))
}

/// Rate one doubled width above `current_bound`.
pub fn double_step_up(relative_width: f64, current_bound: f64) -> f64 {
    current_bound / (1.0 - double_relative_width(relative_width))
}

/// Rate below `current_bound` after widening `doublings` times.
pub fn expand_down(relative_width: f64, doublings: u32, current_bound: f64) -> f64 {
    let width = doubled(relative_width, doublings);
    current_bound * (1.0 - width)
}

/// Rate above `current_bound` after widening `doublings` times.
pub fn expand_up(relative_width: f64, doublings: u32, current_bound: f64) -> f64 {
    let width = doubled(relative_width, doublings);
    current_bound / (1.0 - width)
}

/// Relative width of an interval half as wide, in the logarithmic sense.
pub fn half_relative_width(relative_width: f64) -> f64 {
    1.0 - (1.0 - relative_width).sqrt()
}

/// Rate in the logarithmic middle of an interval starting at `current_bound`.
pub fn half_step_up(relative_width: f64, current_bound: f64) -> f64 {
    current_bound / (1.0 - half_relative_width(relative_width))
}

fn doubled(mut relative_width: f64, doublings: u32) -> f64 {
    for _ in 0..doublings {
        relative_width = double_relative_width(relative_width);
    }
    relative_width
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn double_width() {
        assert!(close(double_relative_width(0.005), 0.00997));
    }

    #[test]
    fn double_steps() {
        assert!(close(double_step_down(0.005, 100000.0), 99003.0));
        assert!(close(double_step_up(0.005, 100000.0), 101007.0401907013));
    }

    #[test]
    fn expand() {
        assert!(close(expand_down(0.005, 1, 100000.0), 99003.0));
        assert!(close(expand_up(0.005, 1, 100000.0), 101007.0401907013));
        assert!(close(expand_down(0.005, 0, 100000.0), 99500.0));
    }

    #[test]
    fn half_width() {
        assert!(close(half_relative_width(0.005), 0.0025031328369998773));
        assert!(close(half_step_up(0.005, 100000.0), 100250.94142341711));
    }

    #[test]
    fn half_of_double_is_close_to_identity() {
        let w = 0.01;
        let back = half_relative_width(double_relative_width(w));
        assert!((back - w).abs() < 1e-5);
    }
}
