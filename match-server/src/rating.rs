//! Elo 等级分计算

/// 根据白方得分（胜 1、和 0.5、负 0）计算双方新等级分
pub fn calc_new_ratings(white: u32, black: u32, white_score: f64, k: f64) -> (u32, u32) {
    let (rw, rb) = (white as f64, black as f64);
    let expected_white = 1.0 / (1.0 + 10f64.powf((rb - rw) / 400.0));
    let expected_black = 1.0 / (1.0 + 10f64.powf((rw - rb) / 400.0));

    let new_white = (rw + k * (white_score - expected_white)).floor();
    let new_black = (rb + k * (1.0 - white_score - expected_black)).floor();
    (new_white.max(0.0) as u32, new_black.max(0.0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_favourite_wins() {
        // 1200 对 1000，期望得分约 0.76
        assert_eq!(calc_new_ratings(1200, 1000, 1.0, 30.0), (1207, 992));
    }

    #[test]
    fn test_upset() {
        assert_eq!(calc_new_ratings(1200, 1000, 0.0, 30.0), (1177, 1022));
    }

    #[test]
    fn test_equal_draw() {
        assert_eq!(calc_new_ratings(1200, 1200, 0.5, 30.0), (1200, 1200));
    }

    #[test]
    fn test_equal_win() {
        assert_eq!(calc_new_ratings(1500, 1500, 1.0, 16.0), (1508, 1492));
    }
}
