//! ID 生成

use chrono::Utc;
use rand::Rng;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 随机 base36 串
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// 对局 ID：`<毫秒时间戳>-<9 位 base36>`
pub fn match_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), random_base36(9))
}

/// 游客 ID：9 位 base36
pub fn guest_id() -> String {
    random_base36(9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_id_format() {
        let id = match_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().unwrap() > 0);
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn test_guest_ids_differ() {
        assert_ne!(guest_id(), guest_id());
    }
}
