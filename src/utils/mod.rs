//! 日志与统计用的小工具

use std::time::Duration;

/// 运行时间，精确到秒，例如 "2d 3h 0m 5s"
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) =
        (secs / 86_400, secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);

    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", seconds),
        (0, 0, _) => format!("{}m {}s", minutes, seconds),
        (0, _, _) => format!("{}h {}m {}s", hours, minutes, seconds),
        _ => format!("{}d {}h {}m {}s", days, hours, minutes, seconds),
    }
}

/// 无法解析的数据报只要还有头两个字节，就按查询ID记入日志
pub fn extract_query_id(datagram: &[u8]) -> Option<u16> {
    match datagram {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_millis(900)), "0s");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(60)), "1m 0s");
        assert_eq!(format_uptime(Duration::from_secs(3661)), "1h 1m 1s");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400 + 5)), "2d 0h 0m 5s");
    }

    #[test]
    fn test_extract_query_id() {
        // QR=1 的响应同样会被丢弃，ID 仍可读出
        assert_eq!(extract_query_id(&[0xbe, 0xef, 0x81, 0x80]), Some(0xbeef));
        assert_eq!(extract_query_id(&[0x00, 0x07]), Some(7));
        assert_eq!(extract_query_id(&[0x12]), None);
        assert_eq!(extract_query_id(&[]), None);
    }
}
